use std::{
    collections::HashMap,
    panic::{self, AssertUnwindSafe},
};

use tracing::warn;

use crate::{
    handle::panic_message,
    ring::{Placement, SlotRing},
    slab::Slab,
    task::{Operation, TaskElement},
};

/// Key to slab id for every element resident in the ring.
#[derive(Debug, Default)]
pub struct TaskIndex {
    ids: HashMap<String, usize>,
}

impl TaskIndex {
    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<usize> {
        self.ids.get(key).copied()
    }

    #[inline]
    pub fn insert(&mut self, key: String, id: usize) -> Option<usize> {
        self.ids.insert(key, id)
    }

    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<usize> {
        self.ids.remove(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The driver-owned half of the scheduler.
///
/// Single writer: only the driver thread ever holds one of these, so none
/// of the structures below are synchronized. An element is reachable from
/// the ring and the index together or from neither; the slab is the sole
/// owner of the element itself.
pub(crate) struct Wheel {
    tasks: Slab<TaskElement>,
    ring: SlotRing,
    index: TaskIndex,
    current_slot: usize,
    /// Advances since start. `current_slot` is always `tick % slot_count`.
    tick: u64,
    next_seq: u64,
}

impl Wheel {
    pub fn new(slot_count: usize) -> Self {
        Self {
            tasks: Slab::new(),
            ring: SlotRing::new(slot_count),
            index: TaskIndex::default(),
            current_slot: 0,
            tick: 0,
            next_seq: 0,
        }
    }

    #[inline]
    pub fn current_slot(&self) -> usize {
        self.current_slot
    }

    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.ring.slot_count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.index.get(key).is_some()
    }

    pub fn apply(&mut self, op: Operation) {
        match op {
            Operation::Add(task) => self.insert(task),
            Operation::Delete(key) => {
                if let Some(task) = self.remove(&key) {
                    discard(task);
                }
            }
        }
    }

    /// Insert a task, superseding any pending task with the same key.
    ///
    /// A task placed against an older tick is re-placed from the current
    /// slot with the advances that have already passed subtracted, so a
    /// producer racing the driver never costs the task an extra lap.
    pub fn insert(&mut self, mut task: TaskElement) {
        if let Some(old) = self.remove(&task.key) {
            discard(old);
        }

        let slot_count = self.ring.slot_count();
        match task.origin {
            Some(origin) if origin.tick < self.tick => {
                let remaining = origin.ticks.saturating_sub(self.tick - origin.tick);
                let placement = Placement::for_ticks(self.current_slot, remaining, slot_count);
                task.pos = placement.pos;
                task.cycle = placement.cycle;
            }
            _ => task.pos %= slot_count,
        }

        task.seq = self.next_seq;
        self.next_seq += 1;

        let (pos, seq) = (task.pos, task.seq);
        let key = task.key.clone();
        let id = self.tasks.insert(task);
        self.ring.insert(pos, seq, id);
        self.index.insert(key, id);

        debug_assert_eq!(self.tasks.len(), self.index.len(), "slab and index diverged");
    }

    /// Unlink a pending task. Unknown keys are ignored.
    pub fn remove(&mut self, key: &str) -> Option<TaskElement> {
        let id = self.index.remove(key)?;
        let task = self.tasks.remove(id)?;
        self.ring.remove(task.pos, task.seq);
        Some(task)
    }

    /// Process the current slot and step the ring forward by one.
    ///
    /// Elements with laps remaining lose one and stay put; the rest are
    /// unlinked and appended to `due` in insertion order.
    pub fn advance(&mut self, due: &mut Vec<TaskElement>) -> usize {
        let before = due.len();
        let current = self.current_slot;
        let Self {
            tasks, ring, index, ..
        } = self;

        ring.retain(current, |_, id| {
            let Some(task) = tasks.get_mut(id) else {
                return false;
            };

            if task.cycle > 0 {
                task.cycle -= 1;
                return true;
            }

            if let Some(task) = tasks.remove(id) {
                index.remove(&task.key);
                due.push(task);
            }
            false
        });

        self.current_slot = (current + 1) % self.ring.slot_count();
        self.tick += 1;
        due.len() - before
    }
}

/// Drop a task that will never fire, which cancels its handle.
///
/// The work owns caller-supplied captures; a panic while dropping them is
/// logged and contained to this task.
fn discard(task: TaskElement) {
    let TaskElement { key, work, .. } = task;

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || drop(work))) {
        warn!(
            key = %key,
            panic = %panic_message(payload.as_ref()),
            "dropping a discarded task panicked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // ==================== Helpers ====================

    fn task(wheel: &Wheel, key: &str, delay_ms: u64, interval_ms: u64) -> TaskElement {
        let placement = Placement::for_delay(
            wheel.current_slot(),
            delay_ms,
            wheel.ring.slot_count(),
            interval_ms,
        );
        TaskElement::new(
            key.to_string(),
            placement.pos,
            placement.cycle,
            Box::new(|| {}),
        )
    }

    fn counting(key: &str, pos: usize, cycle: u64, hits: &Arc<AtomicUsize>) -> TaskElement {
        let hits = Arc::clone(hits);
        TaskElement::new(
            key.to_string(),
            pos,
            cycle,
            Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    /// A task a producer placed at `tick`, due after `ticks` advances.
    fn placed(key: &str, tick: u64, ticks: u64, slot_count: usize) -> TaskElement {
        let current = (tick % slot_count as u64) as usize;
        let p = Placement::for_ticks(current, ticks, slot_count);
        TaskElement::new(key.to_string(), p.pos, p.cycle, Box::new(|| {})).placed_at(tick, ticks)
    }

    struct PanicOnDrop;

    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("drop exploded");
        }
    }

    fn bomb(key: &str) -> TaskElement {
        let bomb = PanicOnDrop;
        TaskElement::new(
            key.to_string(),
            1,
            0,
            Box::new(move || {
                let _armed = &bomb;
            }),
        )
    }

    /// Advance until something fires; returns the number of advances taken.
    fn advances_until_due(wheel: &mut Wheel, limit: usize) -> Option<(usize, Vec<String>)> {
        let mut due = Vec::new();
        for n in 1..=limit {
            if wheel.advance(&mut due) > 0 {
                return Some((n, due.into_iter().map(|t| t.key).collect()));
            }
        }
        None
    }

    fn assert_linked(wheel: &Wheel) {
        assert_eq!(wheel.index.len(), wheel.ring.len());
        assert_eq!(wheel.tasks.len(), wheel.ring.len());
    }

    // ==================== Insert / Remove ====================

    #[test]
    fn test_insert_links_ring_and_index() {
        let mut wheel = Wheel::new(10);
        let t = task(&wheel, "a", 2500, 1000);
        wheel.insert(t);

        assert!(wheel.contains("a"));
        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.ring.slot_len(2), 1);
        assert_linked(&wheel);
    }

    #[test]
    fn test_insert_same_key_supersedes() {
        let mut wheel = Wheel::new(10);

        let t = task(&wheel, "k", 2000, 1000);
        wheel.insert(t);
        let t = task(&wheel, "k", 5000, 1000);
        wheel.insert(t);

        assert_eq!(wheel.len(), 1);
        assert_eq!(wheel.ring.slot_len(2), 0);
        assert_eq!(wheel.ring.slot_len(5), 1);
        assert_linked(&wheel);
    }

    #[test]
    fn test_superseded_work_never_runs() {
        let mut wheel = Wheel::new(4);
        let old = Arc::new(AtomicUsize::new(0));
        let new = Arc::new(AtomicUsize::new(0));

        wheel.insert(counting("k", 1, 0, &old));
        wheel.insert(counting("k", 1, 0, &new));

        let mut due = Vec::new();
        wheel.advance(&mut due);
        wheel.advance(&mut due);
        for t in due {
            (t.work)();
        }

        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_pending() {
        let mut wheel = Wheel::new(10);
        let t = task(&wheel, "a", 3000, 1000);
        wheel.insert(t);

        let removed = wheel.remove("a").unwrap();
        assert_eq!(removed.key, "a");
        assert!(wheel.is_empty());
        assert_linked(&wheel);
        assert!(advances_until_due(&mut wheel, 30).is_none());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut wheel = Wheel::new(10);
        let t = task(&wheel, "a", 3000, 1000);
        wheel.insert(t);

        assert!(wheel.remove("missing").is_none());
        wheel.apply(Operation::Delete("missing".to_string()));
        assert_eq!(wheel.len(), 1);
    }

    #[test]
    fn test_apply_in_order() {
        let mut wheel = Wheel::new(10);
        let add = task(&wheel, "a", 3000, 1000);

        wheel.apply(Operation::Delete("a".to_string()));
        wheel.apply(Operation::Add(add));
        assert!(wheel.contains("a"));

        wheel.apply(Operation::Delete("a".to_string()));
        assert!(!wheel.contains("a"));
    }

    #[test]
    fn test_out_of_range_pos_wrapped() {
        let mut wheel = Wheel::new(4);
        wheel.insert(TaskElement::new("k".into(), 6, 0, Box::new(|| {})));
        assert_eq!(wheel.ring.slot_len(2), 1);
    }

    // ==================== Stale Placement ====================

    #[test]
    fn test_stale_placement_fires_on_requested_tick() {
        // (ticks the driver advanced before applying, requested ticks, expected fire tick)
        let cases = [(0, 3, 4), (3, 1, 4), (2, 5, 6), (1, 10, 11), (4, 25, 26)];

        for (applied_at, ticks, fires_at) in cases {
            let mut wheel = Wheel::new(10);
            let mut due = Vec::new();
            for _ in 0..applied_at {
                wheel.advance(&mut due);
            }

            wheel.insert(placed("t", 0, ticks, 10));

            let (n, keys) = advances_until_due(&mut wheel, 100).unwrap();
            assert_eq!(keys, vec!["t"]);
            assert_eq!(applied_at + n as u64, fires_at, "applied at {applied_at}, ticks {ticks}");
            assert_eq!(wheel.tick(), fires_at);
        }
    }

    #[test]
    fn test_stale_short_task_never_waits_a_lap() {
        let mut wheel = Wheel::new(10);
        let mut due = Vec::new();
        for _ in 0..7 {
            wheel.advance(&mut due);
        }

        // Placed against slot 5 before the driver moved on to slot 7
        wheel.insert(placed("short", 5, 0, 10));

        assert_eq!(wheel.advance(&mut due), 1);
        assert_eq!(due[0].key, "short");
    }

    #[test]
    fn test_current_placement_left_alone() {
        let mut wheel = Wheel::new(10);
        let mut due = Vec::new();
        for _ in 0..12 {
            wheel.advance(&mut due);
        }

        wheel.insert(placed("now", wheel.tick(), 13, 10));

        let id = wheel.index.get("now").unwrap();
        let task = wheel.tasks.get(id).unwrap();
        assert_eq!((task.pos, task.cycle), (5, 1));
    }

    // ==================== Discard ====================

    #[test]
    fn test_panicking_drop_on_supersede_contained() {
        let mut wheel = Wheel::new(4);
        let hits = Arc::new(AtomicUsize::new(0));

        wheel.insert(bomb("k"));
        wheel.insert(counting("k", 1, 0, &hits));

        assert_eq!(wheel.len(), 1);
        assert_linked(&wheel);

        let mut due = Vec::new();
        wheel.advance(&mut due);
        wheel.advance(&mut due);
        for t in due {
            (t.work)();
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_drop_on_delete_contained() {
        let mut wheel = Wheel::new(4);
        wheel.insert(bomb("k"));

        wheel.apply(Operation::Delete("k".to_string()));

        assert!(wheel.is_empty());
        assert_linked(&wheel);
    }

    // ==================== Advance ====================

    #[test]
    fn test_fires_on_first_visit_of_pos() {
        // 10 slots, 1s: "a" at 2.5s sits in slot 2 and fires on the third advance
        let mut wheel = Wheel::new(10);
        let t = task(&wheel, "a", 2500, 1000);
        wheel.insert(t);

        let (n, keys) = advances_until_due(&mut wheel, 100).unwrap();
        assert_eq!(n, 3);
        assert_eq!(keys, vec!["a"]);
        assert!(wheel.is_empty());
        assert_linked(&wheel);
    }

    #[test]
    fn test_fires_one_lap_later_with_cycle() {
        let mut wheel = Wheel::new(10);
        let t = task(&wheel, "b", 12_500, 1000);
        assert_eq!((t.pos, t.cycle), (2, 1));
        wheel.insert(t);

        let (n, keys) = advances_until_due(&mut wheel, 100).unwrap();
        assert_eq!(n, 13);
        assert_eq!(keys, vec!["b"]);
    }

    #[test]
    fn test_cycle_decrements_once_per_lap() {
        let mut wheel = Wheel::new(4);
        wheel.insert(TaskElement::new("k".into(), 0, 3, Box::new(|| {})));

        let mut due = Vec::new();
        for lap in 1..=3u64 {
            for _ in 0..4 {
                wheel.advance(&mut due);
            }
            let id = wheel.index.get("k").unwrap();
            assert_eq!(wheel.tasks.get(id).unwrap().cycle, 3 - lap);
        }
        assert!(due.is_empty());

        wheel.advance(&mut due);
        assert_eq!(due.len(), 1);
    }

    #[test]
    fn test_same_slot_fires_in_insertion_order() {
        let mut wheel = Wheel::new(8);
        for key in ["z", "a", "m"] {
            wheel.insert(TaskElement::new(key.into(), 0, 0, Box::new(|| {})));
        }

        let mut due = Vec::new();
        assert_eq!(wheel.advance(&mut due), 3);
        let keys: Vec<_> = due.iter().map(|t| t.key.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_mixed_cycles_in_one_slot() {
        let mut wheel = Wheel::new(4);
        wheel.insert(TaskElement::new("now".into(), 0, 0, Box::new(|| {})));
        wheel.insert(TaskElement::new("later".into(), 0, 1, Box::new(|| {})));

        let mut due = Vec::new();
        wheel.advance(&mut due);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].key, "now");
        assert!(wheel.contains("later"));
        assert_linked(&wheel);
    }

    #[test]
    fn test_current_slot_wraps() {
        let mut wheel = Wheel::new(3);
        let mut due = Vec::new();
        for _ in 0..7 {
            wheel.advance(&mut due);
        }
        assert_eq!(wheel.current_slot(), 1);
    }

    #[test]
    fn test_monotonic_by_delay() {
        let mut wheel = Wheel::new(10);
        for (key, delay) in [("d3", 3000), ("d25", 25_000), ("d1", 1000), ("d12", 12_000)] {
            let t = task(&wheel, key, delay, 1000);
            wheel.insert(t);
        }

        let mut order = Vec::new();
        let mut due = Vec::new();
        for _ in 0..40 {
            wheel.advance(&mut due);
            order.extend(due.drain(..).map(|t| t.key));
        }
        assert_eq!(order, vec!["d1", "d3", "d12", "d25"]);
    }

    #[test]
    fn test_fifty_tasks_forty_survive() {
        let mut wheel = Wheel::new(10);
        let hits = Arc::new(AtomicUsize::new(0));

        for i in 1..=50u64 {
            let p = Placement::for_delay(wheel.current_slot(), i * 1000, 10, 1000);
            wheel.insert(counting(&format!("No:{i}"), p.pos, p.cycle, &hits));
        }
        for i in 41..=50 {
            wheel.apply(Operation::Delete(format!("No:{i}")));
        }
        assert_eq!(wheel.len(), 40);

        let mut due = Vec::new();
        let mut fired = Vec::new();
        for _ in 0..60 {
            wheel.advance(&mut due);
            for t in due.drain(..) {
                fired.push(t.key.clone());
                (t.work)();
            }
        }

        assert_eq!(hits.load(Ordering::SeqCst), 40);
        let expected: Vec<_> = (1..=40).map(|i| format!("No:{i}")).collect();
        assert_eq!(fired, expected);
        assert!(wheel.is_empty());
    }
}
