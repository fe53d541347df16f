use std::collections::BTreeMap;

/// Where a delay lands on the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub pos: usize,
    pub cycle: u64,
}

impl Placement {
    /// Place a delay relative to `current_slot`.
    ///
    /// The task needs `delay_ms / interval_ms` tick advances; `pos` is that
    /// count modulo the ring, `cycle` the number of extra full laps.
    pub fn for_delay(
        current_slot: usize,
        delay_ms: u64,
        slot_count: usize,
        interval_ms: u64,
    ) -> Self {
        debug_assert!(interval_ms > 0, "interval must be at least 1ms");

        Self::for_ticks(current_slot, delay_ms / interval_ms, slot_count)
    }

    /// Place a task that is due after `ticks` more advances.
    pub fn for_ticks(current_slot: usize, ticks: u64, slot_count: usize) -> Self {
        debug_assert!(slot_count > 0, "ring must have at least one slot");

        let slots = slot_count as u64;
        let pos = ((current_slot as u64 % slots + ticks % slots) % slots) as usize;
        let cycle = ticks / slots;

        Self { pos, cycle }
    }
}

/// Fixed ring of slots.
///
/// Each slot maps the driver-assigned insertion sequence to the slab id of
/// the element parked there, so iteration within a slot is insertion order.
pub struct SlotRing {
    slots: Box<[BTreeMap<u64, usize>]>,
}

impl SlotRing {
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count > 0, "ring must have at least one slot");

        Self {
            slots: (0..slot_count).map(|_| BTreeMap::new()).collect(),
        }
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.iter().map(BTreeMap::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub fn slot_len(&self, pos: usize) -> usize {
        self.slots[pos].len()
    }

    pub fn insert(&mut self, pos: usize, seq: u64, id: usize) {
        debug_assert!(pos < self.slots.len(), "slot {pos} out of bounds");

        self.slots[pos].insert(seq, id);
    }

    pub fn remove(&mut self, pos: usize, seq: u64) -> Option<usize> {
        self.slots.get_mut(pos)?.remove(&seq)
    }

    /// Keep only the entries of slot `pos` for which `f` returns `true`,
    /// visiting them in insertion order.
    pub fn retain<F>(&mut self, pos: usize, mut f: F)
    where
        F: FnMut(u64, usize) -> bool,
    {
        self.slots[pos].retain(|&seq, &mut id| f(seq, id));
    }
}
