use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, trace, warn};

use crate::{
    handle::panic_message,
    queue::{Drain, OperationQueue},
    task::TaskElement,
    wheel::Wheel,
};

/// State visible to both producers and the driver.
///
/// Everything except the queue is a published snapshot: the driver is
/// the only writer, producers only read.
pub(crate) struct Shared {
    pub queue: OperationQueue,
    tick: AtomicU64,
    live: AtomicUsize,
    fired: AtomicU64,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            queue: OperationQueue::new(),
            tick: AtomicU64::new(0),
            live: AtomicUsize::new(0),
            fired: AtomicU64::new(0),
        }
    }

    /// Ring advances so far. The slot producers place against is this
    /// modulo the slot count.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    #[inline]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    #[inline]
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Acquire)
    }
}

/// Background loop that owns the wheel.
pub(crate) struct Driver {
    shared: Arc<Shared>,
    wheel: Wheel,
    interval: Duration,
}

impl Driver {
    pub fn new(shared: Arc<Shared>, slot_count: usize, interval: Duration) -> Self {
        shared.tick.store(0, Ordering::Release);
        shared.live.store(0, Ordering::Release);

        Self {
            shared,
            wheel: Wheel::new(slot_count),
            interval,
        }
    }

    /// Run until the queue reports closing. Consumes the driver; anything
    /// still parked in the wheel is dropped on return.
    pub fn run(mut self) {
        let _exit = ExitGuard {
            shared: Arc::clone(&self.shared),
        };

        debug!(
            slots = self.wheel.slot_count(),
            interval_ms = self.interval.as_millis() as u64,
            "timing wheel driver started"
        );

        let mut ops = Vec::new();
        let mut due = Vec::new();
        let mut next_tick = Instant::now() + self.interval;

        loop {
            if self.shared.queue.wait_and_drain(next_tick, &mut ops) == Drain::Closing {
                break;
            }

            for op in ops.drain(..) {
                self.wheel.apply(op);
            }

            let now = Instant::now();
            if now >= next_tick {
                let slot = self.wheel.current_slot();
                let count = self.wheel.advance(&mut due);
                self.shared.tick.store(self.wheel.tick(), Ordering::Release);
                next_tick = now + self.interval;

                trace!(slot, due = count, live = self.wheel.len(), "tick");
            }
            self.shared.live.store(self.wheel.len(), Ordering::Release);

            if !self.fire(&mut due) {
                break;
            }
        }

        debug!(
            discarded = self.wheel.len(),
            fired = self.shared.fired(),
            "timing wheel driver stopped"
        );
    }

    /// Invoke each due task in order. Returns `false` if close was observed,
    /// in which case the rest of the batch is dropped unfired.
    fn fire(&self, due: &mut Vec<TaskElement>) -> bool {
        for task in due.drain(..) {
            if self.shared.queue.is_closing() {
                return false;
            }

            let TaskElement { key, work, .. } = task;
            trace!(key = %key, "firing task");

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                warn!(
                    key = %key,
                    panic = %panic_message(payload.as_ref()),
                    "task panicked on the driver thread"
                );
            }
            self.shared.fired.fetch_add(1, Ordering::AcqRel);
        }
        true
    }
}

/// Marks the wheel closed however the driver exits, so producers stop
/// queueing into a queue nobody drains.
struct ExitGuard {
    shared: Arc<Shared>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.shared.queue.close();
        self.shared.live.store(0, Ordering::Release);

        if thread::panicking() {
            error!("timing wheel driver terminated by panic");
        }
    }
}
