use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::task::Operation;

/// Lifecycle of the background driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverState {
    /// Constructed, driver not started. Operations queue up.
    Stopped,
    /// Driver thread is ticking.
    Running,
    /// Terminal. The driver exits at its next check and pending work is discarded.
    Closing,
}

/// Outcome of [`OperationQueue::wait_and_drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drain {
    /// Returned with the pending operations (possibly none, on deadline).
    Ready,
    Closing,
}

struct Pending {
    ops: Vec<Operation>,
    state: DriverState,
}

/// FIFO of mutation requests shared by producers and the driver.
///
/// The lock is only held for O(1) pushes and a buffer swap; ring mutation
/// and work execution happen on the driver after the lock is released.
pub(crate) struct OperationQueue {
    pending: Mutex<Pending>,
    ready: Condvar,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Pending {
                ops: Vec::new(),
                state: DriverState::Stopped,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append an operation and wake the driver.
    ///
    /// Once closing, the operation is handed back instead.
    pub fn push(&self, op: Operation) -> Result<(), Operation> {
        {
            let mut pending = self.pending.lock();
            if pending.state == DriverState::Closing {
                return Err(op);
            }
            pending.ops.push(op);
        }
        self.ready.notify_one();
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> DriverState {
        self.pending.lock().state
    }

    #[inline]
    pub fn is_closing(&self) -> bool {
        self.state() == DriverState::Closing
    }

    /// Move from `from` to `to`. Returns `false` if the state was not `from`.
    pub fn transition(&self, from: DriverState, to: DriverState) -> bool {
        let mut pending = self.pending.lock();
        if pending.state != from {
            return false;
        }
        pending.state = to;
        true
    }

    /// Enter the terminal state and wake the driver. Returns the previous state.
    pub fn close(&self) -> DriverState {
        let prev = {
            let mut pending = self.pending.lock();
            std::mem::replace(&mut pending.state, DriverState::Closing)
        };
        self.ready.notify_all();
        prev
    }

    /// Block until an operation arrives, close is requested, or `deadline`
    /// passes, then swap every pending operation into `buf`.
    ///
    /// `buf` is expected to be empty; its allocation is handed to the queue.
    pub fn wait_and_drain(&self, deadline: Instant, buf: &mut Vec<Operation>) -> Drain {
        debug_assert!(buf.is_empty(), "drain buffer not consumed");

        let mut pending = self.pending.lock();
        loop {
            if pending.state == DriverState::Closing {
                return Drain::Closing;
            }
            if !pending.ops.is_empty() {
                break;
            }
            // Re-check the predicate on spurious wakeups; give up at the deadline.
            if self.ready.wait_until(&mut pending, deadline).timed_out() {
                if pending.state == DriverState::Closing {
                    return Drain::Closing;
                }
                break;
            }
        }

        std::mem::swap(&mut pending.ops, buf);
        Drain::Ready
    }

    /// Number of operations waiting for the driver.
    pub fn len(&self) -> usize {
        self.pending.lock().ops.len()
    }
}
