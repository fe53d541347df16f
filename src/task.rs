use std::fmt;

/// Deferred nullary unit of work. Invoked at most once, on the driver thread.
pub(crate) type Work = Box<dyn FnOnce() + Send + 'static>;

/// The driver tick a producer placed an element against, and the number of
/// advances it asked to wait from there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Origin {
    pub tick: u64,
    pub ticks: u64,
}

/// A scheduled work item and its position in the ring.
pub(crate) struct TaskElement {
    pub key: String,
    pub work: Work,
    /// Slot the element is parked in.
    pub pos: usize,
    /// Full rotations still to wait once the ring reaches `pos`.
    pub cycle: u64,
    /// Stamped by the driver when the element goes live.
    pub seq: u64,
    /// `None` when `pos` and `cycle` are already relative to the driver.
    pub origin: Option<Origin>,
}

impl TaskElement {
    pub fn new(key: String, pos: usize, cycle: u64, work: Work) -> Self {
        Self {
            key,
            work,
            pos,
            cycle,
            seq: 0,
            origin: None,
        }
    }

    /// Record the tick `pos` and `cycle` were computed against, so the
    /// driver can re-place the element if it has advanced since.
    pub fn placed_at(mut self, tick: u64, ticks: u64) -> Self {
        self.origin = Some(Origin { tick, ticks });
        self
    }
}

impl fmt::Debug for TaskElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskElement")
            .field("key", &self.key)
            .field("pos", &self.pos)
            .field("cycle", &self.cycle)
            .field("seq", &self.seq)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// A mutation request travelling from a producer to the driver.
#[derive(Debug)]
pub(crate) enum Operation {
    Add(TaskElement),
    Delete(String),
}
