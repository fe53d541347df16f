use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::task::Work;

/// Why a task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The work item panicked on the driver thread.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// Removed, superseded by a task with the same key, or discarded at close.
    #[error("task was cancelled before it fired")]
    Cancelled,
}

/// Result handle for a scheduled task.
///
/// Dropping the handle does not cancel the task; use
/// [`TimeWheel::remove_task`](crate::TimeWheel::remove_task) for that.
/// The result can be taken once; later queries report
/// [`TaskError::Cancelled`].
pub struct TaskHandle<R> {
    key: String,
    rx: Receiver<Result<R, TaskError>>,
}

impl<R> fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<R> TaskHandle<R> {
    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Block until the task fires or is dropped unfired.
    pub fn wait(self) -> Result<R, TaskError> {
        self.rx.recv().unwrap_or(Err(TaskError::Cancelled))
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Returns `None` if the task is still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<R, TaskError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(TaskError::Cancelled)),
        }
    }

    /// Non-blocking poll. `None` while pending.
    pub fn try_result(&self) -> Option<Result<R, TaskError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(TaskError::Cancelled)),
        }
    }
}

/// Package a callable into driver-runnable [`Work`] plus its handle.
///
/// The returned work catches its own panics and reports them through the
/// handle. Dropping it unrun disconnects the channel, which the handle
/// reads as [`TaskError::Cancelled`].
pub(crate) fn package<F, R>(key: String, f: F) -> (Work, TaskHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = crossbeam_channel::bounded(1);

    let work: Work = Box::new(move || {
        let result = panic::catch_unwind(AssertUnwindSafe(f))
            .map_err(|payload| TaskError::Panicked(panic_message(payload.as_ref())));
        // Receiver may be gone; the caller discarded the handle.
        let _ = tx.send(result);
    });

    (work, TaskHandle { key, rx })
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
