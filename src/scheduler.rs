use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    config::WheelConfig,
    driver::{Driver, Shared},
    handle::{TaskHandle, package},
    queue::DriverState,
    ring::Placement,
    task::{Operation, TaskElement},
};

const DRIVER_THREAD_NAME: &str = "lapwheel-driver";

#[derive(Debug, thiserror::Error)]
pub enum WheelError {
    #[error("task key must not be empty")]
    EmptyKey,
    #[error("task delay must be at least one millisecond")]
    ZeroDelay,
    #[error("failed to spawn timing wheel driver thread")]
    Spawn(#[source] io::Error),
}

impl WheelError {
    /// The call was rejected for its arguments; nothing was scheduled.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::EmptyKey | Self::ZeroDelay)
    }
}

/// Hashed timing wheel driven by a dedicated background thread.
///
/// Producers on any thread call [`add_task`](Self::add_task) and
/// [`remove_task`](Self::remove_task); both only append to a queue. The
/// driver thread started by [`run`](Self::run) applies queued operations,
/// advances one slot per interval and invokes due work items without
/// holding any lock.
///
/// Dropping the wheel closes it and joins the driver. Tasks still pending
/// at that point are discarded, not fired.
pub struct TimeWheel {
    config: WheelConfig,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl Default for TimeWheel {
    fn default() -> Self {
        Self::new(WheelConfig::default())
    }
}

impl TimeWheel {
    pub fn new(config: WheelConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new()),
            driver: Mutex::new(None),
        }
    }

    /// Convenience for `TimeWheel::new(WheelConfig::new(slot_count, interval_ms))`.
    pub fn with_slots(slot_count: usize, interval_ms: u64) -> Self {
        Self::new(WheelConfig::new(slot_count, interval_ms))
    }

    #[inline]
    pub fn config(&self) -> &WheelConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> DriverState {
        self.shared.queue.state()
    }

    /// Tasks parked in the ring as of the driver's last pass.
    #[inline]
    pub fn live_tasks(&self) -> usize {
        self.shared.live()
    }

    /// Work items invoked so far, panicking ones included.
    #[inline]
    pub fn fired_tasks(&self) -> u64 {
        self.shared.fired()
    }

    /// Operations queued but not yet seen by the driver.
    pub fn queued_operations(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the driver thread has exited, normally or by panic.
    ///
    /// `false` if the driver was never started.
    pub fn is_finished(&self) -> bool {
        self.driver
            .lock()
            .as_ref()
            .is_some_and(|handle| handle.is_finished())
    }

    /// Schedule `work` to run once, roughly `delay` from now.
    ///
    /// A pending task with the same key is superseded. The delay is
    /// truncated to whole milliseconds and must be at least one.
    ///
    /// Tasks added before [`run`](Self::run) wait in the queue. After
    /// [`close`](Self::close) the work is dropped immediately and the
    /// handle reports [`TaskError::Cancelled`](crate::TaskError::Cancelled).
    pub fn add_task<F, R>(
        &self,
        key: impl Into<String>,
        delay: Duration,
        work: F,
    ) -> Result<TaskHandle<R>, WheelError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let key = key.into();
        if key.is_empty() {
            return Err(WheelError::EmptyKey);
        }

        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if delay_ms == 0 {
            return Err(WheelError::ZeroDelay);
        }

        let slot_count = self.config.slot_count();
        let tick = self.shared.tick();
        let current_slot = (tick % slot_count as u64) as usize;
        let placement = Placement::for_delay(
            current_slot,
            delay_ms,
            slot_count,
            self.config.interval_ms(),
        );

        let (work, handle) = package(key.clone(), work);
        let task = TaskElement::new(key, placement.pos, placement.cycle, work)
            .placed_at(tick, delay_ms / self.config.interval_ms());

        // Rejected once closing; dropping the operation cancels the handle.
        let _ = self.shared.queue.push(Operation::Add(task));
        Ok(handle)
    }

    /// Cancel the pending task with this key, if any.
    ///
    /// Lookup happens on the driver; unknown or already-fired keys are ignored.
    pub fn remove_task(&self, key: impl Into<String>) {
        let key = key.into();
        if key.is_empty() {
            return;
        }
        let _ = self.shared.queue.push(Operation::Delete(key));
    }

    /// Start the driver thread. No-op if it is already running or the
    /// wheel has been closed.
    pub fn run(&self) -> Result<(), WheelError> {
        let mut driver = self.driver.lock();

        if !self
            .shared
            .queue
            .transition(DriverState::Stopped, DriverState::Running)
        {
            if self.shared.queue.is_closing() {
                warn!("run called on a closed timing wheel; ignoring");
            }
            return Ok(());
        }

        let worker = Driver::new(
            Arc::clone(&self.shared),
            self.config.slot_count(),
            self.config.interval(),
        );

        match thread::Builder::new()
            .name(DRIVER_THREAD_NAME.to_string())
            .spawn(move || worker.run())
        {
            Ok(handle) => {
                *driver = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared
                    .queue
                    .transition(DriverState::Running, DriverState::Stopped);
                Err(WheelError::Spawn(err))
            }
        }
    }

    /// Stop the driver. Idempotent and callable from any thread, including
    /// from inside a work item. Does not wait for the driver to exit.
    pub fn close(&self) {
        let prev = self.shared.queue.close();
        if prev != DriverState::Closing {
            debug!(from = ?prev, "timing wheel closing");
        }
    }
}

impl Drop for TimeWheel {
    fn drop(&mut self) {
        self.close();

        let Some(handle) = self.driver.get_mut().take() else {
            return;
        };

        // Dropped from inside a work item: the driver exits once it returns.
        if handle.thread().id() == thread::current().id() {
            return;
        }

        if handle.join().is_err() {
            error!("timing wheel driver thread panicked");
        }
    }
}
