//! Hashed timing wheel with a single-writer background driver.
//!
//! A [`TimeWheel`] keeps a ring of `slot_count` slots and advances one slot
//! every `interval`. A task delayed by `d` lands in slot
//! `(current + d / interval) % slot_count` with `d / (slot_count * interval)`
//! extra laps to wait, so adding, cancelling and expiring are O(1) per tick
//! regardless of how many timers are pending.
//!
//! Producers never touch the ring. [`TimeWheel::add_task`] and
//! [`TimeWheel::remove_task`] append to a mutex-guarded queue; the driver
//! thread swaps the queue out, applies it, advances the ring and runs due
//! work with no lock held.
//!
//! ```
//! use std::time::Duration;
//! use lapwheel::{TimeWheel, WheelConfig};
//!
//! let wheel = TimeWheel::new(WheelConfig::new(16, 10));
//! wheel.run().unwrap();
//!
//! let handle = wheel
//!     .add_task("greeting", Duration::from_millis(30), || "hello")
//!     .unwrap();
//! let dropped = wheel
//!     .add_task("cancelled", Duration::from_millis(30), || "never")
//!     .unwrap();
//! wheel.remove_task("cancelled");
//!
//! assert_eq!(handle.wait(), Ok("hello"));
//! assert!(dropped.wait().is_err());
//! ```
//!
//! Accuracy is bounded by the interval: a task fires on the tick that
//! brings its slot round for the last lap. Work runs on the driver
//! thread one item at a time, so long-running work delays everything due
//! after it.

mod config;
mod driver;
mod handle;
mod queue;
mod ring;
mod scheduler;
mod slab;
mod task;
mod wheel;

pub use config::{DEFAULT_INTERVAL_MS, DEFAULT_SLOT_COUNT, WheelConfig};
pub use handle::{TaskError, TaskHandle};
pub use queue::DriverState;
pub use scheduler::{TimeWheel, WheelError};

// ============================================================
// PRESETS
// ============================================================

/// 10 slots, 1s: ~10 second lap. Connection and request timeouts.
pub const SECONDS: WheelConfig = WheelConfig::const_new(10, 1000);

/// 100 slots, 10ms: 1 second lap. Retry backoff and short deadlines.
pub const FINE: WheelConfig = WheelConfig::const_new(100, 10);

/// 60 slots, 1s: one minute lap. Periodic housekeeping.
pub const MINUTE: WheelConfig = WheelConfig::const_new(60, 1000);
