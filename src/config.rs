use std::time::Duration;

pub const DEFAULT_SLOT_COUNT: usize = 10;
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// Construction parameters for a [`TimeWheel`](crate::TimeWheel).
///
/// Out-of-range values are coerced to the defaults rather than rejected:
/// a slot count of zero becomes [`DEFAULT_SLOT_COUNT`] and an interval
/// shorter than one millisecond becomes [`DEFAULT_INTERVAL_MS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelConfig {
    slot_count: usize,
    interval_ms: u64,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl WheelConfig {
    pub fn new(slot_count: usize, interval_ms: u64) -> Self {
        Self::const_new(slot_count, interval_ms)
    }

    /// `const` form of [`new`](Self::new), for presets.
    pub const fn const_new(slot_count: usize, interval_ms: u64) -> Self {
        Self {
            slot_count: if slot_count == 0 {
                DEFAULT_SLOT_COUNT
            } else {
                slot_count
            },
            interval_ms: if interval_ms == 0 {
                DEFAULT_INTERVAL_MS
            } else {
                interval_ms
            },
        }
    }

    pub fn with_slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = if slot_count == 0 {
            DEFAULT_SLOT_COUNT
        } else {
            slot_count
        };
        self
    }

    /// Sub-millisecond precision is truncated.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self.interval_ms = if ms == 0 { DEFAULT_INTERVAL_MS } else { ms };
        self
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    #[inline]
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Duration of one full rotation of the ring.
    pub fn span(&self) -> Duration {
        Duration::from_millis(self.interval_ms.saturating_mul(self.slot_count as u64))
    }
}
