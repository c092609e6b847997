//! Time sources shared by the scheduler and the policy loops.
//!
//! The core never reads a hardware clock directly. Firmware and host targets
//! provide a [`MonotonicClock`] for drift compensation and a [`Delay`] for the
//! fixed-duration sleeps between poll iterations.

use core::time::Duration;

/// Monotonic microsecond clock that keeps running while the tick source is paused.
pub trait MonotonicClock {
    /// Microseconds since an arbitrary epoch. Must never go backwards.
    fn now_us(&self) -> u64;
}

impl<T: MonotonicClock + ?Sized> MonotonicClock for &T {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// Cooperative delay provider used by the async loops.
#[allow(async_fn_in_trait)]
pub trait Delay {
    /// Suspends the calling task for `duration`.
    async fn delay(&mut self, duration: Duration);
}

/// Wall-clock fields the policy loops care about.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalTime {
    /// Day of week, 0 == Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
}

impl LocalTime {
    #[must_use]
    pub const fn new(weekday: u8, hour: u8, minute: u8) -> Self {
        Self {
            weekday,
            hour,
            minute,
        }
    }

    /// Minutes elapsed since local midnight.
    #[must_use]
    pub const fn minute_of_day(self) -> u16 {
        self.hour as u16 * 60 + self.minute as u16
    }
}

/// Converts a duration into whole milliseconds, saturating at `u32::MAX`.
#[must_use]
pub fn duration_to_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

/// Milliseconds elapsed between two monotonic readings.
#[must_use]
pub fn elapsed_millis(since_us: u64, now_us: u64) -> u64 {
    now_us.saturating_sub(since_us) / 1_000
}
