use core::time::Duration;

use crate::tasks::TaskIntervals;
use crate::time::LocalTime;

/// Window of local hours during which the sleep period is stretched.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QuietHours {
    /// First hour of the window, inclusive.
    pub start_hour: u8,
    /// Hour at which the window ends, exclusive.
    pub end_hour: u8,
    pub period_multiplier: u32,
}

impl QuietHours {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_hour: 0,
            end_hour: 5,
            period_multiplier: 4,
        }
    }

    /// Returns `true` when `time` falls inside the window. Windows may wrap midnight.
    #[must_use]
    pub const fn contains(&self, time: LocalTime) -> bool {
        if self.start_hour <= self.end_hour {
            time.hour >= self.start_hour && time.hour < self.end_hour
        } else {
            time.hour >= self.start_hour || time.hour < self.end_hour
        }
    }
}

impl Default for QuietHours {
    fn default() -> Self {
        Self::new()
    }
}

/// Hours during which audible signals are allowed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SignalHours {
    pub start_hour: u8,
    pub end_hour: u8,
    pub allow_sunday: bool,
}

impl SignalHours {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            start_hour: 6,
            end_hour: 23,
            allow_sunday: false,
        }
    }

    #[must_use]
    pub const fn allows(&self, time: LocalTime) -> bool {
        (self.allow_sunday || time.weekday != 0)
            && time.hour >= self.start_hour
            && time.hour < self.end_hour
    }
}

impl Default for SignalHours {
    fn default() -> Self {
        Self::new()
    }
}

/// Supply voltage levels driving the low-battery policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryThresholds {
    /// Below this the device enters the low-battery state.
    pub alarm_mv: u16,
    /// Below this the device shuts down regardless of the time of day.
    pub critical_mv: u16,
    /// A rise larger than this between two checks counts as a recharge.
    pub recovery_jump_mv: u16,
}

impl BatteryThresholds {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            alarm_mv: 3_500,
            critical_mv: 3_300,
            recovery_jump_mv: 200,
        }
    }
}

impl Default for BatteryThresholds {
    fn default() -> Self {
        Self::new()
    }
}

/// Tunables for the power coordinator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CoordinatorConfig {
    /// Upper bound of one bus wait in the active loop.
    pub poll_interval: Duration,
    /// Idle time after a button wake before the device goes back to sleep.
    pub input_timeout: Duration,
    /// Idle time after a timer wake.
    pub timer_wake_timeout: Duration,
    /// Wake cadence outside quiet hours.
    pub base_period: Duration,
    pub quiet_hours: QuietHours,
    pub signal_hours: SignalHours,
    pub battery: BatteryThresholds,
    pub intervals: TaskIntervals,
}

impl CoordinatorConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            input_timeout: Duration::from_secs(5),
            timer_wake_timeout: Duration::from_millis(1),
            base_period: Duration::from_secs(60),
            quiet_hours: QuietHours::new(),
            signal_hours: SignalHours::new(),
            battery: BatteryThresholds::new(),
            intervals: TaskIntervals::new(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}
