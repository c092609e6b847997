//! Pure decision functions used by the power coordinator.
//!
//! Nothing here touches the bus or the collaborators, which keeps the
//! precedence rules and the sleep arithmetic testable in isolation.

use core::time::Duration;

use super::config::{BatteryThresholds, QuietHours, SignalHours};
use crate::bits::EventBits;
use crate::time::{LocalTime, duration_to_millis};

/// One unit of work resolved per active-loop iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    /// A screen switch is pending; initialise the next screen.
    Init,
    ToggleBacklight,
    Rotate,
    Press,
    UpdateData,
    NewMinute,
    TimerMinute,
    CheckBattery,
    LowBatteryAlert,
    /// Nothing to do for longer than the timeout: refresh and leave.
    IdleExit,
}

impl Command {
    /// Bus bits consumed when the command is handled.
    #[must_use]
    pub const fn consumed_bits(self) -> EventBits {
        match self {
            Self::Init | Self::IdleExit => EventBits::EMPTY,
            Self::ToggleBacklight => EventBits::BUTTON_LONG_PRESSED,
            Self::Rotate => EventBits::ENCODER_ROTATE,
            Self::Press => EventBits::BUTTON_PRESSED,
            Self::UpdateData => EventBits::NEW_DATA,
            Self::NewMinute => EventBits::NEW_MINUTE,
            Self::TimerMinute => EventBits::TIMER_MINUTE,
            Self::CheckBattery => EventBits::CHECK_BATTERY,
            Self::LowBatteryAlert => EventBits::LOW_BATTERY_ALERT,
        }
    }
}

/// Bit-driven commands, highest precedence first.
const PRECEDENCE: [(EventBits, Command); 8] = [
    (EventBits::BUTTON_LONG_PRESSED, Command::ToggleBacklight),
    (EventBits::ENCODER_ROTATE, Command::Rotate),
    (EventBits::BUTTON_PRESSED, Command::Press),
    (EventBits::NEW_DATA, Command::UpdateData),
    (EventBits::NEW_MINUTE, Command::NewMinute),
    (EventBits::TIMER_MINUTE, Command::TimerMinute),
    (EventBits::CHECK_BATTERY, Command::CheckBattery),
    (EventBits::LOW_BATTERY_ALERT, Command::LowBatteryAlert),
];

/// Observations feeding [`resolve`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LoopSnapshot {
    pub bits: EventBits,
    pub switch_pending: bool,
    pub elapsed_ms: u64,
    pub timeout_ms: u64,
}

/// Picks the single highest-precedence command for this iteration.
#[must_use]
pub fn resolve(snapshot: LoopSnapshot) -> Option<Command> {
    let bits = snapshot.bits;

    if snapshot.switch_pending {
        return Some(Command::Init);
    }

    if let Some((_, command)) = PRECEDENCE.iter().find(|(bit, _)| bits.contains(*bit)) {
        return Some(*command);
    }

    if !bits.intersects(EventBits::DENY_SLEEP) && snapshot.elapsed_ms > snapshot.timeout_ms {
        return Some(Command::IdleExit);
    }

    None
}

/// Length of the upcoming light sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepPlan {
    pub duration_ms: u32,
    pub quiet: bool,
}

/// Aligns the next wake to the period boundary: `P - (elapsed mod P)`.
///
/// During quiet hours the period is stretched by the configured multiplier.
#[must_use]
pub fn plan_sleep(
    base_period: Duration,
    quiet_hours: &QuietHours,
    elapsed_ms: u64,
    now: Option<LocalTime>,
) -> SleepPlan {
    let base_ms = u64::from(duration_to_millis(base_period).max(1));
    let quiet = now.is_some_and(|time| quiet_hours.contains(time));
    let period_ms = if quiet {
        base_ms * u64::from(quiet_hours.period_multiplier.max(1))
    } else {
        base_ms
    };

    let duration_ms = period_ms - elapsed_ms % base_ms;
    SleepPlan {
        duration_ms: u32::try_from(duration_ms).unwrap_or(u32::MAX),
        quiet,
    }
}

/// Outcome of one battery check.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BatteryAction {
    /// Supply too weak to continue, or weak during silent hours.
    Shutdown,
    EnterLow,
    StayLow,
    Recover,
    Normal,
}

/// Inputs of the battery policy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BatteryReading {
    pub millivolts: u16,
    pub previous_mv: Option<u16>,
    pub low_battery: bool,
    /// Local time, only when the clock has been synchronised.
    pub synced_time: Option<LocalTime>,
}

#[must_use]
pub fn assess_battery(
    thresholds: &BatteryThresholds,
    signal_hours: &SignalHours,
    reading: BatteryReading,
) -> BatteryAction {
    let recharged = reading.previous_mv.is_some_and(|previous| {
        reading.millivolts > previous.saturating_add(thresholds.recovery_jump_mv)
    });

    if !recharged && reading.millivolts < thresholds.alarm_mv {
        let silent = reading
            .synced_time
            .is_some_and(|time| !signal_hours.allows(time));
        if reading.millivolts < thresholds.critical_mv || silent {
            return BatteryAction::Shutdown;
        }
        return if reading.low_battery {
            BatteryAction::StayLow
        } else {
            BatteryAction::EnterLow
        };
    }

    if reading.low_battery {
        BatteryAction::Recover
    } else {
        BatteryAction::Normal
    }
}
