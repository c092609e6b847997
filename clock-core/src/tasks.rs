//! Catalog of the periodic callbacks the device arms on the scheduler.
//!
//! Every slot key is a [`PeriodicTask`]. The tick source hands each fired
//! slot to [`TickDispatcher::dispatch`], which runs in tick context and may
//! only touch the bus and scheduler through their interrupt-safe handles.

use core::time::Duration;

use portable_atomic::{AtomicU32, Ordering};

use crate::bits::EventBits;
use crate::bus::IsrBus;
use crate::scheduler::{IsrScheduler, Repeat};
use crate::time::MonotonicClock;

/// Identity of a periodic callback.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PeriodicTask {
    UpdateForecast,
    UpdateTime,
    CheckBattery,
    TimerMinute,
    LowBatteryAlert,
    EndButtonInput,
}

impl PeriodicTask {
    pub const ALL: [Self; 6] = [
        Self::UpdateForecast,
        Self::UpdateTime,
        Self::CheckBattery,
        Self::TimerMinute,
        Self::LowBatteryAlert,
        Self::EndButtonInput,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::UpdateForecast => "update-forecast",
            Self::UpdateTime => "update-time",
            Self::CheckBattery => "check-battery",
            Self::TimerMinute => "timer-minute",
            Self::LowBatteryAlert => "low-battery-alert",
            Self::EndButtonInput => "end-button-input",
        }
    }
}

impl core::fmt::Display for PeriodicTask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// Periods used when arming the catalog.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TaskIntervals {
    /// Steady forecast refresh cadence after a successful fetch.
    pub forecast_refresh: Duration,
    pub time_sync: Duration,
    /// Delay before the first battery check after boot.
    pub first_battery_check: Duration,
    pub battery_check: Duration,
    pub low_battery_alert: Duration,
    /// Window during which a button edge keeps the device awake.
    pub button_input_window: Duration,
    pub timer_minute: Duration,
}

impl TaskIntervals {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            forecast_refresh: Duration::from_secs(32 * 60),
            time_sync: Duration::from_secs(8 * 60 * 60),
            first_battery_check: Duration::from_secs(2 * 60),
            battery_check: Duration::from_secs(10 * 60),
            low_battery_alert: Duration::from_secs(10 * 60),
            button_input_window: Duration::from_secs(4),
            timer_minute: Duration::from_secs(60),
        }
    }
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick-context handler for every [`PeriodicTask`].
pub struct TickDispatcher<'a> {
    bus: IsrBus<'a>,
    intervals: TaskIntervals,
    timer_minutes: AtomicU32,
}

impl<'a> TickDispatcher<'a> {
    #[must_use]
    pub const fn new(bus: IsrBus<'a>, intervals: TaskIntervals) -> Self {
        Self {
            bus,
            intervals,
            timer_minutes: AtomicU32::new(0),
        }
    }

    /// Runs the action for one fired slot.
    pub fn dispatch<C: MonotonicClock, const N: usize>(
        &self,
        task: PeriodicTask,
        fires: u32,
        scheduler: &IsrScheduler<'_, PeriodicTask, C, N>,
    ) {
        match task {
            PeriodicTask::UpdateForecast => {
                self.bus.set(EventBits::UPDATE_FORECAST);
            }
            PeriodicTask::UpdateTime => {
                self.bus.set(EventBits::UPDATE_TIME);
            }
            PeriodicTask::CheckBattery => {
                self.bus.set(EventBits::CHECK_BATTERY);
                if let Err(err) = scheduler.schedule(
                    PeriodicTask::CheckBattery,
                    self.intervals.battery_check,
                    Repeat::Times(1),
                ) {
                    log_rearm_failed(task, err);
                }
            }
            PeriodicTask::TimerMinute => {
                self.timer_minutes.fetch_add(fires, Ordering::AcqRel);
                self.bus.set(EventBits::TIMER_MINUTE);
            }
            PeriodicTask::LowBatteryAlert => {
                self.bus.set(EventBits::LOW_BATTERY_ALERT);
            }
            PeriodicTask::EndButtonInput => {
                self.bus.clear(EventBits::WAIT_BUTTON_INPUT);
            }
        }
    }

    /// Returns and resets the countdown minutes accumulated since the last call.
    #[allow(clippy::must_use_candidate)]
    pub fn take_timer_minutes(&self) -> u32 {
        self.timer_minutes.swap(0, Ordering::AcqRel)
    }

    #[must_use]
    pub const fn intervals(&self) -> &TaskIntervals {
        &self.intervals
    }

    /// Button GPIO edge: keep the device awake for the input window.
    pub fn on_button_edge<C: MonotonicClock, const N: usize>(
        &self,
        scheduler: &IsrScheduler<'_, PeriodicTask, C, N>,
    ) {
        self.bus.set(EventBits::WAIT_BUTTON_INPUT);
        if let Err(err) = scheduler.schedule(
            PeriodicTask::EndButtonInput,
            self.intervals.button_input_window,
            Repeat::Times(1),
        ) {
            log_rearm_failed(PeriodicTask::EndButtonInput, err);
        }
    }
}

#[cfg(feature = "defmt")]
fn log_rearm_failed(task: PeriodicTask, err: crate::scheduler::ScheduleError) {
    defmt::warn!("scheduler: failed to arm {} ({})", task, err);
}

#[cfg(not(feature = "defmt"))]
fn log_rearm_failed(_: PeriodicTask, _: crate::scheduler::ScheduleError) {}
