//! Power coordinator: the wake/sleep cycle that owns the display and input.
//!
//! Each wake cycle enters, serves input and periodic signals from the event
//! bus one command at a time, and finally computes an aligned sleep deadline,
//! arms the wake sources, pauses the scheduler and suspends. Hardware lives
//! behind [`CoordinatorIo`] so the same loop runs on the MCU, in the host
//! emulator and in tests.

use core::time::Duration;

use crate::bits::EventBits;
use crate::bus::TaskBus;
use crate::scheduler::{DEFAULT_CAPACITY, Repeat, ScheduleError, TaskScheduler};
use crate::tasks::{PeriodicTask, TickDispatcher};
use crate::time::{Delay, LocalTime, MonotonicClock, elapsed_millis};

mod config;
mod policy;
mod screen;

pub use config::{BatteryThresholds, CoordinatorConfig, QuietHours, SignalHours};
pub use policy::{
    BatteryAction, BatteryReading, Command, LoopSnapshot, SleepPlan, assess_battery, plan_sleep,
    resolve,
};
pub use screen::{Countdown, CountdownToggle, ScreenId, ScreenRequest};

/// Why the device left light sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeCause {
    Timer,
    Button,
}

/// Audible cues played through the buzzer collaborator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Tone {
    Rotate,
    Press,
    LongPress,
    Notification,
    LowBattery,
    Alarm,
}

/// Buzzer parameters for a [`Tone`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TonePattern {
    pub duration_ms: u16,
    pub frequency_hz: u16,
    pub repeats: u8,
}

impl Tone {
    #[must_use]
    pub const fn pattern(self) -> TonePattern {
        let (duration_ms, frequency_hz, repeats) = match self {
            Self::Rotate => (75, 2_500, 1),
            Self::Press => (50, 2_000, 1),
            Self::LongPress => (120, 2_000, 1),
            Self::Notification => (100, 2_000, 5),
            Self::LowBattery => (100, 2_000, 10),
            Self::Alarm => (500, 2_500, 20),
        };
        TonePattern {
            duration_ms,
            frequency_hz,
            repeats,
        }
    }
}

/// Indoor climate sample taken at the start of every cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Climate {
    pub temperature_decicelsius: i16,
    pub humidity_percent: u8,
}

/// Everything the render collaborator needs to draw one screen.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub screen: ScreenId,
    pub command: Command,
    pub bits: EventBits,
    pub climate: Option<Climate>,
    pub battery_mv: Option<u16>,
    pub countdown: Countdown,
    pub time: Option<LocalTime>,
}

/// Board services used by the coordinator.
#[allow(async_fn_in_trait)]
pub trait CoordinatorIo: MonotonicClock + Delay {
    /// Draws `frame`. Non-blocking and infallible.
    fn render(&mut self, frame: &Frame);

    fn set_backlight(&mut self, on: bool);

    async fn sample_climate(&mut self) -> Option<Climate>;

    fn battery_millivolts(&mut self) -> u16;

    /// Returns and resets the encoder detents accumulated since the last call.
    fn take_encoder_delta(&mut self) -> i32;

    fn play(&mut self, tone: Tone);

    /// Current local time, `None` while the wall clock is unknown.
    fn local_time(&self) -> Option<LocalTime>;

    /// Whether the user's notification calendar has an entry for `time`.
    fn notification_due(&self, time: LocalTime) -> bool;

    /// Powers down radio activity before suspend.
    fn stop_network(&mut self);

    fn arm_timer_wake(&mut self, after: Duration);

    fn arm_button_wake(&mut self);

    /// Suspends until one of the armed wake sources fires.
    async fn light_sleep(&mut self) -> WakeCause;

    /// Enters the lowest power state. Only returns on host targets.
    fn deep_sleep(&mut self);
}

/// Result of one active-loop iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CycleStatus {
    Continue,
    Exit,
    Shutdown,
}

/// Wake/sleep cycle state machine.
pub struct PowerCoordinator<'a, IO, C, const N: usize = DEFAULT_CAPACITY> {
    bus: TaskBus<'a>,
    scheduler: TaskScheduler<'a, PeriodicTask, C, N>,
    dispatcher: &'a TickDispatcher<'a>,
    io: IO,
    config: CoordinatorConfig,
    screen: Option<ScreenId>,
    next_screen: ScreenId,
    cycle_start_us: u64,
    timeout: Duration,
    backlight: bool,
    climate: Option<Climate>,
    battery_mv: Option<u16>,
    countdown: Countdown,
}

impl<'a, IO, C, const N: usize> PowerCoordinator<'a, IO, C, N>
where
    IO: CoordinatorIo,
    C: MonotonicClock,
{
    #[must_use]
    pub fn new(
        bus: TaskBus<'a>,
        scheduler: TaskScheduler<'a, PeriodicTask, C, N>,
        dispatcher: &'a TickDispatcher<'a>,
        io: IO,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            bus,
            scheduler,
            dispatcher,
            io,
            timeout: config.input_timeout,
            config,
            screen: None,
            next_screen: ScreenId::Main,
            cycle_start_us: 0,
            backlight: false,
            climate: None,
            battery_mv: None,
            countdown: Countdown::new(),
        }
    }

    /// One-time boot wiring: request the first forecast and arm the housekeeping tasks.
    pub async fn boot(&mut self) {
        self.io.set_backlight(false);
        self.bus.set(EventBits::UPDATE_FORECAST);

        let intervals = self.config.intervals;
        self.arm(
            PeriodicTask::CheckBattery,
            intervals.first_battery_check,
            Repeat::Forever,
        )
        .await;
        self.arm(PeriodicTask::UpdateTime, intervals.time_sync, Repeat::Forever)
            .await;
    }

    /// Runs wake cycles until a battery shutdown.
    pub async fn run(&mut self) {
        self.boot().await;
        while self.run_cycle().await != CycleStatus::Shutdown {}
    }

    /// Enters, serves the active loop, then sleeps unless the device shut down.
    pub async fn run_cycle(&mut self) -> CycleStatus {
        self.begin_cycle().await;
        loop {
            match self.poll_once().await {
                CycleStatus::Continue => {}
                CycleStatus::Exit => break,
                CycleStatus::Shutdown => return CycleStatus::Shutdown,
            }
        }
        self.sleep().await;
        CycleStatus::Exit
    }

    /// Records the cycle start and samples the climate sensor.
    pub async fn begin_cycle(&mut self) {
        self.cycle_start_us = self.io.now_us();
        if let Some(climate) = self.io.sample_climate().await {
            self.climate = Some(climate);
        }
        self.bus.set(EventBits::NEW_DATA);
    }

    /// Waits for bus activity and handles at most one command.
    pub async fn poll_once(&mut self) -> CycleStatus {
        let switch_pending = self.screen != Some(self.next_screen);
        if !switch_pending {
            let bus = self.bus;
            let poll = self.config.poll_interval;
            bus.wait(EventBits::ACTIVE_WAKE, self.io.delay(poll)).await;
        }

        let snapshot = LoopSnapshot {
            bits: self.bus.get(),
            switch_pending,
            elapsed_ms: self.elapsed_ms(),
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
        };

        match resolve(snapshot) {
            Some(command) => self.apply(command, snapshot.bits).await,
            None => CycleStatus::Continue,
        }
    }

    /// Computes the aligned sleep length for the current cycle.
    #[must_use]
    pub fn plan_sleep(&self) -> SleepPlan {
        plan_sleep(
            self.config.base_period,
            &self.config.quiet_hours,
            self.elapsed_ms(),
            self.io.local_time(),
        )
    }

    /// Suspends until the next period boundary or a button press.
    pub async fn sleep(&mut self) -> WakeCause {
        if self.backlight {
            self.backlight = false;
            self.io.set_backlight(false);
        }
        self.io.stop_network();

        let plan = self.plan_sleep();
        log_sleep(plan);

        self.io
            .arm_timer_wake(Duration::from_millis(u64::from(plan.duration_ms)));
        self.io.arm_button_wake();
        self.scheduler.pause();

        let cause = self.io.light_sleep().await;

        self.scheduler.resume_after_sleep();
        log_wake(cause);

        match cause {
            WakeCause::Timer => {
                self.timeout = self.config.timer_wake_timeout;
                self.bus.set(EventBits::NEW_MINUTE);
                if !self.bus.get().contains(EventBits::TIMER_RUNNING) {
                    self.next_screen = ScreenId::Main;
                }
            }
            WakeCause::Button => {
                self.timeout = self.config.input_timeout;
            }
        }
        cause
    }

    #[must_use]
    pub fn screen(&self) -> Option<ScreenId> {
        self.screen
    }

    #[must_use]
    pub fn next_screen(&self) -> ScreenId {
        self.next_screen
    }

    #[must_use]
    pub fn backlight(&self) -> bool {
        self.backlight
    }

    #[must_use]
    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    #[must_use]
    pub fn battery_mv(&self) -> Option<u16> {
        self.battery_mv
    }

    #[must_use]
    pub fn io(&self) -> &IO {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut IO {
        &mut self.io
    }

    /// Milliseconds since the cycle started (or the last screen switch).
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        elapsed_millis(self.cycle_start_us, self.io.now_us())
    }

    async fn apply(&mut self, command: Command, bits: EventBits) -> CycleStatus {
        log_command(command);
        self.bus.clear(command.consumed_bits());

        let screen = self.screen.unwrap_or(self.next_screen);
        let mut status = CycleStatus::Continue;
        let mut render = true;

        match command {
            Command::Init => {
                self.screen = Some(self.next_screen);
                self.cycle_start_us = self.io.now_us();
                if self.next_screen == ScreenId::Timer {
                    self.countdown.enter();
                }
            }
            Command::ToggleBacklight => {
                self.io.play(Tone::LongPress);
                self.backlight = !self.backlight;
                self.io.set_backlight(self.backlight);
            }
            Command::Rotate => {
                self.io.play(Tone::Rotate);
                let delta = self.io.take_encoder_delta();
                if delta == 0 {
                    render = false;
                } else {
                    let request = self.on_rotate(screen, delta).await;
                    status = self.follow(request);
                }
            }
            Command::Press => {
                self.io.play(Tone::Press);
                let request = self.on_press(screen, bits).await;
                status = self.follow(request);
            }
            Command::UpdateData => {}
            Command::NewMinute => {
                if screen == ScreenId::Main {
                    self.cycle_start_us = self.io.now_us();
                    self.check_notification(bits);
                }
            }
            Command::TimerMinute => {
                let minutes = self.dispatcher.take_timer_minutes();
                if self.countdown.elapse(minutes) {
                    self.finish_countdown().await;
                }
                render = screen == ScreenId::Timer;
            }
            Command::CheckBattery => match self.check_battery(bits).await {
                BatteryAction::Shutdown => return CycleStatus::Shutdown,
                BatteryAction::EnterLow | BatteryAction::Recover => {}
                BatteryAction::StayLow | BatteryAction::Normal => render = false,
            },
            Command::LowBatteryAlert => {
                self.io.play(Tone::LowBattery);
                render = false;
            }
            Command::IdleExit => status = CycleStatus::Exit,
        }

        if render && self.screen == Some(self.next_screen) {
            let frame = Frame {
                screen: self.next_screen,
                command,
                bits: self.bus.get(),
                climate: self.climate,
                battery_mv: self.battery_mv,
                countdown: self.countdown,
                time: self.io.local_time(),
            };
            self.io.render(&frame);
        }

        status
    }

    fn follow(&mut self, request: ScreenRequest) -> CycleStatus {
        match request {
            ScreenRequest::Stay => CycleStatus::Continue,
            ScreenRequest::Navigate(steps) => {
                self.next_screen = self.next_screen.offset(steps);
                CycleStatus::Continue
            }
            ScreenRequest::Show(screen) => {
                self.next_screen = screen;
                CycleStatus::Continue
            }
            ScreenRequest::Exit => CycleStatus::Exit,
        }
    }

    async fn on_rotate(&mut self, screen: ScreenId, delta: i32) -> ScreenRequest {
        match screen {
            ScreenId::Timer => {
                if self.countdown.adjust(delta) {
                    self.stop_countdown().await;
                }
                if self.countdown.is_exhausted() {
                    ScreenRequest::Show(ScreenId::Main)
                } else {
                    ScreenRequest::Stay
                }
            }
            ScreenId::Settings => {
                self.bus
                    .clear(EventBits::SERVER_RUNNING | EventBits::START_SERVER);
                ScreenRequest::Navigate(delta.signum())
            }
            ScreenId::Main | ScreenId::DeviceInfo | ScreenId::ForecastDetail => {
                ScreenRequest::Navigate(delta.signum())
            }
        }
    }

    async fn on_press(&mut self, screen: ScreenId, bits: EventBits) -> ScreenRequest {
        match screen {
            ScreenId::Timer => match self.countdown.toggle() {
                CountdownToggle::Started => {
                    self.cycle_start_us = self.io.now_us();
                    self.dispatcher.take_timer_minutes();
                    self.bus.set(EventBits::TIMER_RUNNING);
                    let period = self.config.intervals.timer_minute;
                    self.arm(PeriodicTask::TimerMinute, period, Repeat::Forever)
                        .await;
                }
                CountdownToggle::Stopped => self.stop_countdown().await,
                CountdownToggle::Dismissed => {
                    self.next_screen = ScreenId::Main;
                    return ScreenRequest::Exit;
                }
                CountdownToggle::Ignored => {}
            },
            ScreenId::Settings => {
                if bits.contains(EventBits::SERVER_RUNNING) {
                    self.bus
                        .clear(EventBits::SERVER_RUNNING | EventBits::START_SERVER);
                } else {
                    self.bus.set(EventBits::START_SERVER);
                }
            }
            ScreenId::ForecastDetail => {
                self.bus.clear(EventBits::TIME_SYNCED);
                self.bus.set(EventBits::FORCE_UPDATE_FORECAST);
            }
            ScreenId::Main | ScreenId::DeviceInfo => {}
        }
        ScreenRequest::Stay
    }

    async fn stop_countdown(&mut self) {
        self.bus.clear(EventBits::TIMER_RUNNING);
        self.scheduler.cancel(PeriodicTask::TimerMinute).await;
    }

    async fn finish_countdown(&mut self) {
        self.stop_countdown().await;
        self.io.play(Tone::Alarm);
        self.next_screen = ScreenId::Timer;
    }

    fn check_notification(&mut self, bits: EventBits) {
        if !bits.contains(EventBits::TIME_SYNCED | EventBits::NOTIFICATIONS_ENABLED) {
            return;
        }
        let Some(time) = self.io.local_time() else {
            return;
        };
        if self.config.signal_hours.allows(time) && self.io.notification_due(time) {
            self.io.play(Tone::Notification);
        }
    }

    async fn check_battery(&mut self, bits: EventBits) -> BatteryAction {
        let millivolts = self.io.battery_millivolts();
        let synced_time = if bits.contains(EventBits::TIME_SYNCED) {
            self.io.local_time()
        } else {
            None
        };

        let action = assess_battery(
            &self.config.battery,
            &self.config.signal_hours,
            BatteryReading {
                millivolts,
                previous_mv: self.battery_mv,
                low_battery: bits.contains(EventBits::LOW_BATTERY),
                synced_time,
            },
        );
        self.battery_mv = Some(millivolts);
        log_battery(millivolts, action);

        match action {
            BatteryAction::Shutdown => {
                self.backlight = false;
                self.io.set_backlight(false);
                self.io.stop_network();
                self.io.deep_sleep();
            }
            BatteryAction::EnterLow => {
                self.bus.set(EventBits::LOW_BATTERY);
                let period = self.config.intervals.low_battery_alert;
                self.arm(PeriodicTask::LowBatteryAlert, period, Repeat::Forever)
                    .await;
            }
            BatteryAction::Recover => {
                self.bus.clear(EventBits::LOW_BATTERY);
                self.scheduler.cancel(PeriodicTask::LowBatteryAlert).await;
            }
            BatteryAction::StayLow | BatteryAction::Normal => {}
        }
        action
    }

    async fn arm(&self, task: PeriodicTask, delay: Duration, repeat: Repeat) {
        if let Err(err) = self.scheduler.schedule(task, delay, repeat).await {
            log_schedule_failed(task, err);
        }
    }
}

#[cfg(feature = "defmt")]
fn log_command(command: Command) {
    defmt::trace!("coordinator: command {}", command);
}

#[cfg(not(feature = "defmt"))]
fn log_command(_: Command) {}

#[cfg(feature = "defmt")]
fn log_sleep(plan: SleepPlan) {
    defmt::info!(
        "coordinator: light sleep {}ms (quiet={})",
        plan.duration_ms,
        plan.quiet
    );
}

#[cfg(not(feature = "defmt"))]
fn log_sleep(_: SleepPlan) {}

#[cfg(feature = "defmt")]
fn log_wake(cause: WakeCause) {
    defmt::info!("coordinator: woke by {}", cause);
}

#[cfg(not(feature = "defmt"))]
fn log_wake(_: WakeCause) {}

#[cfg(feature = "defmt")]
fn log_battery(millivolts: u16, action: BatteryAction) {
    defmt::info!("coordinator: battery {}mV -> {}", millivolts, action);
}

#[cfg(not(feature = "defmt"))]
fn log_battery(_: u16, _: BatteryAction) {}

#[cfg(feature = "defmt")]
fn log_schedule_failed(task: PeriodicTask, err: ScheduleError) {
    defmt::warn!("coordinator: could not arm {}: {}", task, err);
}

#[cfg(not(feature = "defmt"))]
fn log_schedule_failed(_: PeriodicTask, _: ScheduleError) {}
