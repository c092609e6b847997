//! Virtual board: clock, collaborators and the radio, all in one thread.
//!
//! Time only moves when a collaborator delays or sleeps. Every virtual
//! millisecond spent awake is also a scheduler tick, so periodic tasks fire
//! exactly as they would from the 1 ms tick interrupt.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::time::Duration;

use clock_core::coordinator::{Climate, CoordinatorIo, Frame, ScreenId, Tone, WakeCause};
use clock_core::network::{NetError, NetworkTransport, PersistError, SettingsStore};
use clock_core::tasks::TickDispatcher;
use clock_core::time::{Delay, LocalTime, MonotonicClock, duration_to_millis};
use clock_core::{EventBits, EventBus, PeriodicTask, Scheduler};

/// Wall time at virtual zero: Wednesday 11:58.
const START_MINUTE_OF_WEEK: u64 = 3 * MINUTES_PER_DAY + 11 * 60 + 58;
const MINUTES_PER_DAY: u64 = 24 * 60;
const MINUTES_PER_WEEK: u64 = 7 * MINUTES_PER_DAY;
const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Default)]
pub struct VirtualClock {
    now_us: Cell<u64>,
}

impl VirtualClock {
    pub const fn new() -> Self {
        Self {
            now_us: Cell::new(0),
        }
    }

    fn advance_us(&self, micros: u64) {
        self.now_us.set(self.now_us.get().saturating_add(micros));
    }
}

impl MonotonicClock for VirtualClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }
}

/// Category of an emulator output line, used for styling.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputKind {
    Frame,
    Tone,
    Network,
    Power,
    Note,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Output {
    pub kind: OutputKind,
    pub text: String,
}

impl Output {
    pub fn new(kind: OutputKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// State shared by every simulated collaborator.
#[derive(Default)]
pub struct World {
    pub clock: VirtualClock,
    pub bus: EventBus,
    log: RefCell<Vec<Output>>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, kind: OutputKind, text: impl Into<String>) {
        self.log.borrow_mut().push(Output::new(kind, text));
    }

    pub fn drain(&self) -> Vec<Output> {
        self.log.borrow_mut().drain(..).collect()
    }

    /// Local time, known only once the radio has synchronised it.
    pub fn local_time(&self) -> Option<LocalTime> {
        if !self.bus.get().contains(EventBits::TIME_SYNCED) {
            return None;
        }
        let minutes = (START_MINUTE_OF_WEEK + self.clock.now_us() / 60_000_000) % MINUTES_PER_WEEK;
        let weekday = u8::try_from(minutes / MINUTES_PER_DAY).ok()?;
        let hour = u8::try_from(minutes % MINUTES_PER_DAY / 60).ok()?;
        let minute = u8::try_from(minutes % 60).ok()?;
        Some(LocalTime::new(weekday, hour, minute))
    }
}

pub fn format_time(time: Option<LocalTime>) -> String {
    match time {
        Some(time) => format!(
            "{} {:02}:{:02}",
            WEEKDAYS[usize::from(time.weekday % 7)],
            time.hour,
            time.minute
        ),
        None => "--:--".to_string(),
    }
}

pub type SimScheduler<'w> = Scheduler<PeriodicTask, &'w VirtualClock>;

/// Handles to the world plus the scheduler ticking on its clock.
#[derive(Copy, Clone)]
pub struct Rig<'w> {
    pub world: &'w World,
    pub scheduler: &'w SimScheduler<'w>,
    pub dispatcher: &'w TickDispatcher<'w>,
}

impl<'w> Rig<'w> {
    pub fn new(
        world: &'w World,
        scheduler: &'w SimScheduler<'w>,
        dispatcher: &'w TickDispatcher<'w>,
    ) -> Self {
        Self {
            world,
            scheduler,
            dispatcher,
        }
    }

    /// Moves awake time forward one tick at a time.
    pub fn advance(&self, duration: Duration) {
        for _ in 0..duration_to_millis(duration) {
            self.world.clock.advance_us(1_000);
            self.scheduler
                .tick(|task, fires, isr| self.dispatcher.dispatch(task, fires, isr));
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.world.clock.now_us() / 1_000
    }
}

pub fn describe_frame(frame: &Frame) -> String {
    let battery = frame
        .battery_mv
        .map_or_else(|| "?".to_string(), |mv| format!("{mv}mV"));
    let climate = frame.climate.map_or_else(
        || "-".to_string(),
        |climate| {
            format!(
                "{}.{}C {}%",
                climate.temperature_decicelsius / 10,
                climate.temperature_decicelsius.rem_euclid(10),
                climate.humidity_percent
            )
        },
    );
    let mut text = format!(
        "[{}] {:<11} {:<16} battery={battery} climate={climate}",
        format_time(frame.time),
        frame.screen.label(),
        format!("{:?}", frame.command),
    );
    if frame.countdown.is_running() || frame.screen == ScreenId::Timer {
        text.push_str(&format!(" countdown={}m", frame.countdown.remaining()));
        if frame.countdown.is_running() {
            text.push_str(" (running)");
        }
    }
    text
}

/// Board collaborators for the power coordinator.
pub struct SimIo<'w> {
    rig: Rig<'w>,
    pub battery_mv: u16,
    pub encoder: i32,
    pub backlight: bool,
    /// Cause reported by the next light sleep.
    pub wake: WakeCause,
    timer_wake: Option<Duration>,
}

impl<'w> SimIo<'w> {
    pub fn new(rig: Rig<'w>) -> Self {
        Self {
            rig,
            battery_mv: 3_900,
            encoder: 0,
            backlight: false,
            wake: WakeCause::Timer,
            timer_wake: None,
        }
    }

    pub fn timer_wake(&self) -> Option<Duration> {
        self.timer_wake
    }
}

impl MonotonicClock for SimIo<'_> {
    fn now_us(&self) -> u64 {
        self.rig.world.clock.now_us()
    }
}

impl Delay for SimIo<'_> {
    async fn delay(&mut self, duration: Duration) {
        self.rig.advance(duration);
    }
}

impl CoordinatorIo for SimIo<'_> {
    fn render(&mut self, frame: &Frame) {
        self.rig.world.emit(OutputKind::Frame, describe_frame(frame));
    }

    fn set_backlight(&mut self, on: bool) {
        self.backlight = on;
        self.rig
            .world
            .emit(OutputKind::Power, format!("backlight {}", if on { "on" } else { "off" }));
    }

    async fn sample_climate(&mut self) -> Option<Climate> {
        Some(Climate {
            temperature_decicelsius: 215,
            humidity_percent: 41,
        })
    }

    fn battery_millivolts(&mut self) -> u16 {
        self.battery_mv
    }

    fn take_encoder_delta(&mut self) -> i32 {
        std::mem::take(&mut self.encoder)
    }

    fn play(&mut self, tone: Tone) {
        let pattern = tone.pattern();
        self.rig.world.emit(
            OutputKind::Tone,
            format!(
                "tone {tone:?}: {}x {}ms @ {}Hz",
                pattern.repeats, pattern.duration_ms, pattern.frequency_hz
            ),
        );
    }

    fn local_time(&self) -> Option<LocalTime> {
        self.rig.world.local_time()
    }

    fn notification_due(&self, time: LocalTime) -> bool {
        time.minute == 0
    }

    fn stop_network(&mut self) {}

    fn arm_timer_wake(&mut self, after: Duration) {
        self.timer_wake = Some(after);
    }

    fn arm_button_wake(&mut self) {}

    async fn light_sleep(&mut self) -> WakeCause {
        let cause = self.wake;
        let slept = match cause {
            WakeCause::Timer => self.timer_wake.take().unwrap_or_default(),
            WakeCause::Button => Duration::ZERO,
        };
        self.rig
            .world
            .clock
            .advance_us(u64::try_from(slept.as_micros()).unwrap_or(u64::MAX));
        self.rig.world.emit(
            OutputKind::Power,
            format!("slept {}ms, woken by {cause:?}", slept.as_millis()),
        );
        self.wake = WakeCause::Timer;
        cause
    }

    fn deep_sleep(&mut self) {
        self.rig
            .world
            .emit(OutputKind::Power, "deep sleep: battery exhausted");
    }
}

/// Delay used by the network orchestrator.
pub struct SimDelay<'w> {
    rig: Rig<'w>,
}

impl<'w> SimDelay<'w> {
    pub fn new(rig: Rig<'w>) -> Self {
        Self { rig }
    }
}

impl Delay for SimDelay<'_> {
    async fn delay(&mut self, duration: Duration) {
        self.rig.advance(duration);
    }
}

/// Radio that succeeds or times out depending on the `net` setting.
pub struct SimTransport<'w> {
    world: &'w World,
    pub online: bool,
}

impl<'w> SimTransport<'w> {
    pub fn new(world: &'w World) -> Self {
        Self {
            world,
            online: true,
        }
    }

    fn attempt(&self, step: &str) -> Result<(), NetError> {
        if self.online {
            self.world.emit(OutputKind::Network, format!("radio: {step}"));
            Ok(())
        } else {
            self.world
                .emit(OutputKind::Network, format!("radio: {step} timed out"));
            Err(NetError::Timeout)
        }
    }

    fn local(&self, step: &str) -> Result<(), NetError> {
        self.world.emit(OutputKind::Network, format!("radio: {step}"));
        Ok(())
    }
}

impl NetworkTransport for SimTransport<'_> {
    async fn connect_station(&mut self) -> Result<(), NetError> {
        self.attempt("join station")?;
        self.world.bus.task().set(EventBits::STA_CONNECTED);
        Ok(())
    }

    async fn sync_time(&mut self) -> Result<(), NetError> {
        self.attempt("query time")
    }

    async fn start_sntp(&mut self) -> Result<(), NetError> {
        self.local("start sntp")?;
        if self.online {
            self.world.bus.task().set(EventBits::TIME_SYNCED);
        }
        Ok(())
    }

    async fn fetch_forecast(&mut self) -> Result<(), NetError> {
        self.attempt("fetch forecast")
    }

    async fn start_access_point(&mut self) -> Result<(), NetError> {
        self.local("access point up")
    }

    async fn start_config_server(&mut self) -> Result<(), NetError> {
        self.local("portal listening")
    }

    async fn stop_config_server(&mut self) -> Result<(), NetError> {
        self.local("portal closed")
    }

    async fn stop_wifi(&mut self) -> Result<(), NetError> {
        self.world.bus.task().clear(EventBits::STA_CONNECTED);
        Ok(())
    }
}

/// Settings kept in memory, revision bumped on every change.
pub struct SimStore<'w> {
    world: &'w World,
    pub revision: u32,
}

impl<'w> SimStore<'w> {
    pub fn new(world: &'w World) -> Self {
        Self { world, revision: 0 }
    }
}

impl SettingsStore for SimStore<'_> {
    fn commit(&mut self, dirty_flags: Option<EventBits>) -> Result<bool, PersistError> {
        let Some(flags) = dirty_flags else {
            return Ok(false);
        };
        self.revision += 1;
        self.world.emit(
            OutputKind::Network,
            format!("settings: stored flags {flags} as revision {}", self.revision),
        );
        Ok(true)
    }
}
