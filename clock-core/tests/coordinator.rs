mod support;

use core::time::Duration;

use clock_core::coordinator::{
    Climate, Command, CoordinatorConfig, CoordinatorIo, CycleStatus, Frame, PowerCoordinator,
    ScreenId, Tone, WakeCause,
};
use clock_core::tasks::{TaskIntervals, TickDispatcher};
use clock_core::time::{Delay, LocalTime, MonotonicClock};
use clock_core::{EventBits, EventBus, PeriodicTask, Repeat, Scheduler};
use embassy_futures::block_on;
use heapless::Vec;

use support::VirtualClock;

struct MockIo<'c> {
    clock: &'c VirtualClock,
    frames: Vec<Frame, 128>,
    tones: Vec<Tone, 32>,
    backlight: bool,
    battery_mv: u16,
    encoder: i32,
    time: Option<LocalTime>,
    notification_due: bool,
    timer_wake: Option<Duration>,
    button_wake_armed: bool,
    next_wake: WakeCause,
    button_after: Duration,
    network_stops: u32,
    deep_sleeps: u32,
}

impl<'c> MockIo<'c> {
    fn new(clock: &'c VirtualClock) -> Self {
        Self {
            clock,
            frames: Vec::new(),
            tones: Vec::new(),
            backlight: false,
            battery_mv: 3_900,
            encoder: 0,
            time: Some(LocalTime::new(3, 12, 0)),
            notification_due: false,
            timer_wake: None,
            button_wake_armed: false,
            next_wake: WakeCause::Timer,
            button_after: Duration::from_secs(7),
            network_stops: 0,
            deep_sleeps: 0,
        }
    }

    fn last_frame(&self) -> Frame {
        *self.frames.last().expect("nothing rendered")
    }
}

impl MonotonicClock for MockIo<'_> {
    fn now_us(&self) -> u64 {
        self.clock.now_us()
    }
}

impl Delay for MockIo<'_> {
    async fn delay(&mut self, duration: Duration) {
        self.clock.advance(duration);
    }
}

impl CoordinatorIo for MockIo<'_> {
    fn render(&mut self, frame: &Frame) {
        if self.frames.is_full() {
            self.frames.remove(0);
        }
        self.frames.push(*frame).unwrap();
    }

    fn set_backlight(&mut self, on: bool) {
        self.backlight = on;
    }

    async fn sample_climate(&mut self) -> Option<Climate> {
        Some(Climate {
            temperature_decicelsius: 215,
            humidity_percent: 40,
        })
    }

    fn battery_millivolts(&mut self) -> u16 {
        self.battery_mv
    }

    fn take_encoder_delta(&mut self) -> i32 {
        core::mem::take(&mut self.encoder)
    }

    fn play(&mut self, tone: Tone) {
        self.tones.push(tone).unwrap();
    }

    fn local_time(&self) -> Option<LocalTime> {
        self.time
    }

    fn notification_due(&self, _: LocalTime) -> bool {
        self.notification_due
    }

    fn stop_network(&mut self) {
        self.network_stops += 1;
    }

    fn arm_timer_wake(&mut self, after: Duration) {
        self.timer_wake = Some(after);
    }

    fn arm_button_wake(&mut self) {
        self.button_wake_armed = true;
    }

    async fn light_sleep(&mut self) -> WakeCause {
        match self.next_wake {
            WakeCause::Timer => self.clock.advance(self.timer_wake.unwrap()),
            WakeCause::Button => self.clock.advance(self.button_after),
        }
        self.next_wake
    }

    fn deep_sleep(&mut self) {
        self.deep_sleeps += 1;
    }
}

struct Rig {
    clock: VirtualClock,
    bus: EventBus,
}

impl Rig {
    fn new() -> Self {
        Self {
            clock: VirtualClock::new(),
            bus: EventBus::new(),
        }
    }
}

type TestScheduler<'c> = Scheduler<PeriodicTask, &'c VirtualClock>;

fn coordinator<'a>(
    rig: &'a Rig,
    scheduler: &'a TestScheduler<'a>,
    dispatcher: &'a TickDispatcher<'a>,
) -> PowerCoordinator<'a, MockIo<'a>, &'a VirtualClock> {
    PowerCoordinator::new(
        rig.bus.task(),
        scheduler.task(),
        dispatcher,
        MockIo::new(&rig.clock),
        CoordinatorConfig::new(),
    )
}

/// Polls until the current screen is drawn and the entry data consumed.
fn settle(coordinator: &mut PowerCoordinator<'_, MockIo<'_>, &VirtualClock>) {
    for _ in 0..4 {
        block_on(coordinator.poll_once());
    }
}

#[test]
fn boot_requests_forecast_and_arms_housekeeping() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);

    block_on(coordinator.boot());

    assert!(rig.bus.get().contains(EventBits::UPDATE_FORECAST));
    assert_eq!(scheduler.remaining(PeriodicTask::CheckBattery), Some(120_000));
    assert_eq!(
        scheduler.repeat(PeriodicTask::UpdateTime),
        Some(Repeat::Forever)
    );
    assert_eq!(
        scheduler.remaining(PeriodicTask::UpdateTime),
        Some(8 * 60 * 60 * 1_000)
    );
}

#[test]
fn first_cycle_draws_main_then_sleeps_to_the_minute_boundary() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);

    let status = block_on(coordinator.run_cycle());
    assert_eq!(status, CycleStatus::Exit);

    let io = coordinator.io();
    assert_eq!(io.frames[0].command, Command::Init);
    assert_eq!(io.frames[0].screen, ScreenId::Main);
    assert_eq!(io.frames[1].command, Command::UpdateData);
    assert_eq!(io.last_frame().command, Command::IdleExit);

    // Idle exit fires on the first poll past the 5 s input timeout.
    assert_eq!(io.timer_wake, Some(Duration::from_millis(60_000 - 5_100)));
    assert!(io.button_wake_armed);
    assert_eq!(io.network_stops, 1);

    // Timer wake: new minute requested, short timeout, scheduler running again.
    assert!(rig.bus.get().contains(EventBits::NEW_MINUTE));
    assert!(scheduler.is_running());
    assert_eq!(coordinator.next_screen(), ScreenId::Main);
}

#[test]
fn scheduler_is_paused_for_the_whole_sleep() {
    struct ProbeIo<'c> {
        inner: MockIo<'c>,
        scheduler: &'c TestScheduler<'c>,
        running_during_sleep: Option<bool>,
    }

    impl MonotonicClock for ProbeIo<'_> {
        fn now_us(&self) -> u64 {
            self.inner.now_us()
        }
    }

    impl Delay for ProbeIo<'_> {
        async fn delay(&mut self, duration: Duration) {
            self.inner.delay(duration).await;
        }
    }

    impl CoordinatorIo for ProbeIo<'_> {
        fn render(&mut self, frame: &Frame) {
            self.inner.render(frame);
        }
        fn set_backlight(&mut self, on: bool) {
            self.inner.set_backlight(on);
        }
        async fn sample_climate(&mut self) -> Option<Climate> {
            None
        }
        fn battery_millivolts(&mut self) -> u16 {
            self.inner.battery_millivolts()
        }
        fn take_encoder_delta(&mut self) -> i32 {
            self.inner.take_encoder_delta()
        }
        fn play(&mut self, tone: Tone) {
            self.inner.play(tone);
        }
        fn local_time(&self) -> Option<LocalTime> {
            self.inner.local_time()
        }
        fn notification_due(&self, time: LocalTime) -> bool {
            self.inner.notification_due(time)
        }
        fn stop_network(&mut self) {
            self.inner.stop_network();
        }
        fn arm_timer_wake(&mut self, after: Duration) {
            self.inner.arm_timer_wake(after);
        }
        fn arm_button_wake(&mut self) {
            self.inner.arm_button_wake();
        }
        async fn light_sleep(&mut self) -> WakeCause {
            self.running_during_sleep = Some(self.scheduler.is_running());
            self.inner.light_sleep().await
        }
        fn deep_sleep(&mut self) {
            self.inner.deep_sleep();
        }
    }

    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let io = ProbeIo {
        inner: MockIo::new(&rig.clock),
        scheduler: &scheduler,
        running_during_sleep: None,
    };
    let mut coordinator = PowerCoordinator::new(
        rig.bus.task(),
        scheduler.task(),
        &dispatcher,
        io,
        CoordinatorConfig::new(),
    );

    block_on(coordinator.sleep());
    assert_eq!(coordinator.io().running_during_sleep, Some(false));
    assert!(scheduler.is_running());
}

#[test]
fn forty_five_seconds_of_work_sleeps_fifteen() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);

    block_on(coordinator.begin_cycle());
    rig.clock.advance(Duration::from_millis(45_000));

    assert_eq!(coordinator.plan_sleep().duration_ms, 15_000);
}

#[test]
fn quiet_hours_stretch_the_sleep() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    coordinator.io_mut().time = Some(LocalTime::new(4, 2, 30));

    block_on(coordinator.begin_cycle());
    rig.clock.advance(Duration::from_millis(1_000));

    let plan = coordinator.plan_sleep();
    assert!(plan.quiet);
    assert_eq!(plan.duration_ms, 239_000);
}

#[test]
fn rotation_is_coalesced_and_navigates_one_screen() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    coordinator.io_mut().encoder = 3;
    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());

    assert_eq!(coordinator.next_screen(), ScreenId::Timer);
    assert_eq!(coordinator.io().encoder, 0);
    assert!(!rig.bus.get().contains(EventBits::ENCODER_ROTATE));

    block_on(coordinator.poll_once());
    assert_eq!(coordinator.screen(), Some(ScreenId::Timer));
    assert_eq!(coordinator.io().last_frame().command, Command::Init);

    coordinator.io_mut().encoder = -2;
    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());
    assert_eq!(coordinator.next_screen(), ScreenId::Main);
}

#[test]
fn zero_rotation_consumes_the_bit_without_rendering() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);
    let rendered = coordinator.io().frames.len();

    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());

    assert_eq!(coordinator.io().frames.len(), rendered);
    assert!(!rig.bus.get().contains(EventBits::ENCODER_ROTATE));
    assert_eq!(coordinator.next_screen(), ScreenId::Main);
}

#[test]
fn long_press_toggles_the_backlight_and_sleep_turns_it_off() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    rig.bus
        .isr()
        .set(EventBits::BUTTON_LONG_PRESSED | EventBits::BUTTON_PRESSED);
    block_on(coordinator.poll_once());

    assert!(coordinator.io().backlight);
    assert!(coordinator.backlight());
    assert_eq!(coordinator.io().tones.last(), Some(&Tone::LongPress));
    // The short press waits for the next iteration.
    assert!(rig.bus.get().contains(EventBits::BUTTON_PRESSED));

    coordinator.io_mut().next_wake = WakeCause::Button;
    block_on(coordinator.sleep());
    assert!(!coordinator.io().backlight);
}

#[test]
fn timer_screen_countdown_arms_and_expires() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    coordinator.io_mut().encoder = 1;
    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());
    block_on(coordinator.poll_once());
    assert_eq!(coordinator.screen(), Some(ScreenId::Timer));

    coordinator.io_mut().encoder = 1;
    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());
    assert_eq!(coordinator.countdown().remaining(), 2);

    rig.bus.isr().set(EventBits::BUTTON_PRESSED);
    block_on(coordinator.poll_once());
    assert!(coordinator.countdown().is_running());
    assert!(rig.bus.get().contains(EventBits::TIMER_RUNNING));
    assert_eq!(scheduler.remaining(PeriodicTask::TimerMinute), Some(60_000));

    // Two minutes of ticks in one catch-up step.
    scheduler.task().pause();
    rig.clock.advance(Duration::from_secs(120));
    scheduler.task().resume_after_sleep();
    scheduler.tick(|task, fires, isr| dispatcher.dispatch(task, fires, isr));
    assert!(rig.bus.get().contains(EventBits::TIMER_MINUTE));

    block_on(coordinator.poll_once());
    assert!(!coordinator.countdown().is_running());
    assert!(!rig.bus.get().contains(EventBits::TIMER_RUNNING));
    assert!(!scheduler.is_scheduled(PeriodicTask::TimerMinute));
    assert_eq!(coordinator.io().tones.last(), Some(&Tone::Alarm));
}

#[test]
fn timer_wake_keeps_the_timer_screen_while_counting() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    coordinator.io_mut().encoder = 1;
    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());
    block_on(coordinator.poll_once());
    rig.bus.isr().set(EventBits::BUTTON_PRESSED);
    block_on(coordinator.poll_once());

    block_on(coordinator.sleep());
    assert_eq!(coordinator.next_screen(), ScreenId::Timer);
}

#[test]
fn notification_plays_on_a_synced_main_screen_minute() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    coordinator.io_mut().notification_due = true;
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    rig.bus.isr().set(EventBits::NEW_MINUTE);
    block_on(coordinator.poll_once());
    assert!(!coordinator.io().tones.contains(&Tone::Notification));

    rig.bus.task().set(
        EventBits::TIME_SYNCED | EventBits::NOTIFICATIONS_ENABLED | EventBits::NEW_MINUTE,
    );
    block_on(coordinator.poll_once());
    assert_eq!(coordinator.io().tones.last(), Some(&Tone::Notification));
    assert_eq!(coordinator.io().last_frame().command, Command::NewMinute);
}

#[test]
fn low_battery_is_entered_and_left() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    coordinator.io_mut().battery_mv = 3_400;
    rig.bus.isr().set(EventBits::CHECK_BATTERY);
    assert_eq!(block_on(coordinator.poll_once()), CycleStatus::Continue);
    assert!(rig.bus.get().contains(EventBits::LOW_BATTERY));
    assert_eq!(
        scheduler.repeat(PeriodicTask::LowBatteryAlert),
        Some(Repeat::Forever)
    );

    rig.bus.isr().set(EventBits::LOW_BATTERY_ALERT);
    block_on(coordinator.poll_once());
    assert_eq!(coordinator.io().tones.last(), Some(&Tone::LowBattery));

    coordinator.io_mut().battery_mv = 3_800;
    rig.bus.isr().set(EventBits::CHECK_BATTERY);
    block_on(coordinator.poll_once());
    assert!(!rig.bus.get().contains(EventBits::LOW_BATTERY));
    assert!(!scheduler.is_scheduled(PeriodicTask::LowBatteryAlert));
    assert_eq!(coordinator.battery_mv(), Some(3_800));
}

#[test]
fn critical_battery_shuts_down() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    coordinator.io_mut().battery_mv = 3_000;
    rig.bus.isr().set(EventBits::CHECK_BATTERY);

    assert_eq!(block_on(coordinator.poll_once()), CycleStatus::Shutdown);
    assert_eq!(coordinator.io().deep_sleeps, 1);
    assert!(!coordinator.io().backlight);
}

#[test]
fn deny_sleep_bits_hold_the_device_awake() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    rig.bus.task().set(EventBits::WAIT_PROCESS);
    for _ in 0..100 {
        assert_eq!(block_on(coordinator.poll_once()), CycleStatus::Continue);
    }
    assert!(coordinator.elapsed_ms() > 5_000);

    rig.bus.task().clear(EventBits::WAIT_PROCESS);
    assert_eq!(block_on(coordinator.poll_once()), CycleStatus::Exit);
}

#[test]
fn settings_press_requests_the_portal() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    // Each detent burst moves one screen, whatever its size.
    for (delta, expected) in [
        (-3, ScreenId::ForecastDetail),
        (-1, ScreenId::DeviceInfo),
        (-1, ScreenId::Settings),
    ] {
        coordinator.io_mut().encoder = delta;
        rig.bus.isr().set(EventBits::ENCODER_ROTATE);
        block_on(coordinator.poll_once());
        assert_eq!(coordinator.next_screen(), expected);
        block_on(coordinator.poll_once());
        assert_eq!(coordinator.screen(), Some(expected));
    }

    rig.bus.isr().set(EventBits::BUTTON_PRESSED);
    block_on(coordinator.poll_once());
    assert!(rig.bus.get().contains(EventBits::START_SERVER));

    rig.bus.task().set(EventBits::SERVER_RUNNING);
    rig.bus.isr().set(EventBits::BUTTON_PRESSED);
    block_on(coordinator.poll_once());
    assert!(
        !rig.bus
            .get()
            .intersects(EventBits::START_SERVER | EventBits::SERVER_RUNNING)
    );
}

#[test]
fn timer_press_after_a_button_wake_keeps_the_sleep_catch_up() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.boot());
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    coordinator.io_mut().encoder = 1;
    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());
    block_on(coordinator.poll_once());
    assert_eq!(coordinator.screen(), Some(ScreenId::Timer));

    coordinator.io_mut().next_wake = WakeCause::Button;
    coordinator.io_mut().button_after = Duration::from_secs(250);
    assert_eq!(block_on(coordinator.sleep()), WakeCause::Button);

    // The press arms `TimerMinute` before the tick source runs again.
    block_on(coordinator.begin_cycle());
    rig.bus.isr().set(EventBits::BUTTON_PRESSED);
    block_on(coordinator.poll_once());
    assert!(coordinator.countdown().is_running());

    let mut battery_checks = 0;
    let mut timer_minutes = 0;
    scheduler.tick(|task, fires, _| match task {
        PeriodicTask::CheckBattery => battery_checks += fires,
        PeriodicTask::TimerMinute => timer_minutes += fires,
        _ => {}
    });

    assert_eq!(battery_checks, 2);
    assert_eq!(scheduler.remaining(PeriodicTask::CheckBattery), Some(109_999));
    assert_eq!(timer_minutes, 0);
    assert_eq!(scheduler.remaining(PeriodicTask::TimerMinute), Some(59_999));
}

#[test]
fn pressing_the_timer_screen_after_the_alarm_dismisses_it_and_sleeps() {
    let rig = Rig::new();
    let scheduler = TestScheduler::new(&rig.clock);
    let dispatcher = TickDispatcher::new(rig.bus.isr(), TaskIntervals::new());
    let mut coordinator = coordinator(&rig, &scheduler, &dispatcher);
    block_on(coordinator.begin_cycle());
    settle(&mut coordinator);

    coordinator.io_mut().encoder = 1;
    rig.bus.isr().set(EventBits::ENCODER_ROTATE);
    block_on(coordinator.poll_once());
    block_on(coordinator.poll_once());
    rig.bus.isr().set(EventBits::BUTTON_PRESSED);
    block_on(coordinator.poll_once());
    assert!(coordinator.countdown().is_running());

    scheduler.task().pause();
    rig.clock.advance(Duration::from_secs(60));
    scheduler.task().resume_after_sleep();
    scheduler.tick(|task, fires, isr| dispatcher.dispatch(task, fires, isr));
    block_on(coordinator.poll_once());
    assert!(coordinator.countdown().is_expired());
    assert_eq!(coordinator.io().tones.last(), Some(&Tone::Alarm));

    rig.bus.isr().set(EventBits::BUTTON_PRESSED);
    assert_eq!(block_on(coordinator.poll_once()), CycleStatus::Exit);
    assert!(!coordinator.countdown().is_expired());
    assert_eq!(coordinator.next_screen(), ScreenId::Main);
    assert!(!rig.bus.get().contains(EventBits::BUTTON_PRESSED));
}
