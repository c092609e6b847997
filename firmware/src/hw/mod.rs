//! Board adapters binding the clock core to the STM32G0 peripherals.

use core::time::Duration as CoreDuration;

use clock_core::coordinator::{Climate, CoordinatorIo, Frame, Tone, WakeCause};
use clock_core::time::{Delay, LocalTime, MonotonicClock, duration_to_millis};
use embassy_futures::select::{Either, select};
use embassy_stm32::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

use crate::input::DetentCounter;
use crate::wall::WallClock;

pub mod power;

use power::VddMonitor;

pub const TONE_QUEUE_DEPTH: usize = 8;

pub type WakeSignal = Signal<CriticalSectionRawMutex, ()>;
pub type ToneSender = Sender<'static, CriticalSectionRawMutex, Tone, TONE_QUEUE_DEPTH>;

fn to_embassy(duration: CoreDuration) -> Duration {
    Duration::from_millis(u64::from(duration_to_millis(duration)))
}

/// Monotonic time source backed by the embassy time driver.
#[derive(Copy, Clone, Default)]
pub struct BoardClock;

impl MonotonicClock for BoardClock {
    fn now_us(&self) -> u64 {
        Instant::now().as_micros()
    }
}

#[derive(Copy, Clone, Default)]
pub struct BoardDelay;

impl Delay for BoardDelay {
    async fn delay(&mut self, duration: CoreDuration) {
        Timer::after(to_embassy(duration)).await;
    }
}

/// Shared state the board reads from other tasks.
pub struct BoardLinks {
    pub wall: &'static WallClock,
    pub detents: &'static DetentCounter,
    pub tones: ToneSender,
    pub button_wake: &'static WakeSignal,
    pub radio_off: &'static WakeSignal,
}

/// Coordinator collaborators on the reference board.
///
/// The board has no panel or climate sensor: frames are logged over RTT and
/// climate samples are reported as unavailable.
pub struct Board {
    backlight: Output<'static>,
    vdd: VddMonitor<'static>,
    links: BoardLinks,
    wake_at: Option<Instant>,
}

impl Board {
    pub fn new(backlight: Output<'static>, vdd: VddMonitor<'static>, links: BoardLinks) -> Self {
        Self {
            backlight,
            vdd,
            links,
            wake_at: None,
        }
    }
}

impl MonotonicClock for Board {
    fn now_us(&self) -> u64 {
        Instant::now().as_micros()
    }
}

impl Delay for Board {
    async fn delay(&mut self, duration: CoreDuration) {
        Timer::after(to_embassy(duration)).await;
    }
}

impl CoordinatorIo for Board {
    fn render(&mut self, frame: &Frame) {
        defmt::info!(
            "display: {} after {} bits={} battery={}mV countdown={}",
            frame.screen,
            frame.command,
            frame.bits,
            frame.battery_mv,
            frame.countdown.remaining()
        );
    }

    fn set_backlight(&mut self, on: bool) {
        if on {
            self.backlight.set_high();
        } else {
            self.backlight.set_low();
        }
    }

    async fn sample_climate(&mut self) -> Option<Climate> {
        None
    }

    fn battery_millivolts(&mut self) -> u16 {
        self.vdd.read_millivolts()
    }

    fn take_encoder_delta(&mut self) -> i32 {
        self.links.detents.take()
    }

    fn play(&mut self, tone: Tone) {
        if self.links.tones.try_send(tone).is_err() {
            defmt::warn!("board: tone queue full, dropping {}", tone);
        }
    }

    fn local_time(&self) -> Option<LocalTime> {
        self.links.wall.local_time(self.now_us())
    }

    /// Hourly chime.
    fn notification_due(&self, time: LocalTime) -> bool {
        time.minute == 0
    }

    fn stop_network(&mut self) {
        self.links.radio_off.signal(());
    }

    fn arm_timer_wake(&mut self, after: CoreDuration) {
        self.wake_at = Some(Instant::now() + to_embassy(after));
    }

    fn arm_button_wake(&mut self) {
        self.links.button_wake.reset();
    }

    async fn light_sleep(&mut self) -> WakeCause {
        let deadline = self.wake_at.take().unwrap_or_else(Instant::now);
        match select(Timer::at(deadline), self.links.button_wake.wait()).await {
            Either::First(()) => WakeCause::Timer,
            Either::Second(()) => WakeCause::Button,
        }
    }

    fn deep_sleep(&mut self) {
        defmt::error!("board: battery exhausted, halting");
        self.backlight.set_low();
        cortex_m::interrupt::disable();
        loop {
            cortex_m::asm::wfi();
        }
    }
}
