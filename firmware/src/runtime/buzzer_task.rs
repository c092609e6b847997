use embassy_stm32::gpio::Output;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Duration, Instant, Ticker, Timer};

use clock_core::coordinator::{Tone, TonePattern};

use crate::hw::TONE_QUEUE_DEPTH;

/// Bit-bangs tone patterns on a passive piezo.
#[embassy_executor::task]
pub async fn run(
    mut pin: Output<'static>,
    tones: Receiver<'static, CriticalSectionRawMutex, Tone, TONE_QUEUE_DEPTH>,
) -> ! {
    loop {
        let tone = tones.receive().await;
        play(&mut pin, tone.pattern()).await;
    }
}

async fn play(pin: &mut Output<'static>, pattern: TonePattern) {
    let half_period_us = 500_000 / u64::from(pattern.frequency_hz.max(1));
    let length = Duration::from_millis(u64::from(pattern.duration_ms));

    for _ in 0..pattern.repeats {
        let stop_at = Instant::now() + length;
        let mut ticker = Ticker::every(Duration::from_micros(half_period_us));
        while Instant::now() < stop_at {
            pin.toggle();
            ticker.next().await;
        }
        pin.set_low();
        Timer::after(length).await;
    }
}
