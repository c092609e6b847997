use embassy_futures::select::select;
use embassy_stm32::exti::ExtiInput;
use embassy_time::Instant;

use clock_core::EventBits;

use super::{BUS, BUTTON_WAKE, DETENTS, DISPATCHER, SCHEDULER};
use crate::input::{ButtonTiming, QuadratureDecoder};

/// Active-low push button on the encoder shaft.
#[embassy_executor::task]
pub async fn run_button(mut button: ExtiInput<'static>) -> ! {
    let timing = ButtonTiming::new();
    loop {
        button.wait_for_falling_edge().await;
        DISPATCHER.on_button_edge(&SCHEDULER.isr());
        BUTTON_WAKE.signal(());

        let pressed_at = Instant::now();
        button.wait_for_rising_edge().await;
        let held_ms = pressed_at.elapsed().as_millis();

        match timing.classify(held_ms) {
            Some(press) => {
                defmt::debug!("input: {} press after {}ms", press, held_ms);
                BUS.task().set(press.bits());
            }
            None => defmt::trace!("input: bounce ignored ({}ms)", held_ms),
        }
    }
}

#[embassy_executor::task]
pub async fn run_encoder(mut a: ExtiInput<'static>, mut b: ExtiInput<'static>) -> ! {
    let mut decoder = QuadratureDecoder::new(a.is_high(), b.is_high());
    loop {
        select(a.wait_for_any_edge(), b.wait_for_any_edge()).await;

        let detents = decoder.update(a.is_high(), b.is_high());
        if detents != 0 {
            DETENTS.add(detents);
            DISPATCHER.on_button_edge(&SCHEDULER.isr());
            BUS.task().set(EventBits::ENCODER_ROTATE);
            BUTTON_WAKE.signal(());
        }
    }
}
