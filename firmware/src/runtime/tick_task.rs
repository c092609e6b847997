use embassy_time::{Duration, Ticker};

use super::{DISPATCHER, SCHEDULER};

/// Drives the scheduler at its 1 ms resolution.
#[embassy_executor::task]
pub async fn run() -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(1));
    loop {
        if !SCHEDULER.is_running() {
            SCHEDULER.wait_running().await;
            ticker.reset();
        }
        ticker.next().await;
        SCHEDULER.tick(|task, fires, isr| DISPATCHER.dispatch(task, fires, isr));
    }
}
