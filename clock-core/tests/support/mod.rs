#![allow(dead_code)]

use core::cell::Cell;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use core::time::Duration;
use std::time::Instant;

use clock_core::time::{Delay, MonotonicClock};

/// Manually advanced microsecond clock shared by mocks and the scheduler.
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

    pub fn advance(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap();
        self.now_us.set(self.now_us.get() + micros);
    }
}

impl MonotonicClock for VirtualClock {
    fn now_us(&self) -> u64 {
        self.now_us.get()
    }
}

/// Delay that completes immediately after moving the virtual clock forward.
pub struct VirtualDelay<'c> {
    pub clock: &'c VirtualClock,
    pub calls: u32,
}

impl<'c> VirtualDelay<'c> {
    pub fn new(clock: &'c VirtualClock) -> Self {
        Self { clock, calls: 0 }
    }
}

impl Delay for VirtualDelay<'_> {
    async fn delay(&mut self, duration: Duration) {
        self.calls += 1;
        self.clock.advance(duration);
    }
}

/// Wall-clock deadline polled by `block_on`'s busy loop.
pub struct Deadline(pub Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if Instant::now() >= self.0 {
            Poll::Ready(())
        } else {
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
