//! Local wall clock anchored to the monotonic timer at the last time sync.

use clock_core::time::LocalTime;
use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const SECONDS_PER_WEEK: u64 = 7 * SECONDS_PER_DAY;

/// Broken-down local time as reported by the Wi-Fi co-processor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct WallTime {
    /// 0 is Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub year: u16,
}

impl WallTime {
    /// The co-processor reports the epoch until SNTP has completed.
    pub const fn is_plausible(&self) -> bool {
        self.year >= 2020
    }

    fn seconds_of_week(&self) -> u64 {
        u64::from(self.weekday) * SECONDS_PER_DAY
            + u64::from(self.hour) * 3_600
            + u64::from(self.minute) * 60
            + u64::from(self.second)
    }
}

pub struct WallClock {
    valid: AtomicBool,
    /// Set when the co-processor reports a background SNTP update.
    stale: AtomicBool,
    anchor_us: AtomicU64,
    anchor_week_s: AtomicU32,
}

impl WallClock {
    pub const fn new() -> Self {
        Self {
            valid: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            anchor_us: AtomicU64::new(0),
            anchor_week_s: AtomicU32::new(0),
        }
    }

    /// Anchors `time` to the monotonic instant `now_us`.
    pub fn set(&self, now_us: u64, time: WallTime) {
        let week_s = u32::try_from(time.seconds_of_week()).unwrap_or(0);
        self.valid.store(false, Ordering::Release);
        self.anchor_us.store(now_us, Ordering::Release);
        self.anchor_week_s.store(week_s, Ordering::Release);
        self.valid.store(true, Ordering::Release);
    }

    /// Requests a re-read of the co-processor's clock.
    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn take_stale(&self) -> bool {
        self.stale.swap(false, Ordering::AcqRel)
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Local time at `now_us`, or `None` before the first sync.
    pub fn local_time(&self, now_us: u64) -> Option<LocalTime> {
        if !self.is_valid() {
            return None;
        }

        let anchor_us = self.anchor_us.load(Ordering::Acquire);
        let elapsed_s = now_us.saturating_sub(anchor_us) / 1_000_000;
        let week_s = (u64::from(self.anchor_week_s.load(Ordering::Acquire)) + elapsed_s)
            % SECONDS_PER_WEEK;

        let weekday = u8::try_from(week_s / SECONDS_PER_DAY).ok()?;
        let hour = u8::try_from(week_s % SECONDS_PER_DAY / 3_600).ok()?;
        let minute = u8::try_from(week_s % 3_600 / 60).ok()?;
        Some(LocalTime::new(weekday, hour, minute))
    }
}
