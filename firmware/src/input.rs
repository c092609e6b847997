//! Button and rotary encoder decoding.
//!
//! Pure state machines fed by the input task with pin levels and timestamps,
//! so the decoding rules run unchanged in host tests.

use clock_core::EventBits;
use portable_atomic::{AtomicI32, Ordering};

/// Hold-time thresholds for the push button.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ButtonTiming {
    /// Contacts must stay closed at least this long to count.
    pub debounce_ms: u64,
    pub long_press_ms: u64,
}

impl ButtonTiming {
    pub const fn new() -> Self {
        Self {
            debounce_ms: 30,
            long_press_ms: 800,
        }
    }

    /// Classifies a completed press from its hold time. Bounces yield `None`.
    pub const fn classify(&self, held_ms: u64) -> Option<Press> {
        if held_ms < self.debounce_ms {
            None
        } else if held_ms >= self.long_press_ms {
            Some(Press::Long)
        } else {
            Some(Press::Short)
        }
    }
}

impl Default for ButtonTiming {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Press {
    Short,
    Long,
}

impl Press {
    /// Bus bit raised for this press.
    pub const fn bits(self) -> EventBits {
        match self {
            Self::Short => EventBits::BUTTON_PRESSED,
            Self::Long => EventBits::BUTTON_LONG_PRESSED,
        }
    }
}

/// Quarter-step direction indexed by `previous << 2 | next` Gray code states.
const TRANSITIONS: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

const QUARTERS_PER_DETENT: i8 = 4;

/// Two-channel quadrature decoder that reports whole detents.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QuadratureDecoder {
    state: u8,
    quarters: i8,
}

impl QuadratureDecoder {
    pub fn new(a: bool, b: bool) -> Self {
        Self {
            state: encode(a, b),
            quarters: 0,
        }
    }

    /// Feeds the current pin levels. Returns `1` or `-1` when a detent completes, else `0`.
    pub fn update(&mut self, a: bool, b: bool) -> i32 {
        let next = encode(a, b);
        let step = TRANSITIONS[usize::from((self.state << 2) | next)];
        self.state = next;
        self.quarters += step;

        if self.quarters >= QUARTERS_PER_DETENT {
            self.quarters = 0;
            1
        } else if self.quarters <= -QUARTERS_PER_DETENT {
            self.quarters = 0;
            -1
        } else {
            0
        }
    }
}

fn encode(a: bool, b: bool) -> u8 {
    (u8::from(a) << 1) | u8::from(b)
}

/// Detents accumulated between two reads by the coordinator.
pub struct DetentCounter(AtomicI32);

impl DetentCounter {
    pub const fn new() -> Self {
        Self(AtomicI32::new(0))
    }

    pub fn add(&self, detents: i32) {
        self.0.fetch_add(detents, Ordering::AcqRel);
    }

    pub fn take(&self) -> i32 {
        self.0.swap(0, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut QuadratureDecoder, states: &[(bool, bool)]) -> i32 {
        states.iter().map(|&(a, b)| decoder.update(a, b)).sum()
    }

    #[test]
    fn press_classification_follows_hold_time() {
        let timing = ButtonTiming::new();
        assert_eq!(timing.classify(10), None);
        assert_eq!(timing.classify(30), Some(Press::Short));
        assert_eq!(timing.classify(799), Some(Press::Short));
        assert_eq!(timing.classify(800), Some(Press::Long));
    }

    #[test]
    fn full_gray_cycle_is_one_detent() {
        let mut decoder = QuadratureDecoder::new(false, false);
        let clockwise = [(true, false), (true, true), (false, true), (false, false)];
        assert_eq!(feed(&mut decoder, &clockwise), 1);

        let counter = [(false, true), (true, true), (true, false), (false, false)];
        assert_eq!(feed(&mut decoder, &counter), -1);
    }

    #[test]
    fn contact_bounce_cancels_out() {
        let mut decoder = QuadratureDecoder::new(false, false);
        let bounce = [
            (true, false),
            (false, false),
            (true, false),
            (false, false),
            (true, false),
            (true, true),
            (false, true),
            (false, false),
        ];
        assert_eq!(feed(&mut decoder, &bounce), 1);
    }

    #[test]
    fn skipped_states_are_ignored() {
        let mut decoder = QuadratureDecoder::new(false, false);
        assert_eq!(decoder.update(true, true), 0);
        assert_eq!(decoder.update(false, false), 0);
    }

    #[test]
    fn detent_counter_drains_on_take() {
        let counter = DetentCounter::new();
        counter.add(2);
        counter.add(-1);
        assert_eq!(counter.take(), 1);
        assert_eq!(counter.take(), 0);
    }
}
