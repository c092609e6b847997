//! Named event bits for the device state bus.
//!
//! Application code works with one logical 32-bit [`EventBits`] value. The
//! split into two 16-bit hardware-width registers is only visible through
//! [`EventBits::low_register`], [`EventBits::high_register`] and
//! [`EventBits::from_registers`], which the bus uses at the point of contact
//! with its storage.
//!
//! Low-register bits are the blocking, latency-sensitive signals a task may
//! wait on. High-register bits are status and connectivity flags that are only
//! observed through snapshots.

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Width of one underlying register in bits.
pub const REGISTER_WIDTH: u32 = 16;

const REGISTER_MASK: u32 = (1 << REGISTER_WIDTH) - 1;

/// Logical bit field spanning both registers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventBits(u32);

impl EventBits {
    pub const EMPTY: Self = Self(0);

    // Low register: signals that can wake a waiting task.
    pub const ENCODER_ROTATE: Self = Self::bit(0);
    pub const BUTTON_PRESSED: Self = Self::bit(1);
    pub const BUTTON_LONG_PRESSED: Self = Self::bit(2);
    pub const NEW_DATA: Self = Self::bit(3);
    pub const NEW_MINUTE: Self = Self::bit(4);
    pub const TIMER_MINUTE: Self = Self::bit(5);
    pub const CHECK_BATTERY: Self = Self::bit(6);
    pub const UPDATE_FORECAST: Self = Self::bit(7);
    pub const FORCE_UPDATE_FORECAST: Self = Self::bit(8);
    pub const UPDATE_TIME: Self = Self::bit(9);
    pub const START_SERVER: Self = Self::bit(10);
    pub const TIME_SYNCED: Self = Self::bit(11);
    pub const LOW_BATTERY_ALERT: Self = Self::bit(12);

    // High register: observe-only status.
    pub const NOTIFICATIONS_ENABLED: Self = Self::bit(16);
    pub const FORECAST_OK: Self = Self::bit(17);
    pub const STA_CONFIGURED: Self = Self::bit(18);
    pub const AP_ACTIVE: Self = Self::bit(19);
    pub const STA_CONNECTED: Self = Self::bit(20);
    pub const SERVER_RUNNING: Self = Self::bit(21);
    pub const AP_CLIENT: Self = Self::bit(22);
    pub const LOW_BATTERY: Self = Self::bit(23);
    pub const SSID_NOT_FOUND: Self = Self::bit(24);
    pub const TIMER_RUNNING: Self = Self::bit(25);
    pub const WAIT_PROCESS: Self = Self::bit(26);
    pub const WAIT_BUTTON_INPUT: Self = Self::bit(27);
    pub const WAIT_PERIODIC_TASK: Self = Self::bit(28);
    pub const WAIT_SIGNAL: Self = Self::bit(29);

    /// Bits mirrored into the persisted settings record.
    pub const STORED_FLAGS: Self = Self::NOTIFICATIONS_ENABLED;

    /// Any of these keeps the coordinator awake.
    pub const DENY_SLEEP: Self = Self(
        Self::WAIT_PROCESS.0
            | Self::WAIT_BUTTON_INPUT.0
            | Self::WAIT_PERIODIC_TASK.0
            | Self::WAIT_SIGNAL.0,
    );

    /// Debounced input signals.
    pub const INPUT: Self =
        Self(Self::BUTTON_PRESSED.0 | Self::BUTTON_LONG_PRESSED.0 | Self::ENCODER_ROTATE.0);

    /// Requests served by the network orchestrator.
    pub const NETWORK_REQUESTS: Self =
        Self(Self::UPDATE_FORECAST.0 | Self::FORCE_UPDATE_FORECAST.0 | Self::START_SERVER.0);

    /// Signals that wake the coordinator's active loop early.
    pub const ACTIVE_WAKE: Self = Self(
        Self::INPUT.0
            | Self::NEW_DATA.0
            | Self::NEW_MINUTE.0
            | Self::TIMER_MINUTE.0
            | Self::CHECK_BATTERY.0
            | Self::LOW_BATTERY_ALERT.0,
    );

    const fn bit(index: u32) -> Self {
        Self(1 << index)
    }

    /// Builds a value from raw bits.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw logical value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` when every bit in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` when at least one bit in `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Portion stored in the low register.
    #[must_use]
    pub const fn low_register(self) -> u32 {
        self.0 & REGISTER_MASK
    }

    /// Portion stored in the high register, shifted down to register width.
    #[must_use]
    pub const fn high_register(self) -> u32 {
        self.0 >> REGISTER_WIDTH
    }

    /// Reassembles a logical value from both registers.
    #[must_use]
    pub const fn from_registers(low: u32, high: u32) -> Self {
        Self((low & REGISTER_MASK) | ((high & REGISTER_MASK) << REGISTER_WIDTH))
    }
}

impl BitOr for EventBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for EventBits {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EventBits {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitAndAssign for EventBits {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for EventBits {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for EventBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
