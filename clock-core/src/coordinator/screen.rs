//! Screen identities, navigation and the countdown timer model.

/// Screens in navigation order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScreenId {
    Main,
    Timer,
    Settings,
    DeviceInfo,
    ForecastDetail,
}

impl ScreenId {
    pub const ALL: [Self; 5] = [
        Self::Main,
        Self::Timer,
        Self::Settings,
        Self::DeviceInfo,
        Self::ForecastDetail,
    ];

    pub const COUNT: usize = Self::ALL.len();

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Main => 0,
            Self::Timer => 1,
            Self::Settings => 2,
            Self::DeviceInfo => 3,
            Self::ForecastDetail => 4,
        }
    }

    /// Moves `steps` screens forward (or backward when negative), wrapping around.
    #[must_use]
    pub fn offset(self, steps: i32) -> Self {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let count = Self::COUNT as i32;
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let current = self.index() as i32;
        #[allow(clippy::cast_sign_loss)]
        let next = (current + steps % count).rem_euclid(count) as usize;
        Self::ALL[next]
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Timer => "timer",
            Self::Settings => "settings",
            Self::DeviceInfo => "device-info",
            Self::ForecastDetail => "forecast",
        }
    }
}

impl core::fmt::Display for ScreenId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// What a screen asks the coordinator to do after handling a command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScreenRequest {
    Stay,
    /// Move relative to the current screen.
    Navigate(i32),
    Show(ScreenId),
    /// End the active loop and go to sleep.
    Exit,
}

/// Countdown timer driven by the `TimerMinute` periodic task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Countdown {
    setpoint: i32,
    remaining: u32,
    running: bool,
}

/// Result of a press on the timer screen.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CountdownToggle {
    Started,
    Stopped,
    /// The alarm of an expired countdown was acknowledged.
    Dismissed,
    Ignored,
}

impl Countdown {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            setpoint: 1,
            remaining: 1,
            running: false,
        }
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Minutes left on the countdown (or the configured length while stopped).
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub const fn setpoint(&self) -> i32 {
        self.setpoint
    }

    /// Expired and not yet acknowledged.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        !self.running && self.remaining == 0 && self.setpoint > 0
    }

    /// Entering the timer screen resets a stopped countdown to one minute.
    /// An expired countdown is kept until its alarm is dismissed.
    pub fn enter(&mut self) {
        if !self.running && !self.is_expired() {
            *self = Self::new();
        }
    }

    /// Applies an encoder delta. Returns `true` when the countdown was running
    /// and has been stopped by the adjustment.
    pub fn adjust(&mut self, delta: i32) -> bool {
        let was_running = self.running;
        self.running = false;

        let base = i32::try_from(self.remaining).unwrap_or(i32::MAX);
        self.setpoint = base.saturating_add(delta);
        self.remaining = u32::try_from(self.setpoint.max(0)).unwrap_or(0);
        was_running
    }

    /// A non-positive setpoint means the user dialled the timer away.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.setpoint <= 0
    }

    pub fn toggle(&mut self) -> CountdownToggle {
        if self.setpoint <= 0 {
            return CountdownToggle::Ignored;
        }

        if self.is_expired() {
            self.remaining = u32::try_from(self.setpoint).unwrap_or(0);
            return CountdownToggle::Dismissed;
        }

        if self.running {
            self.running = false;
            CountdownToggle::Stopped
        } else {
            self.running = true;
            self.remaining = u32::try_from(self.setpoint).unwrap_or(0);
            CountdownToggle::Started
        }
    }

    /// Counts down `minutes`. Returns `true` when the countdown just expired.
    pub fn elapse(&mut self, minutes: u32) -> bool {
        if !self.running || minutes == 0 {
            return false;
        }

        self.remaining = self.remaining.saturating_sub(minutes);
        if self.remaining == 0 {
            self.running = false;
            return true;
        }
        false
    }
}

impl Default for Countdown {
    fn default() -> Self {
        Self::new()
    }
}
