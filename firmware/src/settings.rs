//! RAM-backed settings record.
//!
//! Wi-Fi credentials live in the co-processor's own flash once the
//! provisioning portal receives them. This record only tracks the stored bus
//! flags and whether new credentials arrived since the last commit.

use clock_core::EventBits;
use clock_core::network::{PersistError, SettingsStore};
use portable_atomic::{AtomicBool, Ordering};

/// Raised by the modem receiver when the portal reports new credentials.
pub struct CredentialsFlag(AtomicBool);

impl CredentialsFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct SettingsRecord {
    pub flags: EventBits,
    /// Incremented on every effective commit.
    pub revision: u32,
}

pub struct RamSettings<'a> {
    record: SettingsRecord,
    credentials: &'a CredentialsFlag,
}

impl<'a> RamSettings<'a> {
    pub const fn new(flags: EventBits, credentials: &'a CredentialsFlag) -> Self {
        Self {
            record: SettingsRecord { flags, revision: 0 },
            credentials,
        }
    }

    pub const fn record(&self) -> SettingsRecord {
        self.record
    }
}

impl SettingsStore for RamSettings<'_> {
    fn commit(&mut self, dirty_flags: Option<EventBits>) -> Result<bool, PersistError> {
        let mut changed = self.credentials.take();

        if let Some(flags) = dirty_flags {
            let flags = flags & EventBits::STORED_FLAGS;
            if flags != self.record.flags {
                self.record.flags = flags;
                changed = true;
            }
        }

        if changed {
            self.record.revision = self.record.revision.wrapping_add(1);
            log_commit(self.record);
        }
        Ok(changed)
    }
}

#[cfg(target_os = "none")]
fn log_commit(record: SettingsRecord) {
    defmt::info!("settings: committed {}", record);
}

#[cfg(not(target_os = "none"))]
fn log_commit(record: SettingsRecord) {
    println!("settings: committed {record:?}");
}
