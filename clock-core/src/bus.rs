//! Unified event bit bus shared by interrupt handlers and tasks.
//!
//! The bus stores the logical [`EventBits`] field in two atomic registers.
//! Single-register read-modify-write operations are atomic; composite
//! decisions (read, branch, clear) are not, so consumers treat bits as
//! edge-triggered signals and always re-read after acting.
//!
//! Access goes through two capability handles over the same state:
//! [`TaskBus`] exposes the full API including the blocking [`TaskBus::wait`],
//! while [`IsrBus`] only offers operations that never suspend the caller.

use core::cell::RefCell;
use core::future::{Future, poll_fn};
use core::task::Poll;

use embassy_futures::select::select;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use portable_atomic::{AtomicBool, AtomicU32, Ordering};

use crate::bits::EventBits;

/// Number of tasks that may block on the bus at the same time.
pub const MAX_WAITERS: usize = 4;

type WaiterList = Mutex<CriticalSectionRawMutex, RefCell<MultiWakerRegistration<MAX_WAITERS>>>;

/// Process-wide event bus. Construct once in a `static`.
pub struct EventBus {
    low: AtomicU32,
    high: AtomicU32,
    stored: AtomicU32,
    dirty: AtomicBool,
    waiters: WaiterList,
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            low: AtomicU32::new(0),
            high: AtomicU32::new(0),
            stored: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            waiters: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }

    /// Returns the task-context handle.
    #[must_use]
    pub const fn task(&self) -> TaskBus<'_> {
        TaskBus { bus: self }
    }

    /// Returns the interrupt-context handle.
    #[must_use]
    pub const fn isr(&self) -> IsrBus<'_> {
        IsrBus { bus: self }
    }

    /// Snapshot of both registers merged into one value.
    #[must_use]
    pub fn get(&self) -> EventBits {
        EventBits::from_registers(
            self.low.load(Ordering::Acquire),
            self.high.load(Ordering::Acquire),
        )
    }

    /// Seeds the persisted mirror and the live bits from a loaded settings record.
    ///
    /// Does not mark the mirror dirty.
    pub fn restore_stored(&self, flags: EventBits) {
        let flags = flags & EventBits::STORED_FLAGS;
        self.stored.store(flags.raw(), Ordering::Release);
        self.apply_set(flags);
    }

    /// Returns the persisted mirror if it changed since the last call.
    #[must_use]
    pub fn take_dirty_flags(&self) -> Option<EventBits> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            Some(EventBits::from_raw(self.stored.load(Ordering::Acquire)))
        } else {
            None
        }
    }

    /// Returns the persisted mirror without consuming the dirty mark.
    #[must_use]
    pub fn stored_flags(&self) -> EventBits {
        EventBits::from_raw(self.stored.load(Ordering::Acquire))
    }

    fn set(&self, bits: EventBits) -> EventBits {
        let stored = bits & EventBits::STORED_FLAGS;
        if !stored.is_empty() {
            self.stored.fetch_or(stored.raw(), Ordering::AcqRel);
            self.dirty.store(true, Ordering::Release);
        }

        let previous = self.apply_set(bits);

        if bits.low_register() != 0 {
            self.waiters.lock(|waiters| waiters.borrow_mut().wake());
        }

        previous
    }

    fn apply_set(&self, bits: EventBits) -> EventBits {
        let low = bits.low_register();
        let high = bits.high_register();

        let previous_low = if low != 0 {
            self.low.fetch_or(low, Ordering::AcqRel)
        } else {
            self.low.load(Ordering::Acquire)
        };
        let previous_high = if high != 0 {
            self.high.fetch_or(high, Ordering::AcqRel)
        } else {
            self.high.load(Ordering::Acquire)
        };

        EventBits::from_registers(previous_low, previous_high)
    }

    fn clear(&self, bits: EventBits) -> EventBits {
        let stored = bits & EventBits::STORED_FLAGS;
        if !stored.is_empty() {
            self.stored.fetch_and(!stored.raw(), Ordering::AcqRel);
            self.dirty.store(true, Ordering::Release);
        }

        let low = bits.low_register();
        let high = bits.high_register();

        let previous_low = if low != 0 {
            self.low.fetch_and(!low, Ordering::AcqRel)
        } else {
            self.low.load(Ordering::Acquire)
        };
        let previous_high = if high != 0 {
            self.high.fetch_and(!high, Ordering::AcqRel)
        } else {
            self.high.load(Ordering::Acquire)
        };

        EventBits::from_registers(previous_low, previous_high)
    }

    async fn wait<T: Future>(&self, mask: EventBits, timeout: T) -> EventBits {
        let low = mask.low_register();
        if low == 0 {
            return EventBits::EMPTY;
        }

        let signalled = poll_fn(|cx| {
            if self.low.load(Ordering::Acquire) & low != 0 {
                return Poll::Ready(());
            }

            self.waiters
                .lock(|waiters| waiters.borrow_mut().register(cx.waker()));

            // A setter may have run between the load and the registration.
            if self.low.load(Ordering::Acquire) & low != 0 {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        });

        select(signalled, timeout).await;
        self.get()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Task-context view of the bus.
#[derive(Copy, Clone)]
pub struct TaskBus<'a> {
    bus: &'a EventBus,
}

impl<'a> TaskBus<'a> {
    /// ORs `bits` into the field and returns the value before the update.
    #[allow(clippy::must_use_candidate)]
    pub fn set(&self, bits: EventBits) -> EventBits {
        self.bus.set(bits)
    }

    /// Clears `bits` and returns the value before the update.
    #[allow(clippy::must_use_candidate)]
    pub fn clear(&self, bits: EventBits) -> EventBits {
        self.bus.clear(bits)
    }

    #[must_use]
    pub fn get(&self) -> EventBits {
        self.bus.get()
    }

    /// Blocks until any low-register bit of `mask` is set or `timeout` completes.
    ///
    /// Returns the snapshot observed at wake. Bits are never cleared here.
    /// High-register bits in `mask` do not participate; a mask without any
    /// low-register bit resolves immediately with [`EventBits::EMPTY`].
    pub async fn wait<T: Future>(&self, mask: EventBits, timeout: T) -> EventBits {
        self.bus.wait(mask, timeout).await
    }

    /// Returns the underlying bus.
    #[must_use]
    pub fn bus(&self) -> &'a EventBus {
        self.bus
    }
}

/// Interrupt-context view of the bus. Every operation completes without suspending.
#[derive(Copy, Clone)]
pub struct IsrBus<'a> {
    bus: &'a EventBus,
}

impl IsrBus<'_> {
    #[allow(clippy::must_use_candidate)]
    pub fn set(&self, bits: EventBits) -> EventBits {
        self.bus.set(bits)
    }

    #[allow(clippy::must_use_candidate)]
    pub fn clear(&self, bits: EventBits) -> EventBits {
        self.bus.clear(bits)
    }

    #[must_use]
    pub fn get(&self) -> EventBits {
        self.bus.get()
    }
}
