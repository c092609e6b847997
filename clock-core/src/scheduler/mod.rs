//! Periodic software-timer scheduler driven by a single tick source.
//!
//! One [`Scheduler`] lives in a `static` for the whole process. The tick
//! source calls [`Scheduler::tick`] once per base period; tasks arm slots
//! through [`TaskScheduler`] and interrupt handlers (including the tick
//! handler itself) through [`IsrScheduler`].
//!
//! The tick gate is paused before light sleep. The first tick after
//! [`TaskScheduler::resume_after_sleep`] advances every slot by the real time
//! spent asleep, so periodic work catches up in one step instead of drifting.

use core::cell::RefCell;
use core::fmt;
use core::future::poll_fn;
use core::task::Poll;
use core::time::Duration;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::waitqueue::AtomicWaker;
use portable_atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::time::{MonotonicClock, duration_to_millis};

mod table;

pub use table::{Fired, SlotTable};

/// Default number of slots.
pub const DEFAULT_CAPACITY: usize = 15;

/// Base tick period of the scheduler.
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

/// How many times a slot fires before it is released.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Repeat {
    /// Fire this many more times. `Times(0)` releases the slot.
    Times(u16),
    Forever,
}

/// Scheduler failures surfaced to callers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScheduleError {
    /// Every slot is occupied by another task.
    CapacityExceeded,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Shared scheduler state.
pub struct Scheduler<K, C, const N: usize = DEFAULT_CAPACITY> {
    table: BlockingMutex<CriticalSectionRawMutex, RefCell<SlotTable<K, N>>>,
    writer: Mutex<CriticalSectionRawMutex, ()>,
    ticking: AtomicBool,
    paused_at_us: AtomicU64,
    next_elapsed_ms: AtomicU32,
    running: AtomicWaker,
    clock: C,
}

impl<K: Copy + Eq, C: MonotonicClock, const N: usize> Scheduler<K, C, N> {
    /// Creates an empty scheduler with the tick gate running.
    #[must_use]
    pub const fn new(clock: C) -> Self {
        Self {
            table: BlockingMutex::new(RefCell::new(SlotTable::new())),
            writer: Mutex::new(()),
            ticking: AtomicBool::new(true),
            paused_at_us: AtomicU64::new(0),
            next_elapsed_ms: AtomicU32::new(1),
            running: AtomicWaker::new(),
            clock,
        }
    }

    /// Returns the task-context handle.
    #[must_use]
    pub const fn task(&self) -> TaskScheduler<'_, K, C, N> {
        TaskScheduler { scheduler: self }
    }

    /// Returns the interrupt-context handle.
    #[must_use]
    pub const fn isr(&self) -> IsrScheduler<'_, K, C, N> {
        IsrScheduler { scheduler: self }
    }

    /// Advances all slots by the pending elapsed delta and dispatches fired tasks.
    ///
    /// Ignored while the gate is paused. `handler` receives each fired task
    /// with its fire count, in table order, after the table lock has been
    /// released, so it may re-arm or cancel slots. Returns the number of slots
    /// that fired.
    #[allow(clippy::must_use_candidate)]
    pub fn tick<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(K, u32, &IsrScheduler<'_, K, C, N>),
    {
        if !self.ticking.load(Ordering::Acquire) {
            return 0;
        }

        let fired = self.table.lock(|table| {
            let elapsed_ms = self.next_elapsed_ms.swap(1, Ordering::AcqRel);
            table.borrow_mut().advance(elapsed_ms)
        });

        let isr = self.isr();
        for entry in &fired {
            handler(entry.task, entry.fires, &isr);
        }

        fired.len()
    }

    /// Returns `true` while the tick gate is open.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.ticking.load(Ordering::Acquire)
    }

    /// Resolves once the tick gate is open. Lets the tick source park while paused.
    pub async fn wait_running(&self) {
        poll_fn(|cx| {
            if self.is_running() {
                return Poll::Ready(());
            }
            self.running.register(cx.waker());
            if self.is_running() {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await;
    }

    /// Milliseconds until `task` fires next, if armed.
    #[must_use]
    pub fn remaining(&self, task: K) -> Option<u32> {
        self.table.lock(|table| table.borrow().remaining(task))
    }

    /// Remaining repeat budget of `task`, if armed.
    #[must_use]
    pub fn repeat(&self, task: K) -> Option<Repeat> {
        self.table.lock(|table| table.borrow().repeat(task))
    }

    #[must_use]
    pub fn is_scheduled(&self, task: K) -> bool {
        self.table.lock(|table| table.borrow().contains(task))
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn active_slots(&self) -> usize {
        self.table.lock(|table| table.borrow().len())
    }

    /// Closes the tick gate. Returns whether it was open.
    fn pause(&self) -> bool {
        let was_running = self.ticking.swap(false, Ordering::AcqRel);
        if was_running {
            self.paused_at_us
                .store(self.clock.now_us(), Ordering::Release);
        }
        was_running
    }

    /// Reopens the gate and adds the time spent paused to the next tick.
    ///
    /// The delta accumulates, so a short writer bracket that lands between a
    /// sleep and the next tick keeps the pending catch-up.
    fn resume(&self) {
        let paused_at = self.paused_at_us.load(Ordering::Acquire);
        let paused_ms = self.clock.now_us().saturating_sub(paused_at) / 1_000;
        let paused_ms = u32::try_from(paused_ms).unwrap_or(u32::MAX);

        // The closure always returns `Some`, so the update cannot fail.
        let _ = self
            .next_elapsed_ms
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |pending| {
                Some(pending.saturating_add(paused_ms))
            });
        if !self.ticking.swap(true, Ordering::AcqRel) {
            self.running.wake();
        }
    }

    /// Milliseconds the next tick will advance beyond its own period: the
    /// pending catch-up plus the time spent paused so far.
    fn backlog_ms(&self) -> u32 {
        let pending = self
            .next_elapsed_ms
            .load(Ordering::Acquire)
            .saturating_sub(1);
        if self.ticking.load(Ordering::Acquire) {
            return pending;
        }
        let paused_at = self.paused_at_us.load(Ordering::Acquire);
        let paused_ms = self.clock.now_us().saturating_sub(paused_at) / 1_000;
        pending.saturating_add(u32::try_from(paused_ms).unwrap_or(u32::MAX))
    }

    /// Inserts under the table lock. A new slot's first period starts now,
    /// not at the last tick.
    fn insert(&self, task: K, delay: Duration, repeat: Repeat) -> Result<(), ScheduleError> {
        let delay_ms = duration_to_millis(delay);
        self.table.lock(|table| {
            let lead_ms = self.backlog_ms();
            table
                .borrow_mut()
                .insert_with_lead(task, delay_ms, lead_ms, repeat)
        })
    }

    fn remove(&self, task: K) -> bool {
        self.table.lock(|table| table.borrow_mut().remove(task))
    }
}

/// Task-context view of the scheduler.
pub struct TaskScheduler<'a, K, C, const N: usize = DEFAULT_CAPACITY> {
    scheduler: &'a Scheduler<K, C, N>,
}

impl<K, C, const N: usize> Clone for TaskScheduler<'_, K, C, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, C, const N: usize> Copy for TaskScheduler<'_, K, C, N> {}

impl<'a, K: Copy + Eq, C: MonotonicClock, const N: usize> TaskScheduler<'a, K, C, N> {
    /// Arms or re-arms `task` to fire after `delay`, repeating per `repeat`.
    ///
    /// Serializes with other task-context writers and brackets the table update
    /// with a pause of the tick gate. The gate is only reopened if it was
    /// running on entry.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::CapacityExceeded`] when `task` holds no slot
    /// and every slot is taken.
    pub async fn schedule(
        &self,
        task: K,
        delay: Duration,
        repeat: Repeat,
    ) -> Result<(), ScheduleError> {
        let _guard = self.scheduler.writer.lock().await;
        let was_running = self.scheduler.pause();
        let result = self.scheduler.insert(task, delay, repeat);
        if was_running {
            self.scheduler.resume();
        }
        result
    }

    /// Releases the slot held by `task`. Cancelling an unknown task is a no-op.
    ///
    /// Bracketed with a pause of the tick gate like [`TaskScheduler::schedule`].
    pub async fn cancel(&self, task: K) -> bool {
        let _guard = self.scheduler.writer.lock().await;
        let was_running = self.scheduler.pause();
        let removed = self.scheduler.remove(task);
        if was_running {
            self.scheduler.resume();
        }
        removed
    }

    /// Closes the tick gate before the device suspends. Returns whether it was open.
    #[allow(clippy::must_use_candidate)]
    pub fn pause(&self) -> bool {
        self.scheduler.pause()
    }

    /// Reopens the tick gate after a suspend.
    ///
    /// The next tick advances every slot by the time elapsed since
    /// [`TaskScheduler::pause`], plus one tick. Writes made before that tick
    /// do not shorten the catch-up.
    pub fn resume_after_sleep(&self) {
        self.scheduler.resume();
    }

    /// Returns the shared scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &'a Scheduler<K, C, N> {
        self.scheduler
    }
}

/// Interrupt-context view of the scheduler. Never suspends.
pub struct IsrScheduler<'a, K, C, const N: usize = DEFAULT_CAPACITY> {
    scheduler: &'a Scheduler<K, C, N>,
}

impl<K, C, const N: usize> Clone for IsrScheduler<'_, K, C, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, C, const N: usize> Copy for IsrScheduler<'_, K, C, N> {}

impl<K: Copy + Eq, C: MonotonicClock, const N: usize> IsrScheduler<'_, K, C, N> {
    /// Arms or re-arms `task` from interrupt context.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::CapacityExceeded`] when `task` holds no slot
    /// and every slot is taken.
    pub fn schedule(&self, task: K, delay: Duration, repeat: Repeat) -> Result<(), ScheduleError> {
        self.scheduler.insert(task, delay, repeat)
    }

    /// Releases the slot held by `task`.
    #[allow(clippy::must_use_candidate)]
    pub fn cancel(&self, task: K) -> bool {
        self.scheduler.remove(task)
    }
}
