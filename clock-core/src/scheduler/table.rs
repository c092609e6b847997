//! Fixed-capacity slot table backing the periodic scheduler.
//!
//! The table is plain data: it has no notion of locking or of the tick source.
//! [`SlotTable::advance`] computes fire counts arithmetically so a single
//! catch-up step after a long sleep costs the same as a regular tick.

use heapless::Vec;

use super::{Repeat, ScheduleError};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Slot<K> {
    task: K,
    initial_ms: u32,
    remaining_ms: u32,
    repeat: Repeat,
}

/// Task that fired during an [`SlotTable::advance`] call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Fired<K> {
    pub task: K,
    /// Number of periods that elapsed for this slot in one advance.
    pub fires: u32,
}

/// Slot storage keyed by task identity, at most one slot per key.
pub struct SlotTable<K, const N: usize> {
    slots: [Option<Slot<K>>; N],
}

impl<K: Copy + Eq, const N: usize> SlotTable<K, N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; N],
        }
    }

    /// Arms `task`, re-using its existing slot when one is active.
    ///
    /// A zero delay is clamped to one tick. `Repeat::Times(0)` removes the task.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::CapacityExceeded`] when `task` holds no slot
    /// and every slot is taken.
    pub fn insert(&mut self, task: K, delay_ms: u32, repeat: Repeat) -> Result<(), ScheduleError> {
        self.insert_with_lead(task, delay_ms, 0, repeat)
    }

    /// Like [`SlotTable::insert`], but the first period is `lead_ms` longer.
    ///
    /// Used for slots armed while an advance is still pending, so that advance
    /// does not eat into their first period.
    ///
    /// # Errors
    ///
    /// Same as [`SlotTable::insert`].
    pub fn insert_with_lead(
        &mut self,
        task: K,
        delay_ms: u32,
        lead_ms: u32,
        repeat: Repeat,
    ) -> Result<(), ScheduleError> {
        if repeat == Repeat::Times(0) {
            self.remove(task);
            return Ok(());
        }

        let delay_ms = delay_ms.max(1);
        let slot = Slot {
            task,
            initial_ms: delay_ms,
            remaining_ms: delay_ms.saturating_add(lead_ms),
            repeat,
        };

        if let Some(existing) = self.find_mut(task) {
            *existing = slot;
            return Ok(());
        }

        match self.slots.iter_mut().find(|entry| entry.is_none()) {
            Some(free) => {
                *free = Some(slot);
                Ok(())
            }
            None => Err(ScheduleError::CapacityExceeded),
        }
    }

    /// Frees the slot held by `task`. Returns `true` when a slot was released.
    pub fn remove(&mut self, task: K) -> bool {
        for entry in &mut self.slots {
            if entry.as_ref().is_some_and(|slot| slot.task == task) {
                *entry = None;
                return true;
            }
        }
        false
    }

    /// Advances every slot by `elapsed_ms` and returns the fired tasks in table order.
    pub fn advance(&mut self, elapsed_ms: u32) -> Vec<Fired<K>, N> {
        let mut fired = Vec::new();
        if elapsed_ms == 0 {
            return fired;
        }

        for entry in &mut self.slots {
            let Some(slot) = entry.as_mut() else {
                continue;
            };

            if elapsed_ms < slot.remaining_ms {
                slot.remaining_ms -= elapsed_ms;
                continue;
            }

            let overshoot = elapsed_ms - slot.remaining_ms;
            let periods = 1 + overshoot / slot.initial_ms;
            let fires = match slot.repeat {
                Repeat::Forever => periods,
                Repeat::Times(left) => {
                    let fires = periods.min(u32::from(left));
                    let left = u16::try_from(u32::from(left) - fires).unwrap_or(0);
                    slot.repeat = Repeat::Times(left);
                    fires
                }
            };
            slot.remaining_ms = slot.initial_ms - overshoot % slot.initial_ms;

            let task = slot.task;
            if slot.repeat == Repeat::Times(0) {
                *entry = None;
            }

            // Capacity of `fired` equals the table size, one entry per slot.
            let _ = fired.push(Fired { task, fires });
        }

        fired
    }

    /// Milliseconds until `task` next fires, if it is armed.
    #[must_use]
    pub fn remaining(&self, task: K) -> Option<u32> {
        self.find(task).map(|slot| slot.remaining_ms)
    }

    /// Repeat budget left for `task`, if it is armed.
    #[must_use]
    pub fn repeat(&self, task: K) -> Option<Repeat> {
        self.find(task).map(|slot| slot.repeat)
    }

    #[must_use]
    pub fn contains(&self, task: K) -> bool {
        self.find(task).is_some()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|entry| entry.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    fn find(&self, task: K) -> Option<&Slot<K>> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.task == task)
    }

    fn find_mut(&mut self, task: K) -> Option<&mut Slot<K>> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.task == task)
    }
}

impl<K: Copy + Eq, const N: usize> Default for SlotTable<K, N> {
    fn default() -> Self {
        Self::new()
    }
}
