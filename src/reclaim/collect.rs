//! The reclamation pass.
//!
//! A pass moves through three states: [`ReclaimStart`] loads the epochs,
//! [`EpochsLoaded`] carries the computed safe epoch, and [`SafeCheck`]
//! splits into ready and blocked outcomes. Only the ready state can run
//! destructors, so "reclaim before checking" does not type-check.
//!
//! The safe epoch is the minimum epoch observed by any pinned thread, or
//! the global epoch when nothing is pinned. Every pinned thread has
//! `observed_epoch >= safe`, so no critical section can hold a reference
//! acquired before `safe - 1`; bags stamped strictly below that threshold
//! are free to go.

use super::manager::Manager;
use super::Epoch;
use crate::sync::atomic::Ordering;

/// A reclamation attempt before the epoch scan.
pub struct ReclaimStart<'m> {
    manager: &'m Manager,
}

impl<'m> ReclaimStart<'m> {
    pub(crate) fn new(manager: &'m Manager) -> Self {
        ReclaimStart { manager }
    }

    /// Scans the slot table and computes the safe epoch.
    pub fn load_epochs(self) -> EpochsLoaded<'m> {
        let manager = self.manager;
        let mut safe = manager.current_epoch();
        for index in 0..manager.max_threads() {
            let slot = manager.slot(index);
            // The pin protocol stores the epoch before the flag, both with
            // release; seeing pinned here therefore means the matching
            // epoch is visible.
            if slot.pinned.load(Ordering::Acquire) {
                let observed = slot.observed_epoch.load(Ordering::Acquire);
                if observed < safe {
                    safe = observed;
                }
            }
        }
        EpochsLoaded { manager, safe }
    }
}

/// A reclamation attempt with the safe epoch computed.
pub struct EpochsLoaded<'m> {
    manager: &'m Manager,
    safe: Epoch,
}

impl<'m> EpochsLoaded<'m> {
    /// The minimum epoch observed by any pinned thread at scan time.
    pub fn safe_epoch(&self) -> Epoch {
        self.safe
    }

    /// Decides whether anything can be reclaimed.
    ///
    /// Blocked when the safe epoch is at most 1: the global epoch starts at
    /// 1 and epoch 0 is reserved, so there is no window below it yet.
    pub fn check_safe(self) -> SafeCheck<'m> {
        if self.safe <= 1 {
            SafeCheck::Blocked(ReclaimBlocked {
                manager: self.manager,
            })
        } else {
            SafeCheck::Ready(ReclaimReady {
                manager: self.manager,
                threshold: self.safe - 1,
            })
        }
    }
}

/// Outcome of [`EpochsLoaded::check_safe`].
pub enum SafeCheck<'m> {
    /// Bags below the threshold may be reclaimed.
    Ready(ReclaimReady<'m>),
    /// Nothing can be reclaimed yet. Advance the epoch and retry, run the
    /// neutralizer, or wait.
    Blocked(ReclaimBlocked<'m>),
}

/// A reclamation attempt cleared to run destructors.
pub struct ReclaimReady<'m> {
    manager: &'m Manager,
    threshold: Epoch,
}

impl ReclaimReady<'_> {
    /// Bags stamped strictly below this epoch are reclaimable.
    pub fn threshold(&self) -> Epoch {
        self.threshold
    }

    /// Walks every claimed slot's bag list oldest-first and frees each bag
    /// below the threshold, invoking the entries' destructors. Returns the
    /// number of reclaimed objects.
    ///
    /// A destructor panic propagates to the caller; the affected slot keeps
    /// its surviving bags and the not-yet-freed portion of the detached
    /// suffix leaks.
    ///
    /// # Safety
    ///
    /// The caller must be the only reclaimer, and for the duration of the
    /// call no thread may retire or deregister. Threads may stay pinned;
    /// their lists are walked, not raced: a pinned thread can only write to
    /// a bag at its own observed epoch, which is never below the threshold.
    pub unsafe fn try_reclaim(self) -> usize {
        let manager = self.manager;
        let mask = manager.active_mask();
        let mut reclaimed = 0;
        for index in 0..manager.max_threads() {
            if mask & (1 << index) == 0 {
                continue;
            }
            // SAFETY: The exclusive-reclaimer contract above makes this
            // pass the single writer of every claimed slot's list.
            reclaimed += unsafe { manager.slot(index).reclaim_below(self.threshold) };
        }
        manager.sub_limbo(reclaimed);
        reclaimed
    }
}

/// A reclamation attempt that found nothing safe to free.
pub struct ReclaimBlocked<'m> {
    manager: &'m Manager,
}

impl<'m> ReclaimBlocked<'m> {
    /// Advances the global epoch and restarts the pass.
    ///
    /// Advancing pins nobody; it only shifts the reclamation window.
    pub fn advance_and_retry(self) -> ReclaimStart<'m> {
        self.manager.advance_epoch();
        ReclaimStart::new(self.manager)
    }
}
