//! The manager: slot table, global epoch, active mask, lifecycle.
//!
//! One `Manager` owns everything a group of cooperating threads shares: a
//! fixed table of per-thread slots, the monotonic global epoch, and the
//! bitmask of claimed slots. Threads claim a slot with [`Manager::register`]
//! and interact with the protocol through the returned [`Handle`].
//!
//! # Complexity
//!
//! - `register`: O(slots) scan, one CAS per contended bit
//! - `advance_epoch` / `current_epoch`: O(1)
//! - reclamation and neutralization passes: O(slots)

use std::cell::Cell;

use crossbeam_utils::CachePadded;
use nix::sys::pthread::pthread_self;

use super::collect::ReclaimStart;
use super::guard::Handle;
use super::slot::{Slot, SlotStatus, TID_NONE};
use super::{AtomicEpoch, Epoch, SafeCheck};
use crate::config::{BAG_CAPACITY, EPOCHS_BEFORE_NEUTRALIZE, MASK_BITS, MAX_THREADS};
use crate::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use crate::{Error, Result};

/// Sentinel for "this thread has no slot".
pub(crate) const SLOT_NONE: usize = usize::MAX;

crate::loom_thread_local! {
    /// Index of the slot claimed by the current thread, consulted by the
    /// neutralization handler. [`SLOT_NONE`] while unregistered.
    pub(crate) static SLOT_INDEX: Cell<usize> = Cell::new(SLOT_NONE);
}

/// Construction-time options for a [`Manager`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Upper bound on concurrently registered threads. Sizes the slot
    /// table; must fit the single-word active mask, so at most 64.
    pub max_threads: usize,

    /// Retirements per limbo bag. A trade-off between allocation rate and
    /// reclamation granularity.
    pub bag_capacity: usize,

    /// How many epochs a pinned thread may lag behind the global epoch
    /// before [`Manager::neutralize_stalled`] signals it.
    pub epochs_before_neutralize: u64,

    /// The directed per-thread signal used for neutralization.
    pub signal: nix::sys::signal::Signal,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_threads: MAX_THREADS,
            bag_capacity: BAG_CAPACITY,
            epochs_before_neutralize: EPOCHS_BEFORE_NEUTRALIZE,
            signal: nix::sys::signal::Signal::SIGUSR1,
        }
    }
}

/// Coordinator for epoch-based reclamation across a group of threads.
///
/// The manager is shared by reference: threads register against `&Manager`
/// and the borrow checker keeps every [`Handle`] from outliving it. Dropping
/// the manager drains all remaining limbo bags.
pub struct Manager {
    /// The monotonic global epoch. Starts at 1; epoch 0 means "never
    /// observed" in slot state.
    global_epoch: CachePadded<AtomicEpoch>,

    /// One bit per slot, set while the slot is claimed.
    active_mask: CachePadded<AtomicU64>,

    /// Retired-but-unreclaimed entries across all slots.
    limbo_count: CachePadded<AtomicUsize>,

    slots: Box<[Slot]>,

    config: Config,
}

// SAFETY: Slot state is atomic or protected by the single-writer bag-list
// protocol; the manager itself holds no thread-affine state.
unsafe impl Send for Manager {}
unsafe impl Sync for Manager {}

impl Manager {
    /// Creates a manager with the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` is 0 or exceeds the mask width (64), or if
    /// `bag_capacity` is 0.
    pub fn new(config: Config) -> Self {
        assert!(
            (1..=MASK_BITS).contains(&config.max_threads),
            "max_threads must be in 1..={}",
            MASK_BITS
        );
        assert!(config.bag_capacity >= 1, "bag_capacity must be at least 1");

        let slots = (0..config.max_threads)
            .map(|_| Slot::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Manager {
            global_epoch: CachePadded::new(AtomicEpoch::new(1)),
            active_mask: CachePadded::new(AtomicU64::new(0)),
            limbo_count: CachePadded::new(AtomicUsize::new(0)),
            slots,
            config,
        }
    }

    /// Creates a manager with the default [`Config`].
    pub fn with_defaults() -> Self {
        Manager::new(Config::default())
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of slots in the thread table.
    pub fn max_threads(&self) -> usize {
        self.slots.len()
    }

    /// The current global epoch.
    pub fn current_epoch(&self) -> Epoch {
        self.global_epoch.load(Ordering::Acquire)
    }

    /// Advances the global epoch by one and returns the new value.
    ///
    /// Advancing without pinning anyone is always safe; it only shifts the
    /// reclamation window forward.
    pub fn advance_epoch(&self) -> Epoch {
        self.global_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Claims a slot for the calling thread.
    ///
    /// Scans for a clear bit in the active mask and claims the first one
    /// that a CAS wins. Returns [`Error::RegistrationFull`] with no side
    /// effects when every slot is taken.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread is already registered; the slot index
    /// is thread-local and a thread has at most one.
    pub fn register(&self) -> Result<Handle<'_>> {
        SLOT_INDEX.with(|index| {
            assert_eq!(
                index.get(),
                SLOT_NONE,
                "thread is already registered with a manager"
            );
        });

        let index = self.claim_slot()?;
        let slot = &self.slots[index];
        slot.reset_protocol_state();
        slot.thread_id.store(current_thread_id(), Ordering::Release);
        SLOT_INDEX.with(|cell| cell.set(index));

        Ok(Handle::new(self, index))
    }

    fn claim_slot(&self) -> Result<usize> {
        'slots: for index in 0..self.slots.len() {
            let bit = 1u64 << index;
            let mut observed = self.active_mask.load(Ordering::Acquire);
            loop {
                if observed & bit != 0 {
                    // A racing thread took this bit; move on.
                    continue 'slots;
                }
                match self.active_mask.compare_exchange(
                    observed,
                    observed | bit,
                    Ordering::Release,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ok(index),
                    Err(current) => observed = current,
                }
            }
        }
        Err(Error::RegistrationFull {
            capacity: self.slots.len(),
        })
    }

    /// Starts a reclamation attempt.
    pub fn reclaim_start(&self) -> ReclaimStart<'_> {
        ReclaimStart::new(self)
    }

    /// One-shot reclamation: load epochs, check, reclaim.
    ///
    /// Returns `None` when reclamation is blocked.
    ///
    /// # Safety
    ///
    /// Same contract as [`ReclaimReady::try_reclaim`]: the caller is the
    /// only reclaimer, and no thread is concurrently retiring or
    /// deregistering.
    ///
    /// [`ReclaimReady::try_reclaim`]: super::ReclaimReady::try_reclaim
    pub unsafe fn try_collect(&self) -> Option<usize> {
        match self.reclaim_start().load_epochs().check_safe() {
            SafeCheck::Ready(ready) => Some(unsafe { ready.try_reclaim() }),
            SafeCheck::Blocked(_) => None,
        }
    }

    /// Signals every registered thread pinned at an epoch more than
    /// `epochs_before_neutralize` behind the global epoch.
    ///
    /// Returns the number of signals delivered. The calling thread is never
    /// signalled, and delivery is advisory: a thread blocked in a syscall
    /// executes the handler only once it runs user code again.
    #[cfg(not(all(feature = "loom", loom)))]
    pub fn neutralize_stalled(&self) -> usize {
        super::signal::neutralize_stalled(self)
    }

    /// Snapshot of slot `index`, or `None` when the slot is unclaimed or
    /// out of range.
    pub fn slot_status(&self, index: usize) -> Option<SlotStatus> {
        if index >= self.slots.len() || self.active_mask.load(Ordering::Acquire) & (1 << index) == 0
        {
            return None;
        }
        Some(self.slots[index].snapshot())
    }

    /// Total retired-but-unreclaimed entries across all slots.
    pub fn limbo_len(&self) -> usize {
        self.limbo_count.load(Ordering::Acquire)
    }

    /// The claimed-slot bitmask, bit `i` set while slot `i` is claimed.
    pub fn active_mask(&self) -> u64 {
        self.active_mask.load(Ordering::Acquire)
    }

    /// Drains every slot's remaining limbo bags, swallowing destructor
    /// panics, and clears the table.
    ///
    /// A process that drops the manager without calling this gets the same
    /// drain from `Drop`. Forgetting both leaks retired objects but
    /// corrupts nothing.
    pub fn shutdown(&mut self) {
        for slot in self.slots.iter() {
            // SAFETY: &mut self gives exclusive access to every bag list.
            let drained = unsafe { slot.drain_bags() };
            self.limbo_count.fetch_sub(drained, Ordering::AcqRel);
            slot.thread_id.store(TID_NONE, Ordering::Release);
            slot.reset_protocol_state();
        }
        self.active_mask.store(0, Ordering::Release);
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    pub(crate) fn add_limbo(&self, count: usize) {
        self.limbo_count.fetch_add(count, Ordering::AcqRel);
    }

    pub(crate) fn sub_limbo(&self, count: usize) {
        self.limbo_count.fetch_sub(count, Ordering::AcqRel);
    }

    pub(crate) fn release_slot(&self, index: usize) {
        let slot = &self.slots[index];
        // SAFETY: Called from the owning thread's Handle drop; the owner is
        // the single writer of its list and holds no pin tokens.
        let drained = unsafe { slot.drain_bags() };
        self.sub_limbo(drained);
        slot.thread_id.store(TID_NONE, Ordering::Release);
        SLOT_INDEX.with(|cell| cell.set(SLOT_NONE));
        self.active_mask.fetch_and(!(1u64 << index), Ordering::Release);
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The calling thread's OS-level id, usable as a signal target.
pub(crate) fn current_thread_id() -> u64 {
    pthread_self() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_starts_at_one_and_advances() {
        let manager = Manager::with_defaults();
        assert_eq!(manager.current_epoch(), 1);
        assert_eq!(manager.advance_epoch(), 2);
        assert_eq!(manager.current_epoch(), 2);
    }

    #[test]
    fn fresh_manager_is_empty() {
        let manager = Manager::new(Config {
            max_threads: 4,
            ..Config::default()
        });
        assert_eq!(manager.max_threads(), 4);
        assert_eq!(manager.active_mask(), 0);
        assert_eq!(manager.limbo_len(), 0);
        assert!(manager.slot_status(0).is_none());
        assert!(manager.slot_status(99).is_none());
    }

    #[test]
    #[should_panic(expected = "max_threads")]
    fn zero_threads_rejected() {
        let _ = Manager::new(Config {
            max_threads: 0,
            ..Config::default()
        });
    }

    #[test]
    #[should_panic(expected = "max_threads")]
    fn oversized_table_rejected() {
        let _ = Manager::new(Config {
            max_threads: 65,
            ..Config::default()
        });
    }

    #[test]
    #[should_panic(expected = "bag_capacity")]
    fn zero_capacity_rejected() {
        let _ = Manager::new(Config {
            bag_capacity: 0,
            ..Config::default()
        });
    }

    #[test]
    fn shutdown_after_noop_lifetime() {
        let mut manager = Manager::with_defaults();
        manager.shutdown();
        assert_eq!(manager.limbo_len(), 0);
        assert_eq!(manager.active_mask(), 0);
    }
}
