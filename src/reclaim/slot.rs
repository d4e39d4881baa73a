//! Per-thread slots in the manager's table.
//!
//! A slot holds the protocol state another thread may read (observed epoch,
//! pinned and neutralized flags, thread id) together with the bag-list
//! pointers only the owning thread, or an exclusive reclaimer, may touch.
//!
//! # Memory Layout
//!
//! The struct is 64-byte aligned so adjacent slots never share a cache
//! line; a reclaimer scanning the table would otherwise contend with every
//! pinning thread.

use super::bag::{Bag, RetiredObject};
use super::{AtomicEpoch, Epoch};
use crate::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crate::sync::cell::{get_mut_ptr, UnsafeCell};

/// Sentinel thread id for a vacant slot.
pub(crate) const TID_NONE: u64 = 0;

/// The bag-list pointers of one thread.
///
/// `head` is the newest bag and `current` always equals it outside of a
/// reclamation pass; `tail` is the oldest. `next` links run from `head`
/// toward `tail`, epochs non-increasing.
struct BagList {
    head: *mut Bag,
    tail: *mut Bag,
    current: *mut Bag,
}

impl BagList {
    const fn empty() -> Self {
        BagList {
            head: std::ptr::null_mut(),
            tail: std::ptr::null_mut(),
            current: std::ptr::null_mut(),
        }
    }
}

/// One cell of the thread table.
#[repr(align(64))]
pub(crate) struct Slot {
    /// Global epoch captured at the most recent pin, 0 when never pinned.
    pub(crate) observed_epoch: AtomicEpoch,

    /// True while the owner is inside a critical section and has not been
    /// force-unpinned by the neutralization handler.
    pub(crate) pinned: AtomicBool,

    /// Set by the signal handler, cleared on acknowledge or the next pin.
    pub(crate) neutralized: AtomicBool,

    /// OS thread identifier for directed signals, [`TID_NONE`] when vacant.
    pub(crate) thread_id: AtomicU64,

    /// Single-writer bag list. Written by the owning thread during retire,
    /// or by a reclaimer holding the exclusive-reclaimer contract.
    bags: UnsafeCell<BagList>,
}

// SAFETY: All cross-thread state is atomic; the UnsafeCell contents are
// guarded by the single-writer protocol documented on `bags`.
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

impl Slot {
    pub(crate) fn new() -> Self {
        Slot {
            observed_epoch: AtomicEpoch::new(0),
            pinned: AtomicBool::new(false),
            neutralized: AtomicBool::new(false),
            thread_id: AtomicU64::new(TID_NONE),
            bags: UnsafeCell::new(BagList::empty()),
        }
    }

    /// Resets the protocol fields for a fresh claimant.
    pub(crate) fn reset_protocol_state(&self) {
        self.observed_epoch.store(0, Ordering::Relaxed);
        self.pinned.store(false, Ordering::Relaxed);
        self.neutralized.store(false, Ordering::Relaxed);
    }

    /// Appends one retirement stamped with `epoch`, allocating a fresh bag
    /// when the current one is missing, full, or stamped with a different
    /// epoch. A bag is a one-epoch batch: mixing epochs would let a later
    /// pass free a new retirement under an old stamp.
    ///
    /// # Safety
    ///
    /// Only the owning thread may call this, and never concurrently with a
    /// reclamation or drain of this slot.
    pub(crate) unsafe fn push_retired(&self, epoch: Epoch, capacity: usize, object: RetiredObject) {
        // SAFETY: Single writer per the function contract.
        let list = unsafe { &mut *get_mut_ptr(&self.bags) };

        let needs_fresh_bag = if list.current.is_null() {
            true
        } else {
            // SAFETY: current was allocated by this slot and not yet freed;
            // only this call site and the reclaimer ever unlink it, and the
            // contract excludes a concurrent reclaimer.
            let current = unsafe { &*list.current };
            current.is_full() || current.epoch() != epoch
        };

        if needs_fresh_bag {
            let mut fresh = Bag::boxed(epoch, capacity);
            fresh.next = list.current;
            let fresh = Box::into_raw(fresh);
            list.head = fresh;
            list.current = fresh;
            if list.tail.is_null() {
                list.tail = fresh;
            }
        }

        // SAFETY: current is valid and exclusively ours, as above.
        unsafe { (*list.current).push(object) };
    }

    /// Frees every bag with `epoch < threshold`, oldest first, and returns
    /// the number of reclaimed entries. Destructor panics propagate; bags
    /// past the panicking one stay detached and leak rather than double
    /// free.
    ///
    /// Because epochs are non-increasing from head to tail, the reclaimable
    /// bags form a suffix of the list. The suffix is detached before any
    /// destructor runs, so the list stays consistent throughout.
    ///
    /// # Safety
    ///
    /// Caller must hold the exclusive-reclaimer contract: no concurrent
    /// retire, drain, or second reclaimer on this slot. The owning thread
    /// may be pinned, but must not be mutating its list.
    pub(crate) unsafe fn reclaim_below(&self, threshold: Epoch) -> usize {
        // SAFETY: Exclusive list access per the function contract.
        let list = unsafe { &mut *get_mut_ptr(&self.bags) };

        // Walk from the newest bag to the cut point: the last bag that must
        // survive. Everything after it is strictly below the threshold.
        let mut survivor: *mut Bag = std::ptr::null_mut();
        let mut cursor = list.head;
        while !cursor.is_null() {
            // SAFETY: Bags between head and tail are alive until freed below.
            let bag = unsafe { &*cursor };
            if bag.epoch() < threshold {
                break;
            }
            survivor = cursor;
            cursor = bag.next;
        }

        if cursor.is_null() {
            return 0;
        }

        if survivor.is_null() {
            *list = BagList::empty();
        } else {
            // SAFETY: survivor is alive and part of this list.
            unsafe { (*survivor).next = std::ptr::null_mut() };
            list.tail = survivor;
        }

        let mut reclaimed = 0;
        while !cursor.is_null() {
            // SAFETY: cursor was detached above and allocated via Box; each
            // bag is freed exactly once.
            let bag = unsafe { Box::from_raw(cursor) };
            cursor = bag.next;
            reclaimed += unsafe { bag.reclaim() };
        }
        reclaimed
    }

    /// Frees the whole list, swallowing destructor panics. Used at shutdown
    /// and on deregistration. Returns the number of drained entries.
    ///
    /// # Safety
    ///
    /// Same exclusivity contract as [`Slot::reclaim_below`].
    pub(crate) unsafe fn drain_bags(&self) -> usize {
        // SAFETY: Exclusive list access per the function contract.
        let list = unsafe { &mut *get_mut_ptr(&self.bags) };
        let mut cursor = list.head;
        *list = BagList::empty();

        let mut drained = 0;
        while !cursor.is_null() {
            // SAFETY: The list was detached above; each bag frees once.
            let bag = unsafe { Box::from_raw(cursor) };
            cursor = bag.next;
            drained += unsafe { bag.drain() };
        }
        drained
    }

    /// Epochs of the bags in this list, newest first. Test support.
    ///
    /// # Safety
    ///
    /// Same exclusivity contract as [`Slot::reclaim_below`].
    #[cfg(test)]
    pub(crate) unsafe fn bag_epochs(&self) -> Vec<Epoch> {
        let list = unsafe { &*get_mut_ptr(&self.bags) };
        let mut epochs = Vec::new();
        let mut cursor = list.head;
        while !cursor.is_null() {
            let bag = unsafe { &*cursor };
            epochs.push(bag.epoch());
            cursor = bag.next;
        }
        epochs
    }

    /// Reads the externally visible protocol fields.
    pub(crate) fn snapshot(&self) -> SlotStatus {
        SlotStatus {
            observed_epoch: self.observed_epoch.load(Ordering::Acquire),
            pinned: self.pinned.load(Ordering::Acquire),
            neutralized: self.neutralized.load(Ordering::Acquire),
            thread_id: self.thread_id.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of one slot's externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStatus {
    /// Global epoch captured at the slot owner's most recent pin.
    pub observed_epoch: Epoch,
    /// Whether the owner is currently pinned.
    pub pinned: bool,
    /// Whether the neutralization handler fired since the last acknowledge.
    pub neutralized: bool,
    /// OS thread id of the owner, 0 when the slot is vacant.
    pub thread_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};

    static HITS: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_hit(_ptr: *mut u8) {
        HITS.fetch_add(1, StdOrdering::SeqCst);
    }

    fn entry() -> RetiredObject {
        RetiredObject {
            ptr: std::ptr::null_mut(),
            dtor: Some(count_hit),
        }
    }

    #[test]
    fn chained_retires_share_one_epoch() {
        let slot = Slot::new();
        for _ in 0..130 {
            unsafe { slot.push_retired(5, 64, entry()) };
        }
        let epochs = unsafe { slot.bag_epochs() };
        assert_eq!(epochs, vec![5, 5, 5]);
        assert_eq!(unsafe { slot.drain_bags() }, 130);
    }

    #[test]
    fn epoch_change_opens_fresh_bag() {
        let slot = Slot::new();
        unsafe { slot.push_retired(1, 64, entry()) };
        unsafe { slot.push_retired(2, 64, entry()) };
        unsafe { slot.push_retired(2, 64, entry()) };
        let epochs = unsafe { slot.bag_epochs() };
        assert_eq!(epochs, vec![2, 1]);
        assert_eq!(unsafe { slot.drain_bags() }, 3);
    }

    #[test]
    fn capacity_boundary_opens_fresh_bag() {
        let slot = Slot::new();
        for _ in 0..64 {
            unsafe { slot.push_retired(1, 64, entry()) };
        }
        assert_eq!(unsafe { slot.bag_epochs() }.len(), 1);
        unsafe { slot.push_retired(1, 64, entry()) };
        assert_eq!(unsafe { slot.bag_epochs() }, vec![1, 1]);
        unsafe { slot.drain_bags() };
    }

    #[test]
    fn reclaim_stops_at_threshold() {
        let before = HITS.load(StdOrdering::SeqCst);
        let slot = Slot::new();
        for epoch in 1..=3 {
            for _ in 0..epoch {
                unsafe { slot.push_retired(epoch as Epoch, 64, entry()) };
            }
        }
        // Epochs [3, 2, 1] newest first; threshold 2 frees only epoch 1.
        assert_eq!(unsafe { slot.reclaim_below(2) }, 1);
        assert_eq!(HITS.load(StdOrdering::SeqCst), before + 1);
        assert_eq!(unsafe { slot.bag_epochs() }, vec![3, 2]);

        // Threshold above every bag frees the rest and empties the list.
        assert_eq!(unsafe { slot.reclaim_below(10) }, 5);
        assert!(unsafe { slot.bag_epochs() }.is_empty());

        // An empty list reclaims nothing.
        assert_eq!(unsafe { slot.reclaim_below(10) }, 0);
    }

    #[test]
    fn drain_on_empty_list_is_zero() {
        let slot = Slot::new();
        assert_eq!(unsafe { slot.drain_bags() }, 0);
    }
}
