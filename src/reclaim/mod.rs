//! Distributed Epoch-Based Reclamation with Neutralization
//!
//! This module implements the core reclamation protocol.
//!
//! # Algorithm Overview
//!
//! ```text
//! 1. Each thread claims a slot in the manager's fixed table
//! 2. To access shared data, a thread pins itself, publishing the global
//!    epoch it observed into its slot
//! 3. Unlinked objects are retired into the thread's current limbo bag,
//!    stamped with the pinned epoch
//! 4. A reclaimer computes the minimum epoch observed by any pinned thread
//!    and frees every bag strictly older than that minimum, minus one
//! 5. A thread that stays pinned while the global epoch moves on is sent a
//!    directed signal; the handler force-unpins it from its own context so
//!    the next reclamation pass makes progress
//! ```
//!
//! # Safety Invariants
//!
//! 1. A destructor never runs for an object retired at an epoch greater
//!    than or equal to the safe epoch of the pass that frees it
//! 2. A bag's epoch never exceeds the global epoch and never changes after
//!    the bag is created
//! 3. Each thread's bag list is ordered newest to oldest, epochs
//!    non-increasing from head to tail
//! 4. The bag list of a slot has a single writer at any moment: the owning
//!    thread, or a reclaimer holding the exclusive-reclaimer contract

mod bag;
mod collect;
mod guard;
mod manager;
#[cfg(not(all(feature = "loom", loom)))]
mod signal;
mod slot;

pub use collect::{EpochsLoaded, ReclaimBlocked, ReclaimReady, ReclaimStart, SafeCheck};
pub use guard::{Handle, Neutralized, Pinned, Retired, RetireReady, UnpinResult, Unpinned};
pub use manager::{Config, Manager};
#[cfg(not(all(feature = "loom", loom)))]
pub use signal::{clear_process_manager, install_signal_handler, set_process_manager};
pub use slot::SlotStatus;

use crate::sync::atomic::AtomicU64;

/// Global epoch counter type.
///
/// Epoch 0 is reserved for "never observed"; the global counter starts at 1.
pub type Epoch = u64;

/// Atomic epoch for lock-free operations.
pub type AtomicEpoch = AtomicU64;

/// Destructor invoked when a retired object is reclaimed.
///
/// Receives the pointer passed to `retire` and must release the object.
pub type Destructor = unsafe fn(*mut u8);

/// Returns a destructor that reconstructs and drops a `Box<T>`.
///
/// Convenience for the common case of retiring a `Box::into_raw` pointer.
pub fn boxed_destructor<T>() -> Destructor {
    unsafe fn destroy<T>(ptr: *mut u8) {
        // SAFETY: The retire caller guarantees ptr came from Box::into_raw
        // of a T and that this runs at most once.
        unsafe {
            drop(Box::from_raw(ptr.cast::<T>()));
        }
    }
    destroy::<T>
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DROPS: AtomicUsize = AtomicUsize::new(0);

    struct Tracked;

    impl Drop for Tracked {
        fn drop(&mut self) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn boxed_destructor_drops_once() {
        let before = DROPS.load(Ordering::SeqCst);
        let ptr = Box::into_raw(Box::new(Tracked)).cast::<u8>();
        let dtor = boxed_destructor::<Tracked>();
        unsafe { dtor(ptr) };
        assert_eq!(DROPS.load(Ordering::SeqCst), before + 1);
    }
}
