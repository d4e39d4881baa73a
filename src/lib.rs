//! Limbo: epoch-based memory reclamation with neutralization
//!
//! Lock-free data structures cannot free a node the moment it is unlinked,
//! because concurrent readers may still hold references into it. This crate
//! defers reclamation until it is provably safe, and adds a signal-driven
//! *neutralization* protocol that keeps memory bounded even when a reader
//! stalls inside a critical section.
//!
//! # Architecture
//!
//! The [`reclaim`] module contains the whole protocol:
//!
//! - a [`Manager`] owning a fixed table of per-thread slots, the global
//!   epoch, and the active-slot bitmask,
//! - move-only pin/unpin guards ([`Unpinned`], [`Pinned`]) that publish a
//!   thread's observed epoch for the duration of a critical section,
//! - per-thread limbo bags holding retired `(pointer, destructor)` pairs,
//! - a reclamation pass that computes the minimum epoch observed by any
//!   pinned thread and frees everything strictly older,
//! - a neutralizer that delivers a directed POSIX signal to threads pinned
//!   at a stale epoch, force-unpinning them from their own signal handler.
//!
//! # Protocol sketch
//!
//! ```text
//!   user thread                         reclaiming thread
//!   ───────────                         ─────────────────
//!   pin() ── publishes observed epoch
//!   ... atomic reads, CAS ...
//!   retire(ptr, dtor) ── into limbo bag
//!   unpin()                             reclaim_start() .. try_reclaim()
//!                                       │ min over pinned observed epochs
//!                                       └ frees bags below the safe epoch
//!   (stalled while pinned)              neutralize_stalled() ── signal ──┐
//!   signal handler force-unpins  <──────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use limbo::{Manager, SafeCheck};
//!
//! let manager = Manager::with_defaults();
//! let mut handle = manager.register().unwrap();
//!
//! // Enter a critical section and retire a heap allocation.
//! let pinned = handle.unpinned().pin();
//! let ptr = Box::into_raw(Box::new(42u64)).cast();
//! unsafe {
//!     pinned.retire_ready().retire(ptr, Some(limbo::boxed_destructor::<u64>()));
//! }
//! assert!(!pinned.unpin().is_neutralized());
//!
//! // Two epoch advances later the retirement is reclaimable.
//! manager.advance_epoch();
//! manager.advance_epoch();
//! match manager.reclaim_start().load_epochs().check_safe() {
//!     SafeCheck::Ready(ready) => assert_eq!(unsafe { ready.try_reclaim() }, 1),
//!     SafeCheck::Blocked(_) => unreachable!(),
//! }
//! ```
//!
//! # Error model
//!
//! The crate never logs; every outcome is a typed value. [`Error`] covers the
//! genuinely recoverable failures (a full slot table, a failed handler
//! install). Branching outcomes such as [`UnpinResult`] and [`SafeCheck`] are
//! ordinary enums, not errors.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Conditional synchronization primitives for Loom integration
pub mod sync;

pub mod reclaim;

pub use reclaim::{
    boxed_destructor, Config, Destructor, Epoch, EpochsLoaded, Handle, Manager, Neutralized,
    Pinned, ReclaimBlocked, ReclaimReady, ReclaimStart, Retired, RetireReady, SafeCheck,
    SlotStatus, Unpinned, UnpinResult,
};

#[cfg(not(all(feature = "loom", loom)))]
pub use reclaim::{clear_process_manager, install_signal_handler, set_process_manager};

/// Error type for the reclamation core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Every slot in the thread table is claimed. Recoverable: wait for a
    /// registered thread to exit, or construct a manager with more slots.
    RegistrationFull {
        /// Capacity of the slot table that rejected the registration.
        capacity: usize,
    },
    /// Installing the neutralization signal handler failed.
    SignalInstall(nix::errno::Errno),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::RegistrationFull { capacity } => {
                write!(f, "all {} thread slots are claimed", capacity)
            }
            Error::SignalInstall(errno) => {
                write!(f, "installing the neutralization handler failed: {}", errno)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result type for reclamation operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Compile-time configuration constants.
pub mod config {
    /// Width of the active mask in bits, and so the hard upper bound on
    /// `max_threads`.
    pub const MASK_BITS: usize = 64;

    /// Default number of thread slots.
    pub const MAX_THREADS: usize = 64;

    /// Default number of retirements per limbo bag.
    pub const BAG_CAPACITY: usize = 64;

    /// Default number of epochs a thread may lag behind the global epoch
    /// before the neutralizer signals it.
    pub const EPOCHS_BEFORE_NEUTRALIZE: u64 = 2;

    /// Cache line size used for alignment of hot shared state.
    pub const CACHE_LINE_SIZE: usize = 64;
}
