//! Conditional Synchronization Primitives
//!
//! This module provides a unified interface for the atomic types and cells
//! the protocol state is built from, switching between the standard library
//! and Loom's model-checking shims.
//!
//! When the crate is compiled with the `loom` feature *and* `--cfg loom`,
//! every atomic and `UnsafeCell` in the slot table becomes a Loom type, so
//! the model tests in `tests/loom_model.rs` exercise the production structs
//! rather than copies:
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test --features loom --test loom_model --release
//! ```
//!
//! In standard mode this module is a zero-cost re-export of
//! `core::sync::atomic` and `core::cell`.

#[cfg(all(feature = "loom", loom))]
pub mod atomic {
    //! Atomic types for Loom model checking.

    pub use loom::sync::atomic::{
        fence, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering,
    };
}

#[cfg(not(all(feature = "loom", loom)))]
pub mod atomic {
    //! Standard library atomic types.

    pub use core::sync::atomic::{
        fence, AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering,
    };
}

#[cfg(all(feature = "loom", loom))]
pub mod cell {
    //! Loom-aware cell types.
    //!
    //! Loom's `UnsafeCell` returns tracked pointer wrappers instead of raw
    //! pointers, so access goes through these helpers on both sides.

    pub use loom::cell::UnsafeCell;

    /// Get a mutable raw pointer from an `UnsafeCell`.
    ///
    /// # Safety
    /// Caller must ensure exclusive access to the cell's contents.
    #[inline]
    pub unsafe fn get_mut_ptr<T>(cell: &UnsafeCell<T>) -> *mut T {
        cell.get_mut().deref()
    }
}

#[cfg(not(all(feature = "loom", loom)))]
pub mod cell {
    //! Standard library cell types.

    pub use core::cell::UnsafeCell;

    /// Get a mutable raw pointer from an `UnsafeCell`.
    ///
    /// # Safety
    /// Caller must ensure exclusive access to the cell's contents.
    #[inline]
    pub unsafe fn get_mut_ptr<T>(cell: &UnsafeCell<T>) -> *mut T {
        cell.get()
    }
}

/// Helper macro for creating thread-local storage that works with Loom.
///
/// Loom simulates multiple threads inside a single OS thread, so modeled
/// thread-local state must go through Loom's own `thread_local!`.
#[macro_export]
macro_rules! loom_thread_local {
    ($(#[$attr:meta])* $vis:vis static $name:ident: $ty:ty = $init:expr;) => {
        #[cfg(all(feature = "loom", loom))]
        loom::thread_local! {
            $(#[$attr])*
            $vis static $name: $ty = $init;
        }

        #[cfg(not(all(feature = "loom", loom)))]
        std::thread_local! {
            $(#[$attr])*
            $vis static $name: $ty = $init;
        }
    };
}

#[cfg(test)]
mod tests {
    use super::atomic::{AtomicUsize, Ordering};

    #[test]
    fn atomic_basic() {
        let counter = AtomicUsize::new(0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        counter.store(42, Ordering::SeqCst);
        assert_eq!(counter.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn cell_roundtrip() {
        let cell = super::cell::UnsafeCell::new(7usize);
        // SAFETY: Exclusive access, the cell is local to this test.
        unsafe {
            *super::cell::get_mut_ptr(&cell) = 9;
            assert_eq!(*super::cell::get_mut_ptr(&cell), 9);
        }
    }
}
