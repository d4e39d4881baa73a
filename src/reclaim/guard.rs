//! Pin/unpin state machine and the retire path.
//!
//! Each state of a registered thread is a distinct move-only type, so the
//! sequencing rules hold at compile time:
//!
//! ```text
//!   Handle ──unpinned()──▶ Unpinned ──pin()──▶ Pinned ──unpin()──▶ UnpinResult
//!                              ▲                                      │
//!                              └────────── acknowledge() ◀── Neutralized
//! ```
//!
//! Pinning twice is impossible because [`Unpinned::pin`] consumes its
//! receiver and [`Handle::unpinned`] borrows the handle mutably for the
//! whole chain. Retiring from an unpinned thread is impossible because a
//! [`RetireReady`] token can only be derived from a [`Pinned`] one.
//!
//! Between pin and unpin the thread may perform atomic loads and CAS
//! against shared containers and may retire. Blocking, I/O, and unbounded
//! loops inside the critical section do not break safety, but they invite
//! neutralization.

use core::marker::PhantomData;
use core::mem;

use super::bag::RetiredObject;
use super::manager::Manager;
use super::slot::Slot;
use super::{Destructor, Epoch};
use crate::sync::atomic::Ordering;

/// A claimed slot in a manager's thread table.
///
/// `Handle` is tied to the registering thread (it is neither `Send` nor
/// `Sync`): the slot's thread id is the target for neutralization signals
/// and must keep matching the thread that pins through it.
///
/// Dropping the handle deregisters the thread: remaining limbo bags are
/// drained in bulk (destructor panics swallowed, like shutdown) and the
/// slot returns to the free pool.
pub struct Handle<'m> {
    manager: &'m Manager,
    index: usize,
    _not_send: PhantomData<*mut ()>,
}

impl<'m> Handle<'m> {
    pub(crate) fn new(manager: &'m Manager, index: usize) -> Self {
        Handle {
            manager,
            index,
            _not_send: PhantomData,
        }
    }

    /// Index of the claimed slot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Enters the unpinned state.
    ///
    /// The returned token borrows the handle mutably, so at most one
    /// pin chain exists per handle at a time.
    pub fn unpinned(&mut self) -> Unpinned<'_> {
        Unpinned {
            manager: self.manager,
            index: self.index,
            _chain: PhantomData,
        }
    }
}

impl Drop for Handle<'_> {
    fn drop(&mut self) {
        self.manager.release_slot(self.index);
    }
}

/// A registered thread outside any critical section.
pub struct Unpinned<'h> {
    manager: &'h Manager,
    index: usize,
    _chain: PhantomData<*mut ()>,
}

impl<'h> Unpinned<'h> {
    /// Enters a critical section.
    ///
    /// Publishes the observed global epoch, then the pinned flag, in that
    /// order: any observer that sees `pinned` also sees the matching epoch.
    pub fn pin(self) -> Pinned<'h> {
        let slot = self.manager.slot(self.index);
        let epoch = self.manager.current_epoch();
        slot.neutralized.store(false, Ordering::Release);
        slot.observed_epoch.store(epoch, Ordering::Release);
        slot.pinned.store(true, Ordering::Release);
        Pinned {
            manager: self.manager,
            index: self.index,
            _chain: PhantomData,
        }
    }
}

/// A registered thread inside a critical section.
///
/// Dropping a `Pinned` token (for example during unwinding) force-unpins
/// the slot; the neutralized flag, if set, is picked up by the next pin.
pub struct Pinned<'h> {
    manager: &'h Manager,
    index: usize,
    _chain: PhantomData<*mut ()>,
}

impl<'h> Pinned<'h> {
    /// The global epoch this pin observed.
    pub fn observed_epoch(&self) -> Epoch {
        // Own slot, own writes: no synchronization needed to read back.
        self.slot().observed_epoch.load(Ordering::Relaxed)
    }

    /// Derives a retirement token for this critical section.
    pub fn retire_ready(&self) -> RetireReady<'_> {
        RetireReady {
            manager: self.manager,
            index: self.index,
            _chain: PhantomData,
        }
    }

    /// Leaves the critical section.
    ///
    /// Returns [`UnpinResult::Neutralized`] when the neutralization handler
    /// fired while this thread was pinned; the caller must acknowledge
    /// before pinning again.
    pub fn unpin(self) -> UnpinResult<'h> {
        let manager = self.manager;
        let index = self.index;
        mem::forget(self);

        let slot = manager.slot(index);
        slot.pinned.store(false, Ordering::Release);
        if slot.neutralized.load(Ordering::Acquire) {
            UnpinResult::Neutralized(Neutralized {
                manager,
                index,
                _chain: PhantomData,
            })
        } else {
            UnpinResult::Unpinned(Unpinned {
                manager,
                index,
                _chain: PhantomData,
            })
        }
    }

    fn slot(&self) -> &Slot {
        self.manager.slot(self.index)
    }
}

impl Drop for Pinned<'_> {
    fn drop(&mut self) {
        self.slot().pinned.store(false, Ordering::Release);
    }
}

/// Outcome of [`Pinned::unpin`].
pub enum UnpinResult<'h> {
    /// The critical section ended normally.
    Unpinned(Unpinned<'h>),
    /// The thread was force-unpinned by the neutralization handler while
    /// pinned. Not a failure: acknowledge and, typically, retry.
    Neutralized(Neutralized<'h>),
}

impl<'h> UnpinResult<'h> {
    /// Whether the handler fired during the critical section.
    pub fn is_neutralized(&self) -> bool {
        matches!(self, UnpinResult::Neutralized(_))
    }

    /// Collapses both outcomes into an [`Unpinned`] token, acknowledging
    /// the neutralization when there was one.
    pub fn into_unpinned(self) -> Unpinned<'h> {
        match self {
            UnpinResult::Unpinned(unpinned) => unpinned,
            UnpinResult::Neutralized(neutralized) => neutralized.acknowledge(),
        }
    }
}

/// A thread whose last critical section was cut short by neutralization.
///
/// The only way forward is [`Neutralized::acknowledge`]; pinning from this
/// state does not type-check.
pub struct Neutralized<'h> {
    manager: &'h Manager,
    index: usize,
    _chain: PhantomData<*mut ()>,
}

impl<'h> Neutralized<'h> {
    /// Clears the neutralized flag and returns to the unpinned state.
    pub fn acknowledge(self) -> Unpinned<'h> {
        let slot = self.manager.slot(self.index);
        slot.neutralized.store(false, Ordering::Release);
        Unpinned {
            manager: self.manager,
            index: self.index,
            _chain: PhantomData,
        }
    }
}

/// Permission to retire one object within a critical section.
///
/// Obtained from [`Pinned::retire_ready`] and consumed by
/// [`RetireReady::retire`]; chain further retirements through
/// [`Retired::retire_ready`].
pub struct RetireReady<'p> {
    manager: &'p Manager,
    index: usize,
    _chain: PhantomData<*mut ()>,
}

impl<'p> RetireReady<'p> {
    /// Hands `ptr` to the reclaimer together with its destructor.
    ///
    /// The object is not freed here; the destructor runs during a later
    /// reclamation pass, on whichever thread drives it. A null pointer with
    /// a `None` destructor is a permitted no-op placeholder.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid until its destructor runs, the destructor must
    /// be sound to invoke exactly once with `ptr` from any thread, and the
    /// caller must not touch the object after this call.
    pub unsafe fn retire(self, ptr: *mut u8, dtor: Option<Destructor>) -> Retired<'p> {
        let slot = self.manager.slot(self.index);
        let epoch = slot.observed_epoch.load(Ordering::Relaxed);
        // SAFETY: This token exists only on the slot-owning thread while
        // pinned, which is the single writer of its bag list.
        unsafe {
            slot.push_retired(epoch, self.manager.config().bag_capacity, RetiredObject {
                ptr,
                dtor,
            });
        }
        self.manager.add_limbo(1);
        Retired {
            manager: self.manager,
            index: self.index,
            _chain: PhantomData,
        }
    }
}

/// Proof that a retirement completed; recovers a fresh [`RetireReady`].
pub struct Retired<'p> {
    manager: &'p Manager,
    index: usize,
    _chain: PhantomData<*mut ()>,
}

impl<'p> Retired<'p> {
    /// Derives the next retirement token in the same critical section.
    pub fn retire_ready(self) -> RetireReady<'p> {
        RetireReady {
            manager: self.manager,
            index: self.index,
            _chain: PhantomData,
        }
    }
}
