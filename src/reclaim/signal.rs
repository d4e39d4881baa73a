//! Neutralization: the signal handler and the stalled-thread scan.
//!
//! A thread that stalls while pinned blocks reclamation of its epoch and
//! everything newer. The neutralizer delivers a directed per-thread signal
//! to such stragglers; the handler runs in the straggler's own context and
//! force-unpins it, so the next reclamation pass makes progress. The
//! straggler learns about it at its next unpin, which reports
//! [`UnpinResult::Neutralized`].
//!
//! # Handler constraints
//!
//! The handler does no allocation, no I/O, and no traversal of shared
//! state. It reads the process-wide manager pointer and the thread-local
//! slot index, then writes exactly two atomic booleans in its own slot.
//! Because it only ever touches the slot of the thread it interrupts, there
//! is no cross-thread race inside the handler.
//!
//! [`UnpinResult::Neutralized`]: super::UnpinResult::Neutralized

use std::ptr;

use nix::libc::c_int;
use nix::sys::pthread::{pthread_kill, Pthread};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use super::manager::{current_thread_id, Manager, SLOT_INDEX, SLOT_NONE};
use super::slot::TID_NONE;
use crate::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use crate::{Error, Result};

/// The manager consulted by the signal handler.
///
/// One per process: the handler has no other route from "this thread" back
/// to "my slot". Multi-manager processes must keep at most one of them
/// published at a time.
static PROCESS_MANAGER: AtomicPtr<Manager> = AtomicPtr::new(ptr::null_mut());

static HANDLER_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Publishes `manager` to the signal handler.
///
/// The `'static` bound keeps the pointer valid for as long as signals can
/// arrive; leak the manager (`Box::leak`) or store it in a static.
pub fn set_process_manager(manager: &'static Manager) {
    PROCESS_MANAGER.store(manager as *const Manager as *mut Manager, Ordering::Release);
}

/// Withdraws the manager from the signal handler; later deliveries no-op.
pub fn clear_process_manager() {
    PROCESS_MANAGER.store(ptr::null_mut(), Ordering::Release);
}

/// Installs the process-wide neutralization handler for `signal`.
///
/// Idempotent: the first call installs, every later call returns `Ok`
/// without touching the disposition again.
pub fn install_signal_handler(signal: Signal) -> Result<()> {
    if HANDLER_INSTALLED.swap(true, Ordering::AcqRel) {
        return Ok(());
    }
    let action = SigAction::new(
        SigHandler::Handler(neutralize_handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // SAFETY: The handler is async-signal-safe: it performs two atomic
    // stores into the interrupted thread's own slot and returns.
    match unsafe { sigaction(signal, &action) } {
        Ok(_) => Ok(()),
        Err(errno) => {
            HANDLER_INSTALLED.store(false, Ordering::Release);
            Err(Error::SignalInstall(errno))
        }
    }
}

extern "C" fn neutralize_handler(_signum: c_int) {
    let manager = PROCESS_MANAGER.load(Ordering::Acquire);
    if manager.is_null() {
        return;
    }
    // try_with, not with: the thread may be tearing down its locals.
    let index = match SLOT_INDEX.try_with(|cell| cell.get()) {
        Ok(index) => index,
        Err(_) => return,
    };
    if index == SLOT_NONE {
        return;
    }
    // SAFETY: set_process_manager requires 'static, so a non-null pointer
    // is valid for the whole process lifetime.
    let manager = unsafe { &*manager };
    if index >= manager.max_threads() {
        return;
    }
    let slot = manager.slot(index);
    if slot.pinned.load(Ordering::Acquire) {
        slot.pinned.store(false, Ordering::Release);
        slot.neutralized.store(true, Ordering::Release);
    }
}

/// Scans the slot table and signals every thread pinned at an epoch more
/// than `epochs_before_neutralize` behind the global epoch.
///
/// Returns the number of signals delivered. The caller never signals
/// itself: injecting a handler into arbitrary code of the calling thread
/// is the one thing the protocol must not do.
pub(crate) fn neutralize_stalled(manager: &Manager) -> usize {
    let epoch = manager.current_epoch();
    let cutoff = epoch.saturating_sub(manager.config().epochs_before_neutralize);
    let myself = current_thread_id();

    let mut delivered = 0;
    for index in 0..manager.max_threads() {
        let slot = manager.slot(index);
        if !slot.pinned.load(Ordering::Acquire) {
            continue;
        }
        if slot.observed_epoch.load(Ordering::Acquire) >= cutoff {
            continue;
        }
        let tid = slot.thread_id.load(Ordering::Acquire);
        if tid == TID_NONE || tid == myself {
            continue;
        }
        // Delivery is advisory; a thread that exited between the scan and
        // the kill just fails to receive.
        if pthread_kill(tid as Pthread, manager.config().signal).is_ok() {
            delivered += 1;
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installing_twice_is_installing_once() {
        assert!(install_signal_handler(Signal::SIGUSR1).is_ok());
        assert!(install_signal_handler(Signal::SIGUSR1).is_ok());
    }

    #[test]
    fn handler_without_manager_is_a_noop() {
        clear_process_manager();
        neutralize_handler(0);
    }

    #[test]
    fn neutralizer_skips_fresh_and_vacant_slots() {
        let manager = Manager::with_defaults();
        // Nothing registered, nothing pinned: nothing to signal.
        assert_eq!(neutralize_stalled(&manager), 0);

        manager.advance_epoch();
        assert_eq!(neutralize_stalled(&manager), 0);
    }
}
