//! Loom model checks for the lock-free protocol state.
//!
//! These tests exhaustively explore 2-thread interleavings of the slot
//! claim and the pin/scan pairing on the production structs.
//!
//! ```bash
//! RUSTFLAGS="--cfg loom" cargo test --features loom --test loom_model --release
//! ```

#![cfg(loom)]

use loom::sync::Arc;
use loom::thread;

use limbo::{Config, Manager};

fn tiny_manager() -> Manager {
    Manager::new(Config {
        max_threads: 2,
        ..Config::default()
    })
}

#[test]
fn loom_concurrent_claims_take_distinct_slots() {
    loom::model(|| {
        let manager = Arc::new(tiny_manager());
        let m1 = Arc::clone(&manager);
        let m2 = Arc::clone(&manager);

        let t1 = thread::spawn(move || m1.register().unwrap().index());
        let t2 = thread::spawn(move || m2.register().unwrap().index());

        let first = t1.join().unwrap();
        let second = t2.join().unwrap();
        assert_ne!(first, second);
        // Both handles dropped inside their threads; the table is clear.
        assert_eq!(manager.active_mask(), 0);
    });
}

#[test]
fn loom_observed_pin_carries_its_epoch() {
    loom::model(|| {
        let manager = Arc::new(tiny_manager());
        let m1 = Arc::clone(&manager);
        let m2 = Arc::clone(&manager);

        let pinner = thread::spawn(move || {
            let mut handle = m1.register().unwrap();
            let pinned = handle.unpinned().pin();
            assert!(!pinned.unpin().is_neutralized());
        });

        let scanner = thread::spawn(move || {
            // Whatever interleaving we land in, a scan that sees a pinned
            // slot must also see a published epoch: safe never drops to
            // the reserved epoch 0.
            let safe = m2.reclaim_start().load_epochs().safe_epoch();
            assert!(safe >= 1);
        });

        pinner.join().unwrap();
        scanner.join().unwrap();
    });
}

#[test]
fn loom_advance_is_monotonic_under_pinning() {
    loom::model(|| {
        let manager = Arc::new(tiny_manager());
        let m1 = Arc::clone(&manager);
        let m2 = Arc::clone(&manager);

        let advancer = thread::spawn(move || {
            m1.advance_epoch();
        });

        let observer = thread::spawn(move || {
            let before = m2.current_epoch();
            let after = m2.current_epoch();
            assert!(after >= before);
        });

        advancer.join().unwrap();
        observer.join().unwrap();
        assert_eq!(manager.current_epoch(), 2);
    });
}
