//! Property-based tests for queue invariants.
//!
//! These use proptest to verify the dispatch properties that hold for
//! every workload shape:
//! - surviving waiters are granted in arrival order
//! - abandoned waiters never stall the queue or reorder survivors
//! - the mutex always ends unlocked once every turn is consumed

use std::sync::{Arc, Mutex as StdMutex};

use proptest::prelude::*;

use baton::Mutex;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime")
}

proptest! {
    /// Property: whatever subset of waiters gives up before its turn,
    /// the survivors are granted in arrival order and the mutex ends
    /// unlocked.
    #[test]
    fn surviving_waiters_keep_arrival_order(abandoned in proptest::collection::vec(any::<bool>(), 0..12)) {
        let expected: Vec<usize> = abandoned
            .iter()
            .enumerate()
            .filter_map(|(index, give_up)| (!*give_up).then_some(index))
            .collect();

        let (granted, locked) = runtime().block_on({
            let abandoned = abandoned.clone();
            async move {
                let mutex = Mutex::new();
                let order = Arc::new(StdMutex::new(Vec::new()));

                let blocker = mutex.acquire().await.expect("untimed acquire cannot fail");

                let mut survivors = Vec::new();
                for (index, give_up) in abandoned.into_iter().enumerate() {
                    let pending = mutex.acquire();
                    if give_up {
                        drop(pending);
                        continue;
                    }
                    let order = Arc::clone(&order);
                    survivors.push(tokio::spawn(async move {
                        let guard = pending.await.expect("untimed acquire cannot fail");
                        order.lock().expect("order vector poisoned").push(index);
                        guard.release();
                    }));
                }

                blocker.release();
                for survivor in survivors {
                    survivor.await.expect("waiter task panicked");
                }

                let granted = order.lock().expect("order vector poisoned").clone();
                (granted, mutex.is_locked())
            }
        });

        prop_assert_eq!(granted, expected);
        prop_assert!(!locked);
    }

    /// Property: the queue depth tracks pending acquisitions exactly,
    /// and consuming every turn drains it to zero.
    #[test]
    fn queue_depth_tracks_pending_acquisitions(total in 0usize..16) {
        let (depth_while_held, depth_after, locked) = runtime().block_on(async move {
            let mutex = Mutex::new();
            let blocker = mutex.acquire().await.expect("untimed acquire cannot fail");

            let pending: Vec<_> = (0..total).map(|_| mutex.acquire()).collect();
            let while_held = mutex.waiters();

            drop(pending);
            blocker.release();
            (while_held, mutex.waiters(), mutex.is_locked())
        });

        prop_assert_eq!(depth_while_held, total);
        prop_assert_eq!(depth_after, 0);
        prop_assert!(!locked);
    }
}
