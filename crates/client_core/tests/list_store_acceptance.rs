use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use client_core::{Settings, TodoStore};
use shared::{domain::fields, protocol::CommitPolicy};
use storage::CollectionState;

#[tokio::test(start_paused = true)]
async fn list_scenario_with_round_trip_latency() {
    let store = TodoStore::new(
        "acceptance",
        &Settings {
            latency_ms: 500,
            commit_policy: CommitPolicy::Fifo,
            ..Settings::default()
        },
    )
    .expect("store");

    let checks = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&checks);
    let _invariants = store
        .subscribe(
            |state: &CollectionState<shared::domain::TodoItem>| {
                (state.ids.to_vec(), state.check_invariants().is_ok())
            },
            move |(_, consistent): &(Vec<_>, bool)| seen.lock().expect("lock").push(*consistent),
        )
        .expect("subscribe");

    let id1 = store.add(fields([("text", "a")])).expect("add a");
    store.settled().await.expect("settled");
    assert_eq!(store.ordering_sequence().expect("ids"), vec![id1]);

    let id2 = store.add(fields([("text", "b")])).expect("add b");
    store.settled().await.expect("settled");
    assert_eq!(store.ordering_sequence().expect("ids"), vec![id1, id2]);

    store.move_down(id1).expect("move down");
    store.settled().await.expect("settled");
    assert_eq!(store.ordering_sequence().expect("ids"), vec![id2, id1]);

    store.remove(id2).expect("remove");
    store.settled().await.expect("settled");
    assert_eq!(store.ordering_sequence().expect("ids"), vec![id1]);

    store.reset().expect("reset");
    store.settled().await.expect("settled");
    assert!(store.ordering_sequence().expect("ids").is_empty());

    let checks = checks.lock().expect("lock");
    assert_eq!(checks.len(), 5);
    assert!(checks.iter().all(|consistent| *consistent));
}

#[tokio::test(start_paused = true)]
async fn overlapping_mutations_share_one_pending_window() {
    let store = TodoStore::new(
        "acceptance",
        &Settings {
            latency_ms: 200,
            ..Settings::default()
        },
    )
    .expect("store");

    let id = store.add(fields([("text", "a")])).expect("add");
    tokio::time::sleep(Duration::from_millis(100)).await;
    store.set_done(id, true).expect("set done");

    // First commit lands at 200ms; the second is still outstanding.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(store.ordering_sequence().expect("ids"), vec![id]);
    assert!(store.pending().expect("pending"));
    assert_eq!(store.is_done(id).expect("is_done"), Some(false));

    store.settled().await.expect("settled");
    assert!(!store.pending().expect("pending"));
    assert_eq!(store.is_done(id).expect("is_done"), Some(true));
}
