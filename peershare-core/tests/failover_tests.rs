//! Tracker failover and client-side broadcast against live tracker nodes.

use std::path::Path;
use std::sync::Arc;

use peershare_common::TrackerRequest;
use peershare_core::TrackerPool;
use peershare_tracker::{Store, Tracker};
use tokio::net::TcpListener;

async fn start_tracker(dir: &Path, name: &str) -> (Arc<Tracker>, String) {
    let tracker = Arc::new(Tracker::new(Store::new(dir.join(name)), Vec::new()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(tracker.clone().serve(listener));
    (tracker, addr)
}

/// An address that accepts nothing: bind, record, drop.
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

#[tokio::test]
async fn send_fails_over_past_a_dead_tracker() {
    let dir = tempfile::tempdir().unwrap();
    let (_tracker, live) = start_tracker(dir.path(), "live.json").await;
    let dead = dead_addr().await;

    // The dead tracker is first in failover order; the request must still
    // land on the live one.
    let pool = TrackerPool::new(vec![dead, live]);
    let resp = pool
        .send(&TrackerRequest::new(
            "create_user",
            vec!["alice".into(), "pw".into()],
        ))
        .await
        .unwrap();
    assert!(resp.is_ok());
    assert_eq!(resp.message(), "user created");
}

#[tokio::test]
async fn refresh_active_keeps_only_live_trackers() {
    let dir = tempfile::tempdir().unwrap();
    let (_tracker, live) = start_tracker(dir.path(), "live.json").await;
    let dead = dead_addr().await;

    let mut pool = TrackerPool::new(vec![dead, live.clone()]);
    pool.refresh_active().await;
    assert_eq!(pool.active(), &[live]);
}

#[tokio::test]
async fn broadcast_reaches_every_active_tracker() {
    let dir = tempfile::tempdir().unwrap();
    let (t1, a1) = start_tracker(dir.path(), "t1.json").await;
    let (t2, a2) = start_tracker(dir.path(), "t2.json").await;

    let mut pool = TrackerPool::new(vec![a1, a2]);
    pool.refresh_active().await;

    let responses = pool
        .broadcast(&TrackerRequest::new(
            "create_user",
            vec!["alice".into(), "pw".into()],
        ))
        .await;
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.is_ok()));

    // Independent trackers, both mutated: best-effort client-side fan-out.
    assert!(t1.state().read().users.contains_key("alice"));
    assert!(t2.state().read().users.contains_key("alice"));
}
