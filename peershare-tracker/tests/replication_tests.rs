//! Cross-tracker behavior over real sockets: write gossip, loop freedom,
//! the startup anti-entropy pull, and restart persistence.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use peershare_common::{wire, Response, TrackerRequest};
use peershare_tracker::{Store, Tracker};
use tokio::net::{TcpListener, TcpStream};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn spawn_tracker(dir: &Path, name: &str, listener: TcpListener, peers: Vec<String>) -> Arc<Tracker> {
    let tracker = Arc::new(Tracker::new(Store::new(dir.join(name)), peers));
    tracker.load_state().unwrap();
    tokio::spawn(tracker.clone().serve(listener));
    tracker
}

async fn rpc(addr: &str, cmd: &str, arglist: &[&str]) -> Response {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    wire::send(&mut stream, &TrackerRequest::new(cmd, args(arglist)))
        .await
        .unwrap();
    wire::recv(&mut stream).await.unwrap()
}

/// Gossip has no acks or retries; give the fan-out a moment to land.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn writes_gossip_to_peer_trackers() {
    let dir = tempfile::tempdir().unwrap();
    let (l1, a1) = bind().await;
    let (l2, a2) = bind().await;

    let t1 = spawn_tracker(dir.path(), "t1.json", l1, vec![a2.clone()]);
    let _t2 = spawn_tracker(dir.path(), "t2.json", l2, vec![a1.clone()]);

    assert!(rpc(&a1, "create_user", &["mu", "pw"]).await.is_ok());
    assert!(rpc(&a1, "create_group", &["mg", "mu"]).await.is_ok());
    settle().await;

    // The user created via T1 can log in via T2.
    assert!(rpc(&a2, "login", &["mu", "pw", "127.0.0.1:4001"]).await.is_ok());
    let groups: Vec<String> = rpc(&a2, "list_groups", &[]).await.parse_data().unwrap();
    assert_eq!(groups, vec!["mg"]);
    settle().await;

    // login gossips session state back the other way.
    {
        let state = t1.state().read();
        assert!(state.users["mu"].logged_in);
        assert_eq!(state.users["mu"].addr, "127.0.0.1:4001");
    }
}

#[tokio::test]
async fn applying_a_sync_command_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = Tracker::new(Store::new(dir.path().join("t.json")), Vec::new());

    for _ in 0..2 {
        assert!(tracker.apply_sync("sync_create_user", &args(&["mu", "pw"])).is_ok());
        assert!(tracker.apply_sync("sync_create_group", &args(&["mg", "mu"])).is_ok());
        assert!(tracker.apply_sync("sync_join_group", &args(&["mg", "bob"])).is_ok());
        assert!(tracker.apply_sync("sync_accept_request", &args(&["mg", "bob"])).is_ok());
    }

    let state = tracker.state().read();
    assert_eq!(state.users.len(), 1);
    assert_eq!(state.groups.len(), 1);
    let g = &state.groups["mg"];
    assert!(g.members.contains("bob"));
    assert!(g.pending.is_empty());
}

#[tokio::test]
async fn sync_commands_do_not_rebroadcast() {
    let dir = tempfile::tempdir().unwrap();

    // A bare listener poses as T's only gossip peer and records whether
    // anything dials in.
    let (sentinel, sentinel_addr) = bind().await;

    let (lt, at) = bind().await;
    let _t = spawn_tracker(dir.path(), "t.json", lt, vec![sentinel_addr]);

    // A gossip-applied write must not fan out again, or the network loops.
    assert!(rpc(&at, "sync_create_user", &["mu", "pw"]).await.is_ok());

    let got_connection = tokio::time::timeout(Duration::from_millis(700), sentinel.accept())
        .await
        .is_ok();
    assert!(!got_connection, "sync-applied command triggered outbound gossip");

    // The same write through the client path does fan out.
    assert!(rpc(&at, "create_user", &["nu", "pw"]).await.is_ok());
    let got_connection = tokio::time::timeout(Duration::from_secs(2), sentinel.accept())
        .await
        .is_ok();
    assert!(got_connection, "client write never gossiped");
}

#[tokio::test]
async fn restarted_tracker_pulls_missed_state() {
    let dir = tempfile::tempdir().unwrap();
    let (l1, a1) = bind().await;

    // T2 is down; these writes happen on T1 only. (T1 gossips into the
    // void, which must be harmless.)
    let (l2, a2) = bind().await;
    drop(l2);
    let _t1 = spawn_tracker(dir.path(), "t1.json", l1, vec![a2.clone()]);
    assert!(rpc(&a1, "create_user", &["mu", "pw"]).await.is_ok());
    assert!(rpc(&a1, "create_group", &["mg", "mu"]).await.is_ok());

    // T2 comes up and runs its startup anti-entropy pull.
    let (l2, a2b) = bind().await;
    let t2 = Arc::new(Tracker::new(
        Store::new(dir.path().join("t2.json")),
        vec![a1.clone()],
    ));
    t2.load_state().unwrap();
    tokio::spawn(t2.clone().serve(l2));
    t2.pull_state_from_peers().await;

    // A client whose only tracker is T2 sees the missed writes.
    assert!(rpc(&a2b, "login", &["mu", "pw", "127.0.0.1:4001"]).await.is_ok());
    let groups: Vec<String> = rpc(&a2b, "list_groups", &[]).await.parse_data().unwrap();
    assert_eq!(groups, vec!["mg"]);
}

#[tokio::test]
async fn pull_merges_without_overwriting_local_records() {
    let dir = tempfile::tempdir().unwrap();
    let (l1, a1) = bind().await;
    let _t1 = spawn_tracker(dir.path(), "t1.json", l1, vec![]);
    assert!(rpc(&a1, "create_user", &["shared", "pw"]).await.is_ok());
    assert!(rpc(&a1, "create_user", &["only-on-t1", "pw"]).await.is_ok());

    let t2 = Tracker::new(Store::new(dir.path().join("t2.json")), vec![a1]);
    // T2 already knows "shared" with a local password; pull must not
    // clobber it.
    t2.apply_sync("sync_create_user", &args(&["shared", "local-pw"]));
    t2.pull_state_from_peers().await;

    let state = t2.state().read();
    assert_eq!(state.users["shared"].password, "local-pw");
    assert!(state.users.contains_key("only-on-t1"));
}

#[tokio::test]
async fn no_live_peers_leaves_local_state_alone() {
    let dir = tempfile::tempdir().unwrap();
    let (dead, dead_addr) = bind().await;
    drop(dead);

    let t = Tracker::new(Store::new(dir.path().join("t.json")), vec![dead_addr]);
    t.apply_sync("sync_create_user", &args(&["mu", "pw"]));
    t.pull_state_from_peers().await;

    assert_eq!(t.state().read().users.len(), 1);
}

#[tokio::test]
async fn state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tracker_state.json");

    {
        let t = Tracker::new(Store::new(&path), Vec::new());
        t.create_user(&args(&["mu", "pw"]), false);
        t.create_group(&args(&["mg", "mu"]), false);
        t.save_now().await.unwrap();
    }

    let t = Tracker::new(Store::new(&path), Vec::new());
    t.load_state().unwrap();
    let state = t.state().read();
    assert!(state.users.contains_key("mu"));
    assert!(state.groups.contains_key("mg"));
    assert_eq!(state.groups["mg"].owner, "mu");
}
