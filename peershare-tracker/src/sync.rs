//! Cross-tracker replication: write gossip and startup anti-entropy.
//!
//! Gossip is best-effort and loop-free: a local write fans out the matching
//! `sync_*` command to every peer on a fresh connection, and inbound
//! `sync_*` commands are applied through paths that never re-broadcast.

use std::time::Duration;

use peershare_common::{wire, Response, TrackerRequest};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::server::Tracker;
use crate::state::{file_key, StateSnapshot};

const GOSSIP_DIAL_TIMEOUT: Duration = Duration::from_millis(500);
const GOSSIP_IO_TIMEOUT: Duration = Duration::from_secs(2);
const PULL_STARTUP_DELAY: Duration = Duration::from_millis(500);
const PULL_DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const PULL_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Fan a sync command out to every peer tracker, one task per peer.
/// Unreachable peers are skipped silently; they catch up at restart via the
/// anti-entropy pull.
pub fn broadcast(peers: &[String], cmd: &str, args: &[String]) {
    let req = TrackerRequest::new(cmd, args.to_vec());
    for peer in peers {
        let peer = peer.clone();
        let req = req.clone();
        tokio::spawn(async move {
            if let Err(e) = send_sync(&peer, &req).await {
                debug!("gossip of {} to {peer} skipped: {e}", req.cmd);
            }
        });
    }
}

async fn send_sync(peer: &str, req: &TrackerRequest) -> Result<(), wire::WireError> {
    let mut stream = timeout(GOSSIP_DIAL_TIMEOUT, TcpStream::connect(peer))
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;
    timeout(GOSSIP_IO_TIMEOUT, async {
        wire::send(&mut stream, req).await?;
        // Drain the ack so the peer's handler completes cleanly.
        let _: Response = wire::recv(&mut stream).await?;
        Ok(())
    })
    .await
    .map_err(|_| wire::WireError::Io(std::io::ErrorKind::TimedOut.into()))?
}

impl Tracker {
    /// Apply an inbound `sync_*` command without re-broadcasting.
    ///
    /// Adds are insert-if-absent; removals delete; `sync_login` and
    /// `sync_update_address` overwrite only the session fields
    /// (field-level last-writer-wins); `sync_add_seeder` merges owners by
    /// union. The heavier commands reuse the regular handlers with
    /// `propagate = false`.
    pub fn apply_sync(&self, cmd: &str, args: &[String]) -> Response {
        match cmd {
            "sync_create_user" => {
                let [user, pass] = args else {
                    return Response::error("sync_create_user: need user, pass");
                };
                {
                    let mut state = self.state.write();
                    if !state.users.contains_key(user) {
                        state.users.insert(
                            user.clone(),
                            crate::state::User {
                                user_id: user.clone(),
                                password: pass.clone(),
                                logged_in: false,
                                addr: String::new(),
                            },
                        );
                        debug!("[sync] created user {user}");
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            "sync_login" => {
                let [user, addr] = args else {
                    return Response::error("sync_login: need user, addr");
                };
                {
                    let mut state = self.state.write();
                    if let Some(u) = state.users.get_mut(user) {
                        u.logged_in = true;
                        u.addr = addr.clone();
                        debug!("[sync] {user} logged in");
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            "sync_update_address" => {
                let [user, addr] = args else {
                    return Response::error("sync_update_address: need user, addr");
                };
                {
                    let mut state = self.state.write();
                    if let Some(u) = state.users.get_mut(user) {
                        u.addr = addr.clone();
                        debug!("[sync] updated address for {user} to {addr}");
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            "sync_create_group" => {
                let [group_id, owner] = args else {
                    return Response::error("sync_create_group: need group_id, owner");
                };
                {
                    let mut state = self.state.write();
                    if !state.groups.contains_key(group_id) {
                        state.groups.insert(
                            group_id.clone(),
                            crate::state::Group::new(group_id.clone(), owner.clone()),
                        );
                        debug!("[sync] created group {group_id}");
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            "sync_join_group" => {
                let [group_id, user] = args else {
                    return Response::error("sync_join_group: need group_id, user");
                };
                {
                    let mut state = self.state.write();
                    if let Some(g) = state.groups.get_mut(group_id) {
                        if !g.members.contains(user) {
                            g.pending.insert(user.clone());
                            debug!("[sync] {user} pending in group {group_id}");
                        }
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            "sync_accept_request" => {
                let [group_id, user] = args else {
                    return Response::error("sync_accept_request: need group_id, user");
                };
                {
                    let mut state = self.state.write();
                    if let Some(g) = state.groups.get_mut(group_id) {
                        g.pending.remove(user);
                        g.members.insert(user.clone());
                        debug!("[sync] accepted {user} into group {group_id}");
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            "sync_leave_group" => {
                let [group_id, user] = args else {
                    return Response::error("sync_leave_group: need group_id, user");
                };
                {
                    let mut state = self.state.write();
                    if let Some(g) = state.groups.get_mut(group_id) {
                        g.members.remove(user);
                        debug!("[sync] {user} left group {group_id}");
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            "sync_upload_file" => {
                // Uniqueness on (group_id, file_name) makes re-application on
                // the origin a no-op and an insert everywhere else.
                let resp = self.upload_file(args, false);
                debug!("[sync] upload_file applied: {:?}", resp.status);
                Response::ok("synced")
            }

            "sync_stop_sharing" => {
                let resp = self.stop_sharing(args, false);
                debug!("[sync] stop_sharing applied: {:?}", resp.status);
                Response::ok("synced")
            }

            "sync_add_seeder" => {
                let [group_id, file_name, user] = args else {
                    return Response::error("sync_add_seeder: need group_id, file_name, user");
                };
                {
                    let mut state = self.state.write();
                    if let Some(f) = state.files.get_mut(&file_key(group_id, file_name)) {
                        f.owners.insert(user.clone());
                        debug!("[sync] {user} added as seeder for {file_name}");
                    }
                }
                self.schedule_save();
                Response::ok("synced")
            }

            _ => Response::error("unknown sync command"),
        }
    }

    /// Serve a full snapshot to a rejoining peer.
    pub fn sync_pull(&self) -> Response {
        Response::ok(self.state.snapshot())
    }

    /// Startup anti-entropy: ask peers, in configured order, for a full
    /// snapshot and merge the first one offered. Missing every peer is fine;
    /// the tracker then runs on local state alone.
    pub async fn pull_state_from_peers(&self) {
        if self.peers.is_empty() {
            return;
        }
        // Let our own listener come up before dialling out.
        tokio::time::sleep(PULL_STARTUP_DELAY).await;

        for peer in &self.peers {
            let snapshot = match pull_snapshot(peer).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!("state pull from {peer} failed: {e}");
                    continue;
                }
            };

            info!(
                "merged state from {peer} ({} users, {} groups, {} files)",
                snapshot.users.len(),
                snapshot.groups.len(),
                snapshot.files.len()
            );
            self.state.merge(snapshot);
            self.schedule_save();
            return;
        }
        warn!("no live peers found, starting with local state only");
    }
}

async fn pull_snapshot(peer: &str) -> Result<StateSnapshot, wire::WireError> {
    let mut stream = timeout(PULL_DIAL_TIMEOUT, TcpStream::connect(peer))
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

    let resp: Response = timeout(PULL_IO_TIMEOUT, async {
        wire::send(&mut stream, &TrackerRequest::new("sync_pull", Vec::new())).await?;
        wire::recv(&mut stream).await
    })
    .await
    .map_err(|_| wire::WireError::Io(std::io::ErrorKind::TimedOut.into()))??;

    if !resp.is_ok() {
        return Err(wire::WireError::Io(std::io::ErrorKind::InvalidData.into()));
    }
    resp.parse_data()
}
