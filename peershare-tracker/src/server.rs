//! The tracker process: request dispatch and the accept loop.

use std::sync::Arc;

use peershare_common::{wire, Response, TrackerRequest};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::persistence::{Store, StoreError};
use crate::state::TrackerState;
use crate::sync;

/// One tracker node: the state handle, its on-disk store and the gossip
/// peer list. Handlers live in `handlers.rs`, replication in `sync.rs`.
pub struct Tracker {
    pub(crate) state: Arc<TrackerState>,
    pub(crate) store: Arc<Store>,
    pub(crate) peers: Vec<String>,
}

impl Tracker {
    pub fn new(store: Store, peers: Vec<String>) -> Self {
        Self {
            state: Arc::new(TrackerState::new()),
            store: Arc::new(store),
            peers,
        }
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Load persisted state, if any. Called once before the listener opens.
    pub fn load_state(&self) -> Result<(), StoreError> {
        match self.store.load()? {
            Some(snapshot) => {
                info!(
                    users = snapshot.users.len(),
                    groups = snapshot.groups.len(),
                    files = snapshot.files.len(),
                    "loaded state from disk"
                );
                self.state.restore(snapshot);
            }
            None => info!("no saved state found, starting fresh"),
        }
        Ok(())
    }

    /// Persist the current state on a background task.
    pub fn schedule_save(&self) {
        let state = self.state.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            let snapshot = state.snapshot();
            if let Err(e) = store.save(&snapshot).await {
                warn!("failed to persist state: {e}");
            }
        });
    }

    /// Persist synchronously; used on shutdown.
    pub async fn save_now(&self) -> Result<(), StoreError> {
        let snapshot = self.state.snapshot();
        self.store.save(&snapshot).await
    }

    /// Post-mutation bookkeeping: persistence always, gossip only on the
    /// originating tracker.
    pub(crate) fn after_write(&self, propagate: bool, sync_cmd: &str, args: &[String]) {
        self.schedule_save();
        if propagate {
            sync::broadcast(&self.peers, sync_cmd, args);
        }
    }

    /// Dispatch one request. Client commands propagate; `sync_*` commands go
    /// through the apply-without-rebroadcast path.
    pub fn handle_request(&self, req: &TrackerRequest) -> Response {
        let args = &req.args;
        match req.cmd.as_str() {
            "create_user" => self.create_user(args, true),
            "login" => self.login(args, true),
            "update_address" => self.update_address(args, true),
            "create_group" => self.create_group(args, true),
            "join_group" => self.join_group(args, true),
            "list_requests" => self.list_requests(args),
            "accept_requests" => self.accept_request(args, true),
            "leave_group" => self.leave_group(args, true),
            "upload_file" => self.upload_file(args, true),
            "list_files" => self.list_files(args),
            "get_file_info" => self.get_file_info(args),
            "list_groups" => self.list_groups(),
            "stop_sharing" => self.stop_sharing(args, true),
            "add_seeder" => self.add_seeder(args, true),
            "sync_pull" => self.sync_pull(),
            cmd if cmd.starts_with("sync_") => self.apply_sync(cmd, args),
            _ => Response::error("unknown command"),
        }
    }

    /// Accept loop: one task per connection, one request per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            let (stream, remote_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            debug!(%remote_addr, "accepted connection");
            let tracker = self.clone();
            tokio::spawn(async move {
                tracker.handle_conn(stream).await;
            });
        }
    }

    async fn handle_conn(&self, mut stream: TcpStream) {
        let req: TrackerRequest = match wire::recv(&mut stream).await {
            Ok(req) => req,
            Err(e) => {
                debug!("dropping malformed request: {e}");
                return;
            }
        };

        let resp = self.handle_request(&req);
        if let Err(e) = wire::send(&mut stream, &resp).await {
            debug!("failed to send {} response: {e}", req.cmd);
        }
    }
}
