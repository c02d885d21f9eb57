//! Tracker failover and broadcast from the client side.

use std::time::Duration;

use peershare_common::{wire, Response, TrackerRequest, WireError};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::error::ClientError;

const DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const IO_DEADLINE: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);
const BROADCAST_WINDOW: Duration = Duration::from_secs(2);

/// The client's view of the tracker cluster: every configured address plus
/// the subset that answered the last probe.
#[derive(Debug, Clone, Default)]
pub struct TrackerPool {
    configured: Vec<String>,
    active: Vec<String>,
}

impl TrackerPool {
    pub fn new(configured: Vec<String>) -> Self {
        Self {
            configured,
            active: Vec::new(),
        }
    }

    pub fn active(&self) -> &[String] {
        &self.active
    }

    /// Probe every configured tracker and remember the responsive ones.
    pub async fn refresh_active(&mut self) {
        let mut active = Vec::new();
        for addr in &self.configured {
            if timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await.is_ok_and(|r| r.is_ok()) {
                active.push(addr.clone());
            }
        }
        self.active = active;
    }

    /// Candidate order: active trackers first, then any remaining
    /// configured addresses.
    fn candidates(&self) -> Vec<String> {
        let mut candidates = self.active.clone();
        for addr in &self.configured {
            if !candidates.contains(addr) {
                candidates.push(addr.clone());
            }
        }
        candidates
    }

    /// Send one request, failing over across trackers. Returns the first
    /// successful response; "no trackers available" only when every
    /// candidate fails at the transport level.
    pub async fn send(&self, req: &TrackerRequest) -> Result<Response, ClientError> {
        for addr in self.candidates() {
            match try_tracker(&addr, req).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    debug!("tracker {addr} failed for {}: {e}", req.cmd);
                }
            }
        }
        Err(ClientError::NoTrackers)
    }

    /// `send`, but a tracker-side error becomes `ClientError::Tracker` with
    /// the tracker's message verbatim.
    pub async fn send_expect_ok(&self, req: &TrackerRequest) -> Result<Response, ClientError> {
        let resp = self.send(req).await?;
        if resp.is_ok() {
            Ok(resp)
        } else {
            Err(ClientError::Tracker(resp.message()))
        }
    }

    /// Fire the same request at every active tracker in parallel and collect
    /// whatever answers within the window. Best-effort by design.
    pub async fn broadcast(&self, req: &TrackerRequest) -> Vec<Response> {
        let (tx, mut rx) = mpsc::channel(self.active.len().max(1));
        for addr in self.active.clone() {
            let req = req.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(resp) = try_tracker(&addr, &req).await {
                    let _ = tx.send(resp).await;
                }
            });
        }
        drop(tx);

        let mut responses = Vec::new();
        let deadline = tokio::time::Instant::now() + BROADCAST_WINDOW;
        while let Ok(Some(resp)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            responses.push(resp);
        }
        responses
    }
}

async fn try_tracker(addr: &str, req: &TrackerRequest) -> Result<Response, WireError> {
    let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

    timeout(IO_DEADLINE, async {
        wire::send(&mut stream, req).await?;
        wire::recv(&mut stream).await
    })
    .await
    .map_err(|_| WireError::Io(std::io::ErrorKind::TimedOut.into()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_unreachable_reports_no_trackers() {
        // Reserved TEST-NET-1 address: nothing listens there.
        let pool = TrackerPool::new(vec!["192.0.2.1:1".into()]);
        let err = pool
            .send(&TrackerRequest::new("list_groups", Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoTrackers));
    }

    #[test]
    fn candidates_prefer_active() {
        let mut pool = TrackerPool::new(vec!["a:1".into(), "b:2".into(), "c:3".into()]);
        pool.active = vec!["b:2".into()];
        assert_eq!(pool.candidates(), vec!["b:2", "a:1", "c:3"]);
    }
}
