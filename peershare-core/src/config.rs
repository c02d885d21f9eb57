//! Client-side configuration: the tracker list plus download knobs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::CHUNKS_DIR;

pub const DEFAULT_TRACKER: &str = "127.0.0.1:9000";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// All configured tracker addresses, in failover order.
    pub trackers: Vec<String>,
    /// Probe peers for bitfields and fetch rarest chunks first.
    pub rarest_first: bool,
    /// Artificial pause between chunk fetches (interruption/resume testing).
    pub chunk_delay: Option<Duration>,
    /// Root of the local chunk store.
    pub chunks_root: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            trackers: vec![DEFAULT_TRACKER.to_owned()],
            rarest_first: false,
            chunk_delay: None,
            chunks_root: PathBuf::from(CHUNKS_DIR),
        }
    }
}

impl ClientConfig {
    /// Read the tracker list from a config file (one `host:port` per line,
    /// `#` comments, blank lines ignored). A missing or empty file falls
    /// back to the localhost default, so a fresh checkout still works.
    pub fn load_trackers(&mut self, path: impl AsRef<Path>) {
        self.trackers = match std::fs::read_to_string(path) {
            Ok(contents) => {
                let addrs: Vec<String> = contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_owned)
                    .collect();
                if addrs.is_empty() {
                    vec![DEFAULT_TRACKER.to_owned()]
                } else {
                    addrs
                }
            }
            Err(_) => vec![DEFAULT_TRACKER.to_owned()],
        };
    }
}
