//! Peershare tracker: the replicated control plane.
//!
//! Each tracker node keeps authoritative user/group/file records, persists
//! them to disk, gossips writes to its peer trackers, and pulls a full
//! snapshot when it rejoins after a restart.

pub mod config;
mod handlers;
pub mod persistence;
pub mod server;
pub mod state;
pub mod sync;

pub use config::TrackerConfig;
pub use persistence::Store;
pub use server::Tracker;
pub use state::{StateSnapshot, TrackerState};
