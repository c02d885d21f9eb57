//! Peershare client engine.
//!
//! Everything a peer process does besides argument parsing: chunking and
//! the local chunk store, tracker failover, the resumable rarest-first
//! download engine, the chunk-serving peer server, and the session file.

pub mod chunk;
pub mod config;
pub mod download;
pub mod error;
pub mod peer_server;
pub mod session;
pub mod tracker_conn;

pub use chunk::{chunk_file, hash_file, ChunkStore, CHUNKS_DIR};
pub use config::ClientConfig;
pub use download::{DownloadOptions, DownloadReport, Downloader};
pub use error::ClientError;
pub use peer_server::PeerServer;
pub use session::{Session, SESSION_FILE};
pub use tracker_conn::TrackerPool;
