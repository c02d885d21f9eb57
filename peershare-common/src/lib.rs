//! Shared protocol pieces for the peershare network.
//!
//! Both process roles (tracker and client/peer) speak the same framed-JSON
//! wire protocol and exchange the same chunk-manifest shapes; this crate
//! holds those plus the content-hash type they are built on.

pub mod types;
pub mod wire;

pub use types::{
    ChunkInfo, ChunkManifest, ContentHash, FileEntry, FileInfo, GroupCreated, UploadAck, CHUNK_SIZE,
};
pub use wire::{PeerRequest, PeerResponse, Response, Status, TrackerRequest, WireError};
