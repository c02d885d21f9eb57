use peershare_common::WireError;
use thiserror::Error;

/// Everything a client operation can report. The `Display` strings are the
/// wire-visible error vocabulary; the CLI prints them verbatim.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no trackers available")]
    NoTrackers,
    #[error("no peers available for download")]
    NoPeers,
    #[error("empty file")]
    EmptyFile,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("tracker error: {0}")]
    Tracker(String),
    #[error("handshake failed")]
    HandshakeFailed,
    #[error("chunk download failed")]
    ChunkFailed,
    #[error("chunk {0} hash mismatch")]
    HashMismatch(u32),
    #[error("invalid response format")]
    InvalidResponse,
    #[error("failed to download chunk {index}: {source}")]
    Chunk {
        index: u32,
        #[source]
        source: Box<ClientError>,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Tag an error with the chunk index it aborted on.
    pub fn for_chunk(self, index: u32) -> Self {
        match self {
            // Hash mismatches already carry their index.
            ClientError::HashMismatch(_) => self,
            other => ClientError::Chunk {
                index,
                source: Box::new(other),
            },
        }
    }
}
