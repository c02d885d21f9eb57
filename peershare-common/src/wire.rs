//! Length-prefixed JSON framing shared by every TCP exchange in the system.
//!
//! Every message is a 4-byte big-endian length followed by that many bytes
//! of UTF-8 JSON. Each connection carries exactly one request and one
//! response; connections are never pooled.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::types::ContentHash;

/// Upper bound on a single frame. Large enough for a 512 KiB chunk carried
/// base64-encoded inside JSON, small enough to bound allocation on a
/// misbehaving peer.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {0} bytes exceeds {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
    #[error("invalid response format")]
    InvalidFormat(#[source] serde_json::Error),
}

/// Write one framed message.
pub async fn send<S, T>(stream: &mut S, msg: &T) -> Result<(), WireError>
where
    S: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = serde_json::to_vec(msg).map_err(WireError::InvalidFormat)?;
    if data.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(data.len()));
    }
    stream.write_all(&(data.len() as u32).to_be_bytes()).await?;
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one framed message.
pub async fn recv<S, T>(stream: &mut S) -> Result<T, WireError>
where
    S: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;
    serde_json::from_slice(&data).map_err(WireError::InvalidFormat)
}

/// A client-to-tracker (or tracker-to-tracker) RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerRequest {
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl TrackerRequest {
    pub fn new(cmd: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Tracker reply. `data` is command-dependent; callers deserialize it into
/// the typed payload they expect via [`Response::parse_data`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Response {
    pub fn ok<T: Serialize>(data: T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                status: Status::Ok,
                data: value,
            },
            Err(e) => Self::error(format!("invalid response format: {e}")),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            data: serde_json::Value::String(msg.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Deserialize `data` into the payload type the command promises.
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        serde_json::from_value(self.data.clone()).map_err(WireError::InvalidFormat)
    }

    /// The `data` payload as a plain string, for message-style replies and
    /// error reporting.
    pub fn message(&self) -> String {
        match &self.data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One-shot requests served by a client's peer server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum PeerRequest {
    Handshake {
        file_hash: ContentHash,
    },
    GetPiece {
        file_hash: ContentHash,
        piece_idx: u32,
    },
    GetBitfield {
        file_hash: ContentHash,
    },
}

/// Peer server reply. Chunk bytes ride base64-encoded in `data`;
/// `get_bitfield` fills `bitfield` with the chunk indices present locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_bytes")]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitfield: Option<Vec<u32>>,
}

impl PeerResponse {
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            data: None,
            bitfield: None,
        }
    }

    pub fn error() -> Self {
        Self {
            status: Status::Error,
            data: None,
            bitfield: None,
        }
    }

    pub fn piece(data: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            data: Some(data),
            bitfield: None,
        }
    }

    pub fn bitfield(indices: Vec<u32>) -> Self {
        Self {
            status: Status::Ok,
            data: None,
            bitfield: Some(indices),
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        match encoded {
            Some(s) => STANDARD
                .decode(s.as_bytes())
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
