//! The chunk-serving side of a peer.
//!
//! Bound to an ephemeral local port; the real address travels back to the
//! tracker via `update_address` so other downloaders can find us. Serves
//! exactly three one-shot requests out of the local chunk store.

use std::io;
use std::net::SocketAddr;

use peershare_common::{wire, PeerRequest, PeerResponse};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::chunk::ChunkStore;

pub struct PeerServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    store: ChunkStore,
}

impl PeerServer {
    /// Bind the listener; pass `127.0.0.1:0` for a dynamic port.
    pub async fn bind(store: ChunkStore, addr: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "peer server listening");
        Ok(Self {
            listener,
            local_addr,
            store,
        })
    }

    /// The actual bound address (meaningful after a `:0` bind).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop: one task per connection, one request per connection.
    pub async fn run(self) {
        loop {
            let (stream, _) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("peer accept error: {e}");
                    continue;
                }
            };
            let store = self.store.clone();
            tokio::spawn(async move {
                handle_peer_conn(store, stream).await;
            });
        }
    }
}

async fn handle_peer_conn(store: ChunkStore, mut stream: TcpStream) {
    let req: PeerRequest = match wire::recv(&mut stream).await {
        Ok(req) => req,
        Err(e) => {
            debug!("dropping malformed peer request: {e}");
            return;
        }
    };

    let resp = match req {
        PeerRequest::Handshake { file_hash } => {
            if store.has_file(&file_hash) {
                PeerResponse::ok()
            } else {
                PeerResponse::error()
            }
        }
        PeerRequest::GetPiece {
            file_hash,
            piece_idx,
        } => match store.read_chunk(&file_hash, piece_idx) {
            Ok(data) => PeerResponse::piece(data),
            Err(_) => PeerResponse::error(),
        },
        PeerRequest::GetBitfield { file_hash } => match store.present_indices(&file_hash) {
            Ok(indices) => PeerResponse::bitfield(indices),
            Err(_) => PeerResponse::error(),
        },
    };

    if let Err(e) = wire::send(&mut stream, &resp).await {
        debug!("failed to send peer response: {e}");
    }
}
