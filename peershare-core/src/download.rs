//! The chunk download engine.
//!
//! Fetches the file manifest from a tracker, orders chunks sequentially or
//! rarest-first from peer bitfield probes, pulls each missing chunk from a
//! peer over the two-connection handshake/get_piece contract, verifies it
//! against the manifest hash, and lands it atomically in the chunk store.
//! Chunks already on disk are skipped, which is the whole resume story.
//! A finished download registers us as a seeder with the tracker.

use std::path::Path;
use std::time::Duration;

use peershare_common::{
    wire, ContentHash, FileInfo, PeerRequest, PeerResponse, Status, TrackerRequest, WireError,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::chunk::ChunkStore;
use crate::error::ClientError;
use crate::tracker_conn::TrackerPool;

const PEER_DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const BITFIELD_IO_TIMEOUT: Duration = Duration::from_secs(3);
const CHUNK_IO_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub rarest_first: bool,
    pub chunk_delay: Option<Duration>,
}

/// What a finished download did; `fetched + skipped == total_chunks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadReport {
    pub total_chunks: u32,
    pub fetched: u32,
    pub skipped: u32,
}

/// One peer's advertised chunks. `None` means the probe failed or came back
/// empty: the peer is treated as holding every chunk.
#[derive(Debug, Clone)]
pub(crate) struct PeerAvailability {
    pub addr: String,
    pub bitfield: Option<Vec<bool>>,
}

impl PeerAvailability {
    fn has_chunk(&self, index: u32) -> bool {
        match &self.bitfield {
            None => true,
            Some(bits) => bits.get(index as usize).copied().unwrap_or(false),
        }
    }
}

pub struct Downloader<'a> {
    pool: &'a TrackerPool,
    store: &'a ChunkStore,
    options: DownloadOptions,
}

impl<'a> Downloader<'a> {
    pub fn new(pool: &'a TrackerPool, store: &'a ChunkStore, options: DownloadOptions) -> Self {
        Self {
            pool,
            store,
            options,
        }
    }

    pub async fn download(
        &self,
        group_id: &str,
        file_name: &str,
        dest: impl AsRef<Path>,
        user: &str,
    ) -> Result<DownloadReport, ClientError> {
        let file = self.fetch_file_info(group_id, file_name, user).await?;
        if file.peers.is_empty() {
            return Err(ClientError::NoPeers);
        }

        info!(
            "downloading {} [{}]: {} chunks, {} peers",
            file.file_name,
            file.file_hash,
            file.total_chunks,
            file.peers.len()
        );

        let availability = if self.options.rarest_first {
            probe_bitfields(&file.peers, &file.file_hash).await
        } else {
            file.peers
                .iter()
                .map(|addr| PeerAvailability {
                    addr: addr.clone(),
                    bitfield: None,
                })
                .collect()
        };

        let order: Vec<u32> = if self.options.rarest_first {
            build_rarity_order(&availability, file.total_chunks)
        } else {
            (0..file.total_chunks).collect()
        };

        let mut fetched = 0;
        let mut skipped = 0;
        for &index in &order {
            if self.store.has_chunk(&file.file_hash, index) {
                debug!("chunk {index} already on disk, skipping");
                skipped += 1;
                continue;
            }

            let peer = select_peer(&availability, index);
            debug!("fetching chunk {index} from {peer}");

            let data = fetch_chunk(&peer, &file.file_hash, index)
                .await
                .map_err(|e| e.for_chunk(index))?;

            let expected = file
                .chunks
                .get(index as usize)
                .ok_or(ClientError::InvalidResponse)?;
            if ContentHash::digest(&data) != expected.hash {
                return Err(ClientError::HashMismatch(index));
            }

            self.store
                .write_chunk(&file.file_hash, index, &data)
                .map_err(|e| ClientError::from(e).for_chunk(index))?;
            fetched += 1;

            if let Some(delay) = self.options.chunk_delay {
                tokio::time::sleep(delay).await;
            }
        }

        self.store
            .assemble(&file.file_hash, file.total_chunks, dest)?;
        self.store.write_manifest(&file.manifest())?;

        // Seeder promotion: let the tracker hand the next downloader to us.
        let register = TrackerRequest::new(
            "add_seeder",
            vec![group_id.to_owned(), file_name.to_owned(), user.to_owned()],
        );
        match self.pool.send(&register).await {
            Ok(resp) if resp.is_ok() => {
                info!("registered as seeder for {}", file.file_name)
            }
            Ok(resp) => warn!("seeder registration refused: {}", resp.message()),
            Err(e) => warn!("seeder registration failed: {e}"),
        }

        Ok(DownloadReport {
            total_chunks: file.total_chunks,
            fetched,
            skipped,
        })
    }

    async fn fetch_file_info(
        &self,
        group_id: &str,
        file_name: &str,
        user: &str,
    ) -> Result<FileInfo, ClientError> {
        let req = TrackerRequest::new(
            "get_file_info",
            vec![group_id.to_owned(), file_name.to_owned(), user.to_owned()],
        );
        let resp = self.pool.send_expect_ok(&req).await?;
        Ok(resp.parse_data()?)
    }
}

/// Ask every peer which chunks it holds. Probe failures and empty replies
/// leave the peer's bitfield unknown, i.e. assumed complete.
pub(crate) async fn probe_bitfields(
    peers: &[String],
    file_hash: &ContentHash,
) -> Vec<PeerAvailability> {
    let mut availability = Vec::with_capacity(peers.len());
    for addr in peers {
        let bitfield = query_bitfield(addr, file_hash).await;
        availability.push(PeerAvailability {
            addr: addr.clone(),
            bitfield,
        });
    }
    availability
}

async fn query_bitfield(peer: &str, file_hash: &ContentHash) -> Option<Vec<bool>> {
    let mut stream = timeout(PEER_DIAL_TIMEOUT, TcpStream::connect(peer))
        .await
        .ok()?
        .ok()?;

    let req = PeerRequest::GetBitfield {
        file_hash: *file_hash,
    };
    let resp: PeerResponse = timeout(BITFIELD_IO_TIMEOUT, async {
        wire::send(&mut stream, &req).await?;
        wire::recv(&mut stream).await
    })
    .await
    .ok()?
    .ok()?;

    let indices = match (resp.status, resp.bitfield) {
        (Status::Ok, Some(indices)) if !indices.is_empty() => indices,
        _ => return None,
    };

    let max = *indices.iter().max()? as usize;
    let mut bits = vec![false; max + 1];
    for index in indices {
        bits[index as usize] = true;
    }
    Some(bits)
}

/// Chunk indices sorted by ascending peer availability, ties broken by
/// ascending index. An unknown bitfield counts toward every chunk.
pub(crate) fn build_rarity_order(
    availability: &[PeerAvailability],
    total_chunks: u32,
) -> Vec<u32> {
    let count = |index: u32| {
        availability
            .iter()
            .filter(|peer| peer.has_chunk(index))
            .count()
    };

    let mut order: Vec<u32> = (0..total_chunks).collect();
    order.sort_by_key(|&index| (count(index), index));
    order
}

/// Peers advertising this chunk (or with unknown bitfields), falling back to
/// everyone if nobody qualifies; round-robin by chunk index.
fn select_peer(availability: &[PeerAvailability], index: u32) -> String {
    let qualified: Vec<&PeerAvailability> = availability
        .iter()
        .filter(|peer| peer.has_chunk(index))
        .collect();

    if qualified.is_empty() {
        availability[index as usize % availability.len()].addr.clone()
    } else {
        qualified[index as usize % qualified.len()].addr.clone()
    }
}

/// Pull one chunk: handshake on one connection, `get_piece` on a second.
/// Existing peer servers answer exactly one request per connection, so the
/// two-connection dance is part of the protocol.
async fn fetch_chunk(
    peer: &str,
    file_hash: &ContentHash,
    index: u32,
) -> Result<Vec<u8>, ClientError> {
    let mut stream = dial(peer).await?;
    let handshake: PeerResponse = exchange(
        &mut stream,
        &PeerRequest::Handshake {
            file_hash: *file_hash,
        },
    )
    .await?;
    if handshake.status != Status::Ok {
        return Err(ClientError::HandshakeFailed);
    }
    drop(stream);

    let mut stream = dial(peer).await?;
    let piece: PeerResponse = exchange(
        &mut stream,
        &PeerRequest::GetPiece {
            file_hash: *file_hash,
            piece_idx: index,
        },
    )
    .await?;
    if piece.status != Status::Ok {
        return Err(ClientError::ChunkFailed);
    }
    piece.data.ok_or(ClientError::ChunkFailed)
}

async fn dial(peer: &str) -> Result<TcpStream, ClientError> {
    let stream = timeout(PEER_DIAL_TIMEOUT, TcpStream::connect(peer))
        .await
        .map_err(|_| WireError::Io(std::io::ErrorKind::TimedOut.into()))?
        .map_err(WireError::Io)?;
    Ok(stream)
}

async fn exchange(
    stream: &mut TcpStream,
    req: &PeerRequest,
) -> Result<PeerResponse, ClientError> {
    let resp = timeout(CHUNK_IO_TIMEOUT, async {
        wire::send(stream, req).await?;
        wire::recv(stream).await
    })
    .await
    .map_err(|_| WireError::Io(std::io::ErrorKind::TimedOut.into()))??;
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(addr: &str, bits: Option<Vec<bool>>) -> PeerAvailability {
        PeerAvailability {
            addr: addr.into(),
            bitfield: bits,
        }
    }

    #[test]
    fn equal_counts_keep_sequential_order() {
        let availability = vec![
            peer("p1", Some(vec![true, true, true, true])),
            peer("p2", Some(vec![true, true, true, true])),
            peer("p3", Some(vec![true, true, true, true])),
        ];
        assert_eq!(build_rarity_order(&availability, 4), vec![0, 1, 2, 3]);
    }

    #[test]
    fn rarest_chunk_sorts_first() {
        // Chunk 2 is held only by p1; the rest by both.
        let availability = vec![
            peer("p1", Some(vec![true, true, true, true])),
            peer("p2", Some(vec![true, true, false, true])),
        ];
        assert_eq!(build_rarity_order(&availability, 4), vec![2, 0, 1, 3]);
    }

    #[test]
    fn full_rarity_gradient() {
        // chunk 0: 3 peers, chunk 1: 2, chunk 2: 1, chunk 3: 0.
        let availability = vec![
            peer("p1", Some(vec![true, true, true, false])),
            peer("p2", Some(vec![true, true, false, false])),
            peer("p3", Some(vec![true, false, false, false])),
        ];
        assert_eq!(build_rarity_order(&availability, 4), vec![3, 2, 1, 0]);
    }

    #[test]
    fn unknown_bitfield_counts_as_everything() {
        // p1 unknown (counts everywhere), p2 has only chunk 0: chunk 0 has
        // count 2, chunks 1 and 2 count 1.
        let availability = vec![
            peer("p1", None),
            peer("p2", Some(vec![true, false, false])),
        ];
        assert_eq!(build_rarity_order(&availability, 3), vec![1, 2, 0]);
    }

    #[test]
    fn short_bitfield_means_missing_high_chunks() {
        let availability = vec![peer("p1", Some(vec![true]))];
        assert_eq!(build_rarity_order(&availability, 3), vec![1, 2, 0]);
    }

    #[tokio::test]
    async fn probed_rarity_prefers_the_partial_seeders_gap() {
        use crate::peer_server::PeerServer;

        let dir = tempfile::tempdir().unwrap();
        let hash = ContentHash::digest(b"two-chunk file");

        // Alice holds both chunks, Bob only chunk 0.
        let alice_store = ChunkStore::new(dir.path().join("alice"));
        alice_store.write_chunk(&hash, 0, b"chunk zero").unwrap();
        alice_store.write_chunk(&hash, 1, b"chunk one").unwrap();
        let bob_store = ChunkStore::new(dir.path().join("bob"));
        bob_store.write_chunk(&hash, 0, b"chunk zero").unwrap();

        let mut peers = Vec::new();
        for store in [alice_store, bob_store] {
            let server = PeerServer::bind(store, "127.0.0.1:0").await.unwrap();
            peers.push(server.local_addr().to_string());
            tokio::spawn(server.run());
        }

        let availability = probe_bitfields(&peers, &hash).await;
        assert_eq!(availability[0].bitfield, Some(vec![true, true]));
        assert_eq!(availability[1].bitfield, Some(vec![true]));

        // Chunk 1 is rarer (one holder vs two): it must be fetched first.
        assert_eq!(build_rarity_order(&availability, 2), vec![1, 0]);
    }

    #[tokio::test]
    async fn unreachable_peer_probes_as_unknown() {
        use tokio::net::TcpListener;

        // Bind-then-drop leaves an address nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap().to_string();
        drop(listener);

        let availability =
            probe_bitfields(&[dead], &ContentHash::digest(b"gone")).await;
        assert!(availability[0].bitfield.is_none());
    }

    #[test]
    fn selection_prefers_peers_with_the_chunk() {
        let availability = vec![
            peer("p1", Some(vec![true, false])),
            peer("p2", Some(vec![true, true])),
        ];
        // Only p2 holds chunk 1.
        assert_eq!(select_peer(&availability, 1), "p2");
    }

    #[test]
    fn selection_falls_back_to_everyone() {
        let availability = vec![
            peer("p1", Some(vec![true])),
            peer("p2", Some(vec![true])),
        ];
        // Nobody advertises chunk 3: round-robin over the full list.
        assert_eq!(select_peer(&availability, 3), "p2");
    }
}
