//! File chunking and the on-disk chunk store.
//!
//! Files are split into fixed 512 KiB chunks (only the last may be
//! smaller), each chunk SHA-256 hashed. Chunks live under
//! `<root>/<file_hash>/chunk_<i>.dat` next to a `metadata.json` manifest;
//! the directory's survival across runs is what makes downloads resumable
//! and lets the peer server serve whatever is already present.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use peershare_common::{ChunkInfo, ChunkManifest, ContentHash, CHUNK_SIZE};
use sha2::{Digest, Sha256};

use crate::error::ClientError;

pub const CHUNKS_DIR: &str = ".chunks";
const METADATA_FILE: &str = "metadata.json";

/// SHA-256 of a whole file, streamed.
pub fn hash_file(path: impl AsRef<Path>) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentHash::new(hasher.finalize().into()))
}

/// Split a file into the chunk manifest the tracker records.
///
/// Empty files are rejected here, before any tracker interaction.
pub fn chunk_file(path: impl AsRef<Path>) -> Result<ChunkManifest, ClientError> {
    let path = path.as_ref();
    let file_size = std::fs::metadata(path)?.len();
    if file_size == 0 {
        return Err(ClientError::EmptyFile);
    }

    let file_hash = hash_file(path)?;
    let total_chunks = file_size.div_ceil(CHUNK_SIZE) as u32;

    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; CHUNK_SIZE as usize];
    let mut chunks = Vec::with_capacity(total_chunks as usize);

    for index in 0..total_chunks {
        let n = read_chunk_into(&mut file, &mut buffer)?;
        chunks.push(ChunkInfo {
            index,
            hash: ContentHash::digest(&buffer[..n]),
            size: n as u64,
        });
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(ChunkManifest {
        file_name,
        file_size,
        file_hash,
        chunk_size: CHUNK_SIZE,
        total_chunks,
        chunks,
    })
}

/// Fill `buf` as far as the file allows; short only at EOF.
fn read_chunk_into(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Handle to the local chunk directory tree.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, file_hash: &ContentHash) -> PathBuf {
        self.root.join(file_hash.to_hex())
    }

    /// True when we hold any chunks of this file (the handshake check).
    pub fn has_file(&self, file_hash: &ContentHash) -> bool {
        self.dir(file_hash).is_dir()
    }

    pub fn chunk_path(&self, file_hash: &ContentHash, index: u32) -> PathBuf {
        self.dir(file_hash).join(format!("chunk_{index}.dat"))
    }

    pub fn has_chunk(&self, file_hash: &ContentHash, index: u32) -> bool {
        self.chunk_path(file_hash, index).is_file()
    }

    pub fn read_chunk(&self, file_hash: &ContentHash, index: u32) -> io::Result<Vec<u8>> {
        std::fs::read(self.chunk_path(file_hash, index))
    }

    /// Write one chunk via temp-file-then-rename, so an interrupt never
    /// leaves a torn `chunk_<i>.dat` behind.
    pub fn write_chunk(&self, file_hash: &ContentHash, index: u32, data: &[u8]) -> io::Result<()> {
        let dir = self.dir(file_hash);
        std::fs::create_dir_all(&dir)?;

        let final_path = self.chunk_path(file_hash, index);
        let tmp_path = dir.join(format!("chunk_{index}.dat.tmp"));
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &final_path)
    }

    /// The chunk indices present on disk for a file — the local bitfield.
    pub fn present_indices(&self, file_hash: &ContentHash) -> io::Result<Vec<u32>> {
        let mut indices = Vec::new();
        for entry in std::fs::read_dir(self.dir(file_hash))? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(index) = name
                .strip_prefix("chunk_")
                .and_then(|rest| rest.strip_suffix(".dat"))
                .and_then(|digits| digits.parse::<u32>().ok())
            {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        Ok(indices)
    }

    pub fn write_manifest(&self, manifest: &ChunkManifest) -> io::Result<()> {
        let dir = self.dir(&manifest.file_hash);
        std::fs::create_dir_all(&dir)?;
        let data = serde_json::to_vec_pretty(manifest)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(dir.join(METADATA_FILE), data)
    }

    pub fn read_manifest(&self, file_hash: &ContentHash) -> io::Result<ChunkManifest> {
        let data = std::fs::read(self.dir(file_hash).join(METADATA_FILE))?;
        serde_json::from_slice(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Every manifest in the store (the `show_downloads` listing).
    pub fn list_manifests(&self) -> Vec<ChunkManifest> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut manifests: Vec<ChunkManifest> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let data = std::fs::read(e.path().join(METADATA_FILE)).ok()?;
                serde_json::from_slice(&data).ok()
            })
            .collect();
        manifests.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        manifests
    }

    /// Split a local source file into the store (upload path): one
    /// `chunk_<i>.dat` per manifest entry plus `metadata.json`.
    pub fn import_file(
        &self,
        path: impl AsRef<Path>,
        manifest: &ChunkManifest,
    ) -> io::Result<()> {
        let dir = self.dir(&manifest.file_hash);
        std::fs::create_dir_all(&dir)?;

        let mut file = File::open(path)?;
        let mut buffer = vec![0u8; manifest.chunk_size as usize];
        for chunk in &manifest.chunks {
            let n = read_chunk_into(&mut file, &mut buffer)?;
            let n = n.min(chunk.size as usize);
            self.write_chunk(&manifest.file_hash, chunk.index, &buffer[..n])?;
        }

        self.write_manifest(manifest)
    }

    /// Concatenate `chunk_0 .. chunk_{total-1}` into the destination file.
    pub fn assemble(
        &self,
        file_hash: &ContentHash,
        total_chunks: u32,
        dest: impl AsRef<Path>,
    ) -> io::Result<()> {
        let mut out = File::create(dest)?;
        for index in 0..total_chunks {
            let data = self.read_chunk(file_hash, index)?;
            out.write_all(&data)?;
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_source(dir: &Path, name: &str, len: usize) -> PathBuf {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "empty.bin", 0);
        assert!(matches!(chunk_file(&path), Err(ClientError::EmptyFile)));
    }

    #[test]
    fn single_chunk_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "small.bin", 5);

        let manifest = chunk_file(&path).unwrap();
        assert_eq!(manifest.total_chunks, 1);
        assert_eq!(manifest.chunks.len(), 1);
        assert_eq!(manifest.chunks[0].size, 5);
        assert_eq!(manifest.file_size, 5);
    }

    #[test]
    fn exact_multiple_of_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "even.bin", 2 * CHUNK_SIZE as usize);

        let manifest = chunk_file(&path).unwrap();
        assert_eq!(manifest.total_chunks, 2);
        assert!(manifest.chunks.iter().all(|c| c.size == CHUNK_SIZE));
    }

    #[test]
    fn chunk_sizes_sum_to_file_size_and_only_last_is_short() {
        let dir = tempfile::tempdir().unwrap();
        let len = CHUNK_SIZE as usize + 100;
        let path = write_source(dir.path(), "odd.bin", len);

        let manifest = chunk_file(&path).unwrap();
        assert_eq!(manifest.total_chunks, 2);
        assert_eq!(
            manifest.chunks.iter().map(|c| c.size).sum::<u64>(),
            len as u64
        );
        assert_eq!(manifest.chunks[0].size, CHUNK_SIZE);
        assert_eq!(manifest.chunks[1].size, 100);
    }

    #[test]
    fn import_then_assemble_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let len = CHUNK_SIZE as usize + 4096;
        let path = write_source(dir.path(), "file.bin", len);

        let manifest = chunk_file(&path).unwrap();
        let store = ChunkStore::new(dir.path().join("chunks"));
        store.import_file(&path, &manifest).unwrap();

        // Every chunk on disk hashes to its manifest entry.
        for chunk in &manifest.chunks {
            let data = store.read_chunk(&manifest.file_hash, chunk.index).unwrap();
            assert_eq!(ContentHash::digest(&data), chunk.hash);
        }
        assert_eq!(
            store.present_indices(&manifest.file_hash).unwrap(),
            vec![0, 1]
        );

        let out = dir.path().join("out.bin");
        store
            .assemble(&manifest.file_hash, manifest.total_chunks, &out)
            .unwrap();
        assert_eq!(hash_file(&out).unwrap(), manifest.file_hash);
    }

    #[test]
    fn write_chunk_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        let hash = ContentHash::digest(b"f");

        store.write_chunk(&hash, 0, b"data").unwrap();
        assert!(store.has_chunk(&hash, 0));

        let names: Vec<String> = std::fs::read_dir(store.dir(&hash))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["chunk_0.dat"]);
    }

    #[test]
    fn manifest_round_trips_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_source(dir.path(), "m.bin", 64);
        let manifest = chunk_file(&path).unwrap();

        let store = ChunkStore::new(dir.path().join("chunks"));
        store.write_manifest(&manifest).unwrap();
        assert_eq!(store.read_manifest(&manifest.file_hash).unwrap(), manifest);
        assert_eq!(store.list_manifests(), vec![manifest]);
    }
}
