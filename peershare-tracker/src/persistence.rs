//! On-disk snapshot of tracker state.
//!
//! The whole state serializes to one JSON document, rewritten on every
//! mutation. Writes go to a temp file first and are renamed into place so a
//! crash mid-write cannot truncate the previous snapshot.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::state::StateSnapshot;

pub const DEFAULT_STATE_FILE: &str = "tracker_state.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    // Saves are fired from independent tasks; serialize them so two writers
    // never interleave on the temp file.
    save_lock: Mutex<()>,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot from disk. A missing file is not an error: the
    /// tracker starts empty.
    pub fn load(&self) -> Result<Option<StateSnapshot>, StoreError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Write the snapshot via temp-file-then-rename.
    pub async fn save(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");

        let _guard = self.save_lock.lock().await;
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::User;

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("tracker_state.json"));

        let mut snap = StateSnapshot::default();
        snap.users.insert(
            "alice".into(),
            User {
                user_id: "alice".into(),
                password: "pw".into(),
                logged_in: true,
                addr: "127.0.0.1:4000".into(),
            },
        );
        store.save(&snap).await.unwrap();

        let loaded = store.load().unwrap().expect("snapshot present");
        assert_eq!(loaded.users["alice"].addr, "127.0.0.1:4000");
        assert!(loaded.groups.is_empty());
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker_state.json");
        let store = Store::new(&path);
        store.save(&StateSnapshot::default()).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }
}
