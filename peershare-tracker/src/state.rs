//! Authoritative in-memory state: users, groups and files.
//!
//! One reader/writer lock guards all three maps. Read-only RPCs take the
//! shared lock, everything else the exclusive lock; persistence and gossip
//! are scheduled only after the lock has been released.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use peershare_common::{ChunkInfo, ContentHash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub password: String,
    #[serde(default)]
    pub logged_in: bool,
    #[serde(default)]
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub owner: String,
    pub members: BTreeSet<String>,
    pub pending: BTreeSet<String>,
}

impl Group {
    pub fn new(group_id: impl Into<String>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        Self {
            group_id: group_id.into(),
            members: BTreeSet::from([owner.clone()]),
            pending: BTreeSet::new(),
            owner,
        }
    }
}

/// A shared file: its chunk manifest plus the set of seeders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_name: String,
    pub group_id: String,
    pub uploader: String,
    pub file_size: u64,
    pub file_hash: ContentHash,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub chunks: Vec<ChunkInfo>,
    pub owners: BTreeSet<String>,
}

/// Files are keyed by `(group_id, file_name)`; the flattened form keeps the
/// persisted JSON a plain string-keyed map.
pub fn file_key(group_id: &str, file_name: &str) -> String {
    format!("{group_id}:{file_name}")
}

/// The three maps, as one cloneable value. Doubles as the persisted document
/// and the full snapshot exchanged during anti-entropy pull.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub users: HashMap<String, User>,
    #[serde(default)]
    pub groups: HashMap<String, Group>,
    #[serde(default)]
    pub files: HashMap<String, FileRecord>,
}

/// Handle to the tracker's authoritative state.
#[derive(Debug, Default)]
pub struct TrackerState {
    inner: RwLock<StateSnapshot>,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, StateSnapshot> {
        self.inner.read().unwrap()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, StateSnapshot> {
        self.inner.write().unwrap()
    }

    /// Clone the full state under the shared lock.
    pub fn snapshot(&self) -> StateSnapshot {
        self.read().clone()
    }

    /// Replace the state wholesale (startup load).
    pub fn restore(&self, snapshot: StateSnapshot) {
        *self.write() = snapshot;
    }

    /// Insert-if-absent merge of a peer snapshot. Existing records are never
    /// overwritten; conflicting fields converge through the regular gossip
    /// path instead.
    pub fn merge(&self, snapshot: StateSnapshot) {
        let mut state = self.write();
        for (id, user) in snapshot.users {
            state.users.entry(id).or_insert(user);
        }
        for (id, group) in snapshot.groups {
            state.groups.entry(id).or_insert(group);
        }
        for (key, file) in snapshot.files {
            state.files.entry(key).or_insert(file);
        }
    }
}
