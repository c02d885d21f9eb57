//! Persistent login session.
//!
//! One small JSON file in the working directory: written on login,
//! rewritten when the peer daemon learns its bound address, deleted on
//! logout.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub const SESSION_FILE: &str = ".peershare_session.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub listen_addr: String,
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        !self.user_id.is_empty()
    }

    /// Load the session, treating a missing file as "not logged in".
    pub fn load() -> io::Result<Self> {
        Self::load_from(SESSION_FILE)
    }

    pub fn load_from(path: impl AsRef<Path>) -> io::Result<Self> {
        match std::fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self) -> io::Result<()> {
        self.save_to(SESSION_FILE)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, data)
    }

    pub fn clear() -> io::Result<()> {
        Self::clear_at(SESSION_FILE)
    }

    pub fn clear_at(path: impl AsRef<Path>) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SESSION_FILE);

        let session = Session {
            user_id: "alice".into(),
            listen_addr: "127.0.0.1:50123".into(),
        };
        session.save_to(&path).unwrap();

        let loaded = Session::load_from(&path).unwrap();
        assert_eq!(loaded.user_id, "alice");
        assert!(loaded.is_logged_in());

        Session::clear_at(&path).unwrap();
        let empty = Session::load_from(&path).unwrap();
        assert!(!empty.is_logged_in());

        // Clearing twice is not an error.
        Session::clear_at(&path).unwrap();
    }
}
