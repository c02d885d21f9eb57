//! Tracker cluster configuration.
//!
//! A plain text file with one `host:port` per line; `#` starts a comment and
//! blank lines are ignored. A 1-based line number selects which entry is
//! this process, the remaining entries become gossip peers.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("line number {index} out of range (1-{len})")]
    IndexOutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Address this tracker listens on.
    pub listen_addr: String,
    /// Every other tracker in the cluster.
    pub peers: Vec<String>,
}

impl TrackerConfig {
    /// Single-node default used when no config file is given.
    pub fn standalone(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            peers: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>, index: usize) -> Result<Self, ConfigError> {
        let addrs = read_addresses(path.as_ref())?;
        if index == 0 || index > addrs.len() {
            return Err(ConfigError::IndexOutOfRange {
                index,
                len: addrs.len(),
            });
        }

        let listen_addr = addrs[index - 1].clone();
        let peers = addrs
            .into_iter()
            .filter(|addr| *addr != listen_addr)
            .collect();

        Ok(Self { listen_addr, peers })
    }
}

/// All addresses in the file, in order, comments and blanks stripped.
pub fn read_addresses(path: &Path) -> Result<Vec<String>, std::io::Error> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_lines_skipping_comments_and_blanks() {
        let f = config_file("# cluster\n127.0.0.1:9000\n\n127.0.0.1:9001\n  127.0.0.1:9002\n");
        let cfg = TrackerConfig::load(f.path(), 2).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9001");
        assert_eq!(cfg.peers, vec!["127.0.0.1:9000", "127.0.0.1:9002"]);
    }

    #[test]
    fn index_is_one_based_and_bounded() {
        let f = config_file("127.0.0.1:9000\n");
        assert!(matches!(
            TrackerConfig::load(f.path(), 0),
            Err(ConfigError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            TrackerConfig::load(f.path(), 2),
            Err(ConfigError::IndexOutOfRange { .. })
        ));
        assert!(TrackerConfig::load(f.path(), 1).is_ok());
    }
}
