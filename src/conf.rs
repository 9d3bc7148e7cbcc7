//! Parses `Common.cfg` and `PeerInfo.cfg` into an immutable configuration
//! value passed by reference throughout the engine.
//!
//! Both files use a bespoke whitespace-separated line format rather than an
//! existing serialization format, so they're parsed by hand.

use std::{collections::HashMap, fs, path::Path, time::Duration};

use crate::{error::Error, PeerId};

/// The parsed contents of `Common.cfg`.
#[derive(Clone, Debug)]
pub struct CommonConfig {
    /// `k`, the number of preferred neighbors chosen each unchoking interval.
    pub number_of_preferred_neighbors: usize,
    /// How often the preferred-neighbor scheduler runs.
    pub unchoking_interval: Duration,
    /// How often the optimistic-unchoke scheduler runs.
    pub optimistic_unchoking_interval: Duration,
    /// The shared file's name, relative to each peer's `peer_<id>` directory.
    pub file_name: String,
    /// The shared file's total size, in bytes.
    pub file_size: u64,
    /// The nominal size of a piece, in bytes. The last piece may be shorter.
    pub piece_size: u32,
}

impl CommonConfig {
    /// The number of pieces the file is divided into.
    pub fn piece_count(&self) -> usize {
        crate::piece_count(self.file_size, self.piece_size)
    }

    /// Parses `Common.cfg`-formatted text.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut fields: HashMap<String, String> = HashMap::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let key = parts.next().ok_or_else(|| {
                Error::Config(format!("Common.cfg:{}: missing key", line_no + 1))
            })?;
            let value = parts.next().ok_or_else(|| {
                Error::Config(format!(
                    "Common.cfg:{}: missing value for key {}",
                    line_no + 1,
                    key
                ))
            })?;
            fields.insert(key.to_string(), value.to_string());
        }

        let get = |key: &str| -> Result<&str, Error> {
            fields
                .get(key)
                .map(|s| s.as_str())
                .ok_or_else(|| Error::Config(format!("Common.cfg: missing key {}", key)))
        };
        let get_u64 = |key: &str| -> Result<u64, Error> { Ok(get(key)?.parse()?) };
        let get_u32 = |key: &str| -> Result<u32, Error> { Ok(get(key)?.parse()?) };

        Ok(Self {
            number_of_preferred_neighbors: get_u64("NumberOfPreferredNeighbors")?
                as usize,
            unchoking_interval: Duration::from_secs(get_u64("UnchokingInterval")?),
            optimistic_unchoking_interval: Duration::from_secs(get_u64(
                "OptimisticUnchokingInterval",
            )?),
            file_name: get("FileName")?.to_string(),
            file_size: get_u64("FileSize")?,
            piece_size: get_u32("PieceSize")?,
        })
    }

    /// Reads and parses `Common.cfg` from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("failed to read {:?}: {}", path.as_ref(), e))
        })?;
        Self::parse(&text)
    }
}

/// One line of `PeerInfo.cfg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: PeerId,
    pub host: String,
    pub port: u16,
    /// Whether this peer has the complete file at process start.
    pub is_seed: bool,
}

/// The ordered peer directory (`PeerInfo.cfg`), immutable after startup.
///
/// Line order defines the bootstrap rule of §4.6: a peer connects outbound
/// to every peer listed strictly before it and expects inbound connections
/// from peers listed strictly after it.
#[derive(Clone, Debug)]
pub struct PeerDirectory {
    entries: Vec<PeerEntry>,
}

impl PeerDirectory {
    /// Parses `PeerInfo.cfg`-formatted text.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut entries = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let err = || {
                Error::Config(format!("PeerInfo.cfg:{}: malformed line", line_no + 1))
            };
            let id: PeerId = parts.next().ok_or_else(err)?.parse()?;
            let host = parts.next().ok_or_else(err)?.to_string();
            let port: u16 = parts.next().ok_or_else(err)?.parse()?;
            let is_seed = parts.next().ok_or_else(err)? == "1";
            entries.push(PeerEntry {
                id,
                host,
                port,
                is_seed,
            });
        }
        Ok(Self { entries })
    }

    /// Reads and parses `PeerInfo.cfg` from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("failed to read {:?}: {}", path.as_ref(), e))
        })?;
        Self::parse(&text)
    }

    /// All entries, in file order.
    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }

    /// Looks up the entry for `id`.
    pub fn get(&self, id: PeerId) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// The peers listed strictly before `id`: the outbound connection set
    /// for `id` during bootstrap.
    pub fn earlier_than(&self, id: PeerId) -> impl Iterator<Item = &PeerEntry> {
        self.entries.iter().take_while(move |e| e.id != id)
    }
}

/// The aggregate configuration handed to the engine by reference.
#[derive(Clone, Debug)]
pub struct Conf {
    pub common: CommonConfig,
    pub peers: PeerDirectory,
}

impl Conf {
    /// Loads `Common.cfg` and `PeerInfo.cfg` from the given directory.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        Ok(Self {
            common: CommonConfig::load(dir.join("Common.cfg"))?,
            peers: PeerDirectory::load(dir.join("PeerInfo.cfg"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMON: &str = "\
NumberOfPreferredNeighbors 2
UnchokingInterval 5
OptimisticUnchokingInterval 15
FileName thefile.dat
FileSize 10000
PieceSize 1000
";

    const PEERS: &str = "\
1001 lin114-00.cise.ufl.edu 6008 1
1002 lin114-01.cise.ufl.edu 6008 0
1003 lin114-02.cise.ufl.edu 6008 0
";

    #[test]
    fn test_parse_common() {
        let conf = CommonConfig::parse(COMMON).unwrap();
        assert_eq!(conf.number_of_preferred_neighbors, 2);
        assert_eq!(conf.unchoking_interval, Duration::from_secs(5));
        assert_eq!(conf.optimistic_unchoking_interval, Duration::from_secs(15));
        assert_eq!(conf.file_name, "thefile.dat");
        assert_eq!(conf.file_size, 10000);
        assert_eq!(conf.piece_size, 1000);
        assert_eq!(conf.piece_count(), 10);
    }

    #[test]
    fn test_parse_common_missing_key_errors() {
        let truncated = "NumberOfPreferredNeighbors 2\n";
        assert!(CommonConfig::parse(truncated).is_err());
    }

    #[test]
    fn test_parse_peers_preserves_order() {
        let dir = PeerDirectory::parse(PEERS).unwrap();
        let ids: Vec<_> = dir.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1001, 1002, 1003]);
        assert!(dir.get(1001).unwrap().is_seed);
        assert!(!dir.get(1002).unwrap().is_seed);
    }

    #[test]
    fn test_earlier_than_follows_bootstrap_rule() {
        let dir = PeerDirectory::parse(PEERS).unwrap();
        assert_eq!(dir.earlier_than(1001).count(), 0);
        let earlier: Vec<_> = dir.earlier_than(1003).map(|e| e.id).collect();
        assert_eq!(earlier, vec![1001, 1002]);
    }

    #[test]
    fn test_unknown_peer_lookup_is_none() {
        let dir = PeerDirectory::parse(PEERS).unwrap();
        assert!(dir.get(9999).is_none());
    }
}
