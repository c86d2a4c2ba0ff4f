//! Deterministic path → partition routing.
//!
//! The partition of a path is the first byte of the BLAKE3 digest of its
//! UTF-8 (lossy) bytes, modulo the partition count. The mapping is stable
//! across processes and platforms for a fixed partition count; changing the
//! count invalidates every stored location.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

const PREFIX: &str = "partition_";

/// Identifier of one partition store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PartitionId(u16);

impl PartitionId {
    /// Wrap a partition index.
    #[must_use]
    pub fn new(index: u16) -> Self {
        Self(index)
    }

    /// Zero-based partition index.
    #[must_use]
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

impl FromStr for PartitionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(PREFIX)
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| format!("malformed partition id: {s}"))
    }
}

impl From<PartitionId> for String {
    fn from(id: PartitionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for PartitionId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Maps every path to exactly one of `count` partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRouter {
    count: u16,
}

impl PartitionRouter {
    /// Create a router over `count` partitions (clamped to 1..=256).
    #[must_use]
    pub fn new(count: usize) -> Self {
        let count = count.clamp(1, crate::config::MAX_PARTITIONS);
        Self {
            count: count as u16,
        }
    }

    /// Number of partitions.
    #[must_use]
    pub fn count(&self) -> usize {
        usize::from(self.count)
    }

    /// Partition owning `path`.
    #[must_use]
    pub fn partition_for(&self, path: &Path) -> PartitionId {
        let digest = blake3::hash(path.to_string_lossy().as_bytes());
        let byte = u16::from(digest.as_bytes()[0]);
        PartitionId(byte % self.count)
    }

    /// All partition ids in order.
    pub fn ids(&self) -> impl Iterator<Item = PartitionId> {
        (0..self.count).map(PartitionId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_for_is_deterministic() {
        let router = PartitionRouter::new(4);
        let path = Path::new("/home/user/project/src/main.py");
        let first = router.partition_for(path);
        for _ in 0..10 {
            assert_eq!(router.partition_for(path), first);
        }
        assert_eq!(PartitionRouter::new(4).partition_for(path), first);
    }

    #[test]
    fn test_partition_within_range() {
        let router = PartitionRouter::new(3);
        for i in 0..200 {
            let id = router.partition_for(Path::new(&format!("/tmp/file_{i}.rs")));
            assert!(id.index() < 3);
        }
    }

    #[test]
    fn test_paths_spread_over_partitions() {
        let router = PartitionRouter::new(4);
        let mut seen = [false; 4];
        for i in 0..200 {
            seen[router.partition_for(Path::new(&format!("/p/{i}"))).index()] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_single_partition() {
        let router = PartitionRouter::new(1);
        assert_eq!(
            router.partition_for(Path::new("/anything")),
            PartitionId::new(0)
        );
    }

    #[test]
    fn test_partition_id_roundtrip() {
        let id = PartitionId::new(7);
        assert_eq!(id.to_string(), "partition_7");
        assert_eq!("partition_7".parse::<PartitionId>().unwrap(), id);
        assert!("partition_x".parse::<PartitionId>().is_err());
        assert!("7".parse::<PartitionId>().is_err());
        assert_eq!(
            PartitionRouter::new(3).ids().collect::<Vec<_>>(),
            vec![PartitionId::new(0), PartitionId::new(1), PartitionId::new(2)]
        );
    }
}
