//! Cache entry definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::security::{FileClass, Finding, Severity};
use crate::store::PartitionId;

/// Where an entry's bytes live: owning partition plus content checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentLocation {
    /// Partition holding the blob.
    pub partition: PartitionId,
    /// Checksum of the uncompressed content.
    pub checksum: String,
}

impl fmt::Display for ContentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.checksum)
    }
}

impl FromStr for ContentLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (partition, checksum) = s
            .split_once('/')
            .ok_or_else(|| format!("malformed content location: {s}"))?;
        Ok(Self {
            partition: partition.parse()?,
            checksum: checksum.to_string(),
        })
    }
}

/// Free-form descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Guessed mime type.
    pub mime_type: Option<String>,
    /// Text encoding assumed when decoding for analysis.
    pub encoding: String,
    /// Newline count of the uncompressed content (text classes only).
    pub lines: Option<usize>,
}

/// Metadata for one cached path. Exactly one entry exists per path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Canonical absolute path (unique key).
    pub path: PathBuf,
    /// BLAKE3 hex digest of the uncompressed content.
    pub checksum: String,
    /// Original size in bytes.
    pub size: u64,
    /// File modification time (unix seconds).
    pub modified_time: f64,
    /// When the entry was ingested (unix seconds).
    pub cached_time: f64,
    /// Whether the stored blob is gzip-compressed.
    pub compressed: bool,
    /// Number of accesses, including the ingesting one.
    pub access_count: u64,
    /// Last access (unix seconds).
    pub last_accessed: f64,
    /// Owning partition and checksum.
    pub location: ContentLocation,
    /// File classification.
    pub file_class: FileClass,
    /// Version-control object id, when a bridge resolved one.
    pub revision: Option<String>,
    /// 0-100, 100 meaning clean; below 100 only for analyzed source files.
    pub security_score: f64,
    /// Findings in rule declaration order.
    pub findings: Vec<Finding>,
    /// Descriptive metadata.
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Partition owning this entry's content.
    #[must_use]
    pub fn partition(&self) -> PartitionId {
        self.location.partition
    }

    /// Mark one more access at `now`.
    pub fn touch(&mut self, now: f64) {
        self.access_count += 1;
        self.last_accessed = now;
    }
}

/// A persisted finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityRecord {
    /// Row id.
    pub id: i64,
    /// File the finding belongs to.
    pub path: PathBuf,
    /// Finding type (rule description).
    #[serde(rename = "type")]
    pub kind: String,
    /// Finding severity.
    pub severity: Severity,
    /// Line number, when known.
    pub line_number: Option<i64>,
    /// Detection time (unix seconds).
    pub detected_at: f64,
    /// Whether the finding was superseded or resolved.
    pub resolved: bool,
}

/// Convert a timestamp to fractional unix seconds.
#[must_use]
pub fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current time as fractional unix seconds.
#[must_use]
pub fn now() -> f64 {
    unix_seconds(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_content_location_display_and_parse() {
        let loc = ContentLocation {
            partition: PartitionId::new(3),
            checksum: "abcd".into(),
        };
        assert_eq!(loc.to_string(), "partition_3/abcd");
        assert_eq!("partition_3/abcd".parse::<ContentLocation>().unwrap(), loc);
        assert!("nonsense".parse::<ContentLocation>().is_err());
    }

    #[test]
    fn test_unix_seconds() {
        let t = UNIX_EPOCH + Duration::from_millis(1500);
        assert_eq!(unix_seconds(t), 1.5);
        assert!(now() > 1_600_000_000.0);
    }
}
