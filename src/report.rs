//! Result types returned by engine operations.
//!
//! Every type serializes to the JSON object the command surface returns.
//!
//! # Security report schema
//!
//! ```json
//! {
//!   "generated_at": "2026-01-01T00:00:00Z",
//!   "summary": {
//!     "total_files": 120,
//!     "average_score": 96.5,
//!     "high_risk_files": 2,
//!     "open_vulnerabilities": 7
//!   },
//!   "vulnerabilities": [
//!     { "severity": "CRITICAL", "type": "Command injection risk", "count": 1 }
//!   ],
//!   "lowest_scoring": [
//!     { "path": "/src/app.py", "security_score": 40.0, "file_class": "source", "findings": [] }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cache::CacheEntry;
use crate::security::{FileClass, Finding, Severity};

/// Entries listed in the lowest-scoring section of a security report.
pub const LOWEST_SCORING_LIMIT: usize = 20;

/// Cap on records returned by a vulnerability query.
pub const VULNERABILITY_QUERY_LIMIT: usize = 100;

/// Counters and sizes of a running engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Percentage, 0 when no lookups happened yet.
    pub hit_rate: f64,
    /// Indexed entries.
    pub cached_files: u64,
    /// Ingestion and lookup failures since start.
    pub errors: u64,
    /// Bytes ingested since start (original sizes).
    pub ingested_bytes: u64,
    /// Resident memory of this process, when the platform reports it.
    pub memory_bytes: Option<u64>,
    pub hot_entries: usize,
    pub warm_entries: usize,
    /// Stored blobs per partition.
    pub partition_balance: BTreeMap<String, u64>,
}

/// Aggregate figures over every indexed entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecuritySummary {
    pub total_files: u64,
    pub average_score: f64,
    /// Entries scoring below the configured risk threshold.
    pub high_risk_files: u64,
    pub open_vulnerabilities: u64,
}

/// Unresolved findings of one (severity, type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VulnerabilityGroup {
    pub severity: Severity,
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u64,
}

/// One entry in the lowest-scoring list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskyEntry {
    pub path: PathBuf,
    pub security_score: f64,
    pub file_class: FileClass,
    pub findings: Vec<Finding>,
}

impl From<CacheEntry> for RiskyEntry {
    fn from(entry: CacheEntry) -> Self {
        Self {
            path: entry.path,
            security_score: entry.security_score,
            file_class: entry.file_class,
            findings: entry.findings,
        }
    }
}

/// Security posture of the cached tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityReport {
    pub generated_at: DateTime<Utc>,
    pub summary: SecuritySummary,
    /// Most severe first.
    pub vulnerabilities: Vec<VulnerabilityGroup>,
    /// Lowest score first.
    pub lowest_scoring: Vec<RiskyEntry>,
}

/// Outcome of a batch warm.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmReport {
    /// Distinct matching files attempted.
    pub processed: usize,
    /// Files that produced an entry.
    pub cached: usize,
    /// Files that did not.
    pub errors: usize,
    /// Matches never attempted: outside the allowed roots or over the size limit.
    pub skipped: usize,
    /// Sum of original sizes of cached files.
    pub total_size: u64,
    pub duration_secs: f64,
    pub files_per_second: f64,
}

impl WarmReport {
    /// Fill in timing figures.
    pub fn finish(&mut self, duration_secs: f64) {
        self.duration_secs = duration_secs;
        self.files_per_second = if duration_secs > 0.0 {
            self.processed as f64 / duration_secs
        } else {
            0.0
        };
    }
}

/// Outcome of applying one revision diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub base: String,
    pub target: String,
    /// Change records in the diff.
    pub changes: usize,
    /// Paths re-ingested.
    pub ingested: usize,
    /// Paths removed from the cache.
    pub removed: usize,
    /// Paths whose re-ingestion produced no entry.
    pub failed: usize,
}

/// Outcome of a full vulnerability re-scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Indexed source entries visited.
    pub scanned: usize,
    /// Entries whose score or findings changed.
    pub changed: usize,
    /// Entries whose content could not be loaded.
    pub failed: usize,
    /// Findings recorded by this scan.
    pub findings: usize,
}

/// Partition balance check. Detection only; nothing is moved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceCheck {
    /// Stored bytes per partition.
    pub sizes: BTreeMap<String, u64>,
    pub largest: u64,
    pub smallest: u64,
    /// `largest / (smallest + 1)`.
    pub ratio: f64,
    pub needs_rebalance: bool,
    /// Partitions above the per-partition target size.
    pub over_target: Vec<String>,
    /// Whether total stored bytes exceed the cache size limit.
    pub over_limit: bool,
}

/// Result of a removal pass run against dangling rows at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Index rows dropped because their blob was missing.
    pub removed_entries: usize,
    /// Blobs dropped because no index row referenced them.
    pub removed_blobs: usize,
}

/// Liveness summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub index_reachable: bool,
    pub hit_rate: f64,
    pub cached_files: u64,
    pub partitions: usize,
    pub version_control: bool,
}

/// Static description of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub features: Vec<&'static str>,
    pub security_patterns: usize,
}

/// Answer to a `check` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub path: PathBuf,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<EntrySummary>,
}

/// Compact view of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntrySummary {
    pub path: PathBuf,
    pub checksum: String,
    pub size: u64,
    pub compressed: bool,
    pub file_class: FileClass,
    pub partition: String,
    pub access_count: u64,
    pub last_accessed: f64,
    pub revision: Option<String>,
    pub security_score: f64,
    pub vulnerabilities: usize,
}

impl From<&CacheEntry> for EntrySummary {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            path: entry.path.clone(),
            checksum: entry.checksum.clone(),
            size: entry.size,
            compressed: entry.compressed,
            file_class: entry.file_class,
            partition: entry.partition().to_string(),
            access_count: entry.access_count,
            last_accessed: entry.last_accessed,
            revision: entry.revision.clone(),
            security_score: entry.security_score,
            vulnerabilities: entry.findings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warm_report_rate() {
        let mut report = WarmReport {
            processed: 10,
            ..WarmReport::default()
        };
        report.finish(2.0);
        assert_eq!(report.files_per_second, 5.0);

        let mut empty = WarmReport::default();
        empty.finish(0.0);
        assert_eq!(empty.files_per_second, 0.0);
    }

    #[test]
    fn test_vulnerability_group_serializes_type() {
        let group = VulnerabilityGroup {
            severity: Severity::High,
            kind: "Hardcoded password".into(),
            count: 3,
        };
        let json = serde_json::to_value(&group).unwrap();
        assert_eq!(json["type"], "Hardcoded password");
        assert_eq!(json["severity"], "HIGH");
    }
}
