//! Version-control sync, vulnerability re-scan and partition balance.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use super::CacheEngine;
use crate::cache::CacheEntry;
use crate::error::Result;
use crate::report::{RebalanceCheck, ScanSummary, SyncSummary};
use crate::security::FileClass;
use crate::vcs::{ChangeKind, GitBridge, VersionControl};

impl CacheEngine {
    /// Bind a git working tree as the version-control bridge.
    pub fn set_repo(&self, repo: &Path) -> Result<()> {
        let bridge = GitBridge::open(repo)?;
        self.set_version_control(Arc::new(bridge));
        Ok(())
    }

    /// Bind any bridge. The current head becomes the incremental sync baseline.
    pub fn set_version_control(&self, vcs: Arc<dyn VersionControl>) {
        let head = match vcs.head() {
            Ok(head) => Some(head),
            Err(e) => {
                log::warn!("Cannot read head of {}: {e}", vcs.root().display());
                None
            }
        };
        *self.last_head.lock().expect("sync head mutex poisoned") = head;
        *self.vcs.write().expect("bridge slot lock poisoned") = Some(vcs);
    }

    /// The bound bridge, if any.
    pub fn version_control(&self) -> Option<Arc<dyn VersionControl>> {
        self.vcs.read().expect("bridge slot lock poisoned").clone()
    }

    /// Apply the diff `base..target`: removals for deleted paths, forced
    /// re-ingestion for everything else.
    ///
    /// Without a bridge this is a no-op returning an empty summary.
    pub fn sync(&self, base: &str, target: &str) -> Result<SyncSummary> {
        let mut summary = SyncSummary {
            base: base.to_string(),
            target: target.to_string(),
            ..SyncSummary::default()
        };
        let Some(vcs) = self.version_control() else {
            log::debug!("No version control bound; sync skipped");
            return Ok(summary);
        };

        let changes = vcs.diff(base, target)?;
        summary.changes = changes.len();
        for change in &changes {
            if let Some(previous) = &change.previous_path {
                if self.remove(previous)? {
                    summary.removed += 1;
                }
            }
            if change.kind == ChangeKind::Deleted {
                if self.remove(&change.path)? {
                    summary.removed += 1;
                }
            } else if self.cache_file(&change.path, true).is_some() {
                summary.ingested += 1;
            } else {
                summary.failed += 1;
            }
        }

        let commit_time = vcs.commit_time(target).unwrap_or_else(|e| {
            log::debug!("No commit time for {target}: {e}");
            None
        });
        self.store
            .record_commit(target, commit_time, changes.len())?;

        log::info!(
            "Synced {base}..{target}: {} changes, {} ingested, {} removed, {} failed",
            summary.changes,
            summary.ingested,
            summary.removed,
            summary.failed
        );
        Ok(summary)
    }

    /// Sync from the last seen head to the current one.
    ///
    /// Returns `None` when no bridge is bound or the head has not moved.
    pub fn incremental_sync(&self) -> Result<Option<SyncSummary>> {
        let Some(vcs) = self.version_control() else {
            return Ok(None);
        };
        let head = vcs.head()?;

        let mut last = self.last_head.lock().expect("sync head mutex poisoned");
        let summary = match last.as_deref() {
            Some(previous) if previous == head => None,
            Some(previous) => Some(self.sync(previous, &head)?),
            None => {
                log::debug!("Recorded sync baseline {head}");
                None
            }
        };
        *last = Some(head);
        Ok(summary)
    }

    /// Re-run the pattern engine over every indexed source entry.
    ///
    /// Entries whose score or findings changed get their index row updated
    /// and their open findings superseded.
    pub fn scan_all(&self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        if !self.config.security_analysis {
            log::info!("Security analysis disabled; scan skipped");
            return Ok(summary);
        }

        for entry in self.store.entries_by_class(FileClass::Source)? {
            summary.scanned += 1;
            match self.locks.with(&entry.path, || self.rescan(&entry.path)) {
                Ok(Some(findings)) => {
                    summary.changed += 1;
                    summary.findings += findings;
                }
                Ok(None) => {}
                Err(e) => {
                    summary.failed += 1;
                    log::warn!("Re-scan failed for {}: {e}", entry.path.display());
                }
            }
        }

        log::info!(
            "Security scan: {} scanned, {} changed, {} failed",
            summary.scanned,
            summary.changed,
            summary.failed
        );
        Ok(summary)
    }

    /// Returns the new finding count when the analysis changed.
    fn rescan(&self, path: &Path) -> Result<Option<usize>> {
        // Re-read under the lock; the entry may have been replaced or removed.
        let Some(entry) = self.store.query_entry(path)? else {
            return Ok(None);
        };
        let content = self.load_content(&entry)?;
        let analysis = self
            .patterns
            .analyze(&String::from_utf8_lossy(&content), path);
        if unchanged(&entry, analysis.score, &analysis.findings) {
            return Ok(None);
        }

        self.store
            .update_security(path, analysis.score, &analysis.findings)?;
        self.store.replace_vulnerabilities(path, &analysis.findings)?;
        log::debug!(
            "Re-scored {}: {:.0} -> {:.0}",
            path.display(),
            entry.security_score,
            analysis.score
        );
        Ok(Some(analysis.findings.len()))
    }

    /// Compare partition sizes and report imbalance. Nothing is moved.
    pub fn rebalance_check(&self) -> Result<RebalanceCheck> {
        let partitions = self.store.partition_stats()?;
        let sizes: BTreeMap<String, u64> = partitions
            .iter()
            .map(|p| (p.id.to_string(), p.total_size))
            .collect();
        let largest = partitions.iter().map(|p| p.total_size).max().unwrap_or(0);
        let smallest = partitions.iter().map(|p| p.total_size).min().unwrap_or(0);
        let ratio = largest as f64 / (smallest as f64 + 1.0);
        let needs_rebalance = ratio >= self.config.rebalance_ratio;

        let over_target: Vec<String> = partitions
            .iter()
            .filter(|p| p.total_size > self.config.partition_target_size)
            .map(|p| p.id.to_string())
            .collect();
        let total: u64 = partitions.iter().map(|p| p.total_size).sum();
        let over_limit = total > self.config.cache_size_limit;

        if needs_rebalance {
            log::info!(
                "Partition imbalance {ratio:.1}x (largest {}, smallest {}); rebalancing is not performed",
                bytesize::ByteSize(largest),
                bytesize::ByteSize(smallest)
            );
        }
        for id in &over_target {
            log::warn!("{id} exceeds the partition target size");
        }
        if over_limit {
            log::warn!(
                "Stored content {} exceeds the cache size limit {}",
                bytesize::ByteSize(total),
                bytesize::ByteSize(self.config.cache_size_limit)
            );
        }

        Ok(RebalanceCheck {
            sizes,
            largest,
            smallest,
            ratio,
            needs_rebalance,
            over_target,
            over_limit,
        })
    }
}

fn unchanged(entry: &CacheEntry, score: f64, findings: &[crate::security::Finding]) -> bool {
    entry.security_score == score && entry.findings == findings
}
