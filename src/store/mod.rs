//! Partitioned persistent store.
//!
//! # Layout
//!
//! ```text
//! <cache_dir>/
//!   index.db                 entries, vulnerabilities, vcs_commits, metrics
//!   partitions/
//!     partition_0.db         blobs of paths routed to partition 0
//!     partition_1.db
//!     ...
//! ```
//!
//! # Write ordering
//!
//! The index and the partitions are separate databases, so one ingestion is
//! two commits. Blobs are written before their index row and index rows are
//! deleted before their blob; a crash in between leaves at most an orphan
//! blob or a row without content, both of which [`Store::reconcile`] removes.

pub mod index;
pub mod partition;
pub mod pool;
pub mod router;

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::{now, CacheEntry, VulnerabilityRecord};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::report::{
    ReconcileReport, RiskyEntry, SecurityReport, SecuritySummary, VulnerabilityGroup,
    LOWEST_SCORING_LIMIT,
};
use crate::security::{FileClass, Finding, Severity};

pub use partition::StoredBlob;
pub use pool::{ConnectionPool, PooledConnection};
pub use router::{PartitionId, PartitionRouter};

/// Aggregate figures of one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionInfo {
    pub id: PartitionId,
    pub file_count: u64,
    pub total_size: u64,
    pub last_updated: Option<f64>,
}

/// Index store plus partition stores behind one connection pool.
#[derive(Debug)]
pub struct Store {
    pool: ConnectionPool,
    router: PartitionRouter,
    index_file: PathBuf,
    partition_dir: PathBuf,
}

impl Store {
    /// Create the directory layout and every schema.
    pub fn open(config: &Config) -> Result<Self> {
        let partition_dir = config.partition_dir();
        fs::create_dir_all(&partition_dir).map_err(|e| EngineError::io(&partition_dir, e))?;

        let store = Self {
            pool: ConnectionPool::new(),
            router: PartitionRouter::new(config.partition_count),
            index_file: config.index_path(),
            partition_dir,
        };

        store.with_index(|conn| index::init_schema(conn))?;
        for id in store.router.ids() {
            store.with_partition(id, |conn| partition::init_schema(conn))?;
        }
        log::debug!(
            "Opened store at {} with {} partitions",
            config.cache_dir.display(),
            store.router.count()
        );
        Ok(store)
    }

    #[must_use]
    pub fn router(&self) -> PartitionRouter {
        self.router
    }

    /// Pooled handle for the index store.
    pub fn index_connection(&self) -> Result<PooledConnection> {
        self.pool.get(&self.index_file)
    }

    /// Pooled handle for one partition store.
    pub fn partition_connection(&self, id: PartitionId) -> Result<PooledConnection> {
        self.pool.get(&self.partition_file(id))
    }

    fn partition_file(&self, id: PartitionId) -> PathBuf {
        self.partition_dir.join(format!("{id}.db"))
    }

    fn with_index<T>(&self, f: impl FnOnce(&mut rusqlite::Connection) -> Result<T>) -> Result<T> {
        self.pool.with(&self.index_file, f)
    }

    fn with_partition<T>(
        &self,
        id: PartitionId,
        f: impl FnOnce(&mut rusqlite::Connection) -> Result<T>,
    ) -> Result<T> {
        self.pool.with(&self.partition_file(id), f)
    }

    pub fn upsert_index_entry(&self, entry: &CacheEntry) -> Result<()> {
        self.with_index(|conn| index::upsert_entry(conn, entry))
    }

    /// Store the blob of `path` in its owning partition.
    pub fn upsert_partition_blob(&self, path: &Path, blob: &StoredBlob) -> Result<PartitionId> {
        let id = self.router.partition_for(path);
        self.with_partition(id, |conn| partition::put_blob(conn, path, blob, now()))?;
        Ok(id)
    }

    pub fn get_blob(&self, path: &Path) -> Result<Option<StoredBlob>> {
        let id = self.router.partition_for(path);
        self.with_partition(id, |conn| partition::get_blob(conn, path))
    }

    /// Remove `path` from the index (with its findings) and then from its partition.
    ///
    /// Returns whether anything existed.
    pub fn delete_by_path(&self, path: &Path) -> Result<bool> {
        let had_entry = self.with_index(|conn| index::delete_entry(conn, path))?;
        let id = self.router.partition_for(path);
        let had_blob = self.with_partition(id, |conn| partition::delete_blob(conn, path))?;
        Ok(had_entry || had_blob)
    }

    pub fn query_entry(&self, path: &Path) -> Result<Option<CacheEntry>> {
        self.with_index(|conn| index::query_entry(conn, path))
    }

    /// Record one access on the index row.
    pub fn touch_entry(&self, path: &Path, at: f64) -> Result<bool> {
        self.with_index(|conn| index::touch_entry(conn, path, at))
    }

    pub fn update_security(&self, path: &Path, score: f64, findings: &[Finding]) -> Result<()> {
        self.with_index(|conn| index::update_security(conn, path, score, findings))
    }

    /// Resolve `path`'s open findings and record `findings` in their place.
    pub fn replace_vulnerabilities(&self, path: &Path, findings: &[Finding]) -> Result<()> {
        self.with_index(|conn| index::replace_vulnerabilities(conn, path, findings, now()))
    }

    pub fn query_vulnerabilities(
        &self,
        severity: Option<Severity>,
        limit: usize,
    ) -> Result<Vec<VulnerabilityRecord>> {
        self.with_index(|conn| index::query_vulnerabilities(conn, severity, limit))
    }

    pub fn entries_by_class(&self, class: FileClass) -> Result<Vec<CacheEntry>> {
        self.with_index(|conn| index::entries_by_class(conn, class))
    }

    pub fn entries_by_revision(&self, revision: &str) -> Result<Vec<CacheEntry>> {
        self.with_index(|conn| index::entries_by_revision(conn, revision))
    }

    pub fn entries_by_score(&self, min: f64, max: f64) -> Result<Vec<CacheEntry>> {
        self.with_index(|conn| index::entries_by_score(conn, min, max))
    }

    pub fn entries_by_partition(&self, id: PartitionId) -> Result<Vec<CacheEntry>> {
        self.with_index(|conn| index::entries_by_partition(conn, id))
    }

    pub fn entry_count(&self) -> Result<u64> {
        self.with_index(|conn| index::entry_count(conn))
    }

    /// Security summary, grouped open findings and the lowest-scoring entries.
    pub fn aggregate_report(&self, risk_threshold: f64) -> Result<SecurityReport> {
        self.with_index(|conn| {
            let (total_files, average_score, high_risk_files) =
                index::score_summary(conn, risk_threshold)?;
            let open_vulnerabilities = index::open_vulnerability_count(conn)?;
            let vulnerabilities = index::vulnerability_breakdown(conn)?
                .into_iter()
                .map(|(severity, kind, count)| VulnerabilityGroup {
                    severity,
                    kind,
                    count,
                })
                .collect();
            let lowest_scoring = index::lowest_scoring(conn, LOWEST_SCORING_LIMIT)?
                .into_iter()
                .map(RiskyEntry::from)
                .collect();

            Ok(SecurityReport {
                generated_at: chrono::Utc::now(),
                summary: SecuritySummary {
                    total_files,
                    average_score,
                    high_risk_files,
                    open_vulnerabilities,
                },
                vulnerabilities,
                lowest_scoring,
            })
        })
    }

    pub fn record_commit(
        &self,
        commit_id: &str,
        commit_time: Option<f64>,
        files_changed: usize,
    ) -> Result<()> {
        self.with_index(|conn| {
            index::record_commit(conn, commit_id, commit_time, files_changed, now())
        })
    }

    pub fn commit_count(&self) -> Result<u64> {
        self.with_index(|conn| index::commit_count(conn))
    }

    pub fn record_metrics(
        &self,
        hits: u64,
        misses: u64,
        hit_rate: f64,
        memory_bytes: Option<u64>,
        balance: &BTreeMap<String, u64>,
    ) -> Result<()> {
        self.with_index(|conn| {
            index::record_metrics(conn, now(), hits, misses, hit_rate, memory_bytes, balance)
        })
    }

    /// Per-partition file counts and stored sizes.
    pub fn partition_stats(&self) -> Result<Vec<PartitionInfo>> {
        self.router
            .ids()
            .map(|id| -> Result<PartitionInfo> {
                let stats = self.with_partition(id, |conn| partition::stats(conn))?;
                Ok(PartitionInfo {
                    id,
                    file_count: stats.file_count,
                    total_size: stats.total_size,
                    last_updated: stats.last_updated,
                })
            })
            .collect()
    }

    /// Whether the index answers a trivial query.
    pub fn ping(&self) -> bool {
        self.with_index(|conn| Ok(conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?))
            .is_ok()
    }

    /// Empty the index (entries, findings, commit log) and every partition.
    pub fn clear(&self) -> Result<()> {
        self.with_index(|conn| index::clear(conn))?;
        for id in self.router.ids() {
            self.with_partition(id, |conn| partition::clear(conn))?;
        }
        log::info!("Cleared index and {} partitions", self.router.count());
        Ok(())
    }

    /// Reclaim free pages in every store and refresh index statistics.
    pub fn optimize(&self) -> Result<()> {
        for id in self.router.ids() {
            self.with_partition(id, |conn| Ok(conn.execute_batch("VACUUM")?))?;
        }
        self.with_index(|conn| Ok(conn.execute_batch("VACUUM; ANALYZE;")?))?;
        log::info!("Optimized index and {} partitions", self.router.count());
        Ok(())
    }

    /// Drop index rows with no blob in their partition and blobs with no index row.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let indexed = self.with_index(|conn| index::all_locations(conn))?;

        let mut stored: HashSet<(PathBuf, String)> = HashSet::new();
        for id in self.router.ids() {
            for path in self.with_partition(id, |conn| partition::paths(conn))? {
                stored.insert((path, id.to_string()));
            }
        }

        let indexed_keys: HashSet<(PathBuf, String)> = indexed.iter().cloned().collect();
        for (path, key) in &indexed {
            if !stored.contains(&(path.clone(), key.clone())) {
                self.with_index(|conn| index::delete_entry(conn, path))?;
                report.removed_entries += 1;
                log::warn!("Dropped index entry without content: {}", path.display());
            }
        }
        for (path, key) in &stored {
            if !indexed_keys.contains(&(path.clone(), key.clone())) {
                let id: PartitionId = key.parse().map_err(EngineError::InvalidRequest)?;
                self.with_partition(id, |conn| partition::delete_blob(conn, path))?;
                report.removed_blobs += 1;
                log::warn!("Dropped orphan blob: {} ({key})", path.display());
            }
        }

        if report.removed_entries + report.removed_blobs > 0 {
            log::info!(
                "Reconciled store: {} entries and {} blobs removed",
                report.removed_entries,
                report.removed_blobs
            );
        }
        Ok(report)
    }

    /// Close every pooled connection.
    pub fn close(&self) {
        self.pool.close_all();
    }
}
