//! The caching engine.
//!
//! [`CacheEngine`] owns the store, the in-memory tiers, the pattern engine
//! and the optional version-control bridge. One instance is shared (behind an
//! `Arc`) by request handlers and the maintenance scheduler; every operation
//! takes `&self`.
//!
//! # Locking
//!
//! * connection pool: one lock for lookup/creation, one per connection
//! * hot and warm tiers: one lock each
//! * counters: atomics
//! * bridge slot and last synced head: their own locks
//! * ingestion and removal: serialized per path by [`PathLocks`]
//!
//! # Counters
//!
//! A hit is a fresh `cache_file` or a `get_content` answered from a tier or
//! the index. A miss is an ingestion or a `get_content` for an unknown path.

mod ingest;
mod locks;
mod stats;
mod sync;
mod warm;

pub use locks::PathLocks;
pub use stats::EngineStats;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use crate::cache::{TieredCache, VulnerabilityRecord};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::report::{
    EngineInfo, HealthReport, PerformanceMetrics, SecurityReport, VULNERABILITY_QUERY_LIMIT,
};
use crate::security::{PatternEngine, Severity};
use crate::store::Store;
use crate::vcs::VersionControl;

const FEATURES: &[&str] = &[
    "partitioned_store",
    "two_tier_cache",
    "security_analysis",
    "compression",
    "version_control_sync",
    "maintenance",
];

/// Shared caching engine.
pub struct CacheEngine {
    config: Config,
    allowed_roots: Vec<PathBuf>,
    store: Store,
    tiers: TieredCache,
    patterns: PatternEngine,
    vcs: RwLock<Option<Arc<dyn VersionControl>>>,
    last_head: Mutex<Option<String>>,
    locks: PathLocks,
    stats: EngineStats,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("cache_dir", &self.config.cache_dir)
            .field("partitions", &self.store.router().count())
            .finish_non_exhaustive()
    }
}

impl CacheEngine {
    /// Validate `config`, open the stores and reconcile dangling rows.
    pub fn open(config: Config) -> Result<Self> {
        let config = config.validated()?;
        let store = Store::open(&config)?;
        store.reconcile()?;

        let allowed_roots = config
            .allowed_dirs
            .iter()
            .map(|dir| dir.canonicalize().unwrap_or_else(|_| dir.clone()))
            .collect();
        let patterns = PatternEngine::builtin()?;
        let tiers = TieredCache::new(
            config.hot_cache_size,
            config.warm_cache_size,
            config.warm_ttl(),
        );

        log::info!(
            "Cache engine ready at {} ({} partitions, {} security patterns)",
            config.cache_dir.display(),
            store.router().count(),
            patterns.patterns().len()
        );
        Ok(Self {
            config,
            allowed_roots,
            store,
            tiers,
            patterns,
            vcs: RwLock::new(None),
            last_head: Mutex::new(None),
            locks: PathLocks::new(),
            stats: EngineStats::default(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    #[must_use]
    pub fn tiers(&self) -> &TieredCache {
        &self.tiers
    }

    #[must_use]
    pub fn patterns(&self) -> &PatternEngine {
        &self.patterns
    }

    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Wipe every partition, the index, the vulnerability log and both tiers.
    ///
    /// Without `confirm` nothing is touched.
    pub fn clear(&self, confirm: bool) -> Result<()> {
        if !confirm {
            log::warn!("Refusing to clear cache without confirmation");
            return Err(EngineError::NotConfirmed);
        }
        self.store.clear()?;
        self.tiers.clear();
        log::info!("Cache cleared");
        Ok(())
    }

    /// Compact every store.
    pub fn optimize(&self) -> Result<()> {
        self.store.optimize()
    }

    /// Snapshot the counters and append it to the metrics log.
    pub fn performance_metrics(&self) -> Result<PerformanceMetrics> {
        let partition_balance: BTreeMap<String, u64> = self
            .store
            .partition_stats()?
            .into_iter()
            .map(|p| (p.id.to_string(), p.file_count))
            .collect();
        let (hot_entries, warm_entries) = self.tiers.sizes();
        let metrics = PerformanceMetrics {
            cache_hits: self.stats.hits(),
            cache_misses: self.stats.misses(),
            hit_rate: self.stats.hit_rate(),
            cached_files: self.store.entry_count()?,
            errors: self.stats.errors(),
            ingested_bytes: self.stats.ingested_bytes(),
            memory_bytes: process_memory(),
            hot_entries,
            warm_entries,
            partition_balance,
        };

        self.store.record_metrics(
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.hit_rate,
            metrics.memory_bytes,
            &metrics.partition_balance,
        )?;
        Ok(metrics)
    }

    pub fn security_report(&self) -> Result<SecurityReport> {
        self.store.aggregate_report(self.config.risk_threshold)
    }

    /// Unresolved findings, newest first, capped at 100.
    pub fn vulnerabilities(&self, severity: Option<Severity>) -> Result<Vec<VulnerabilityRecord>> {
        self.store
            .query_vulnerabilities(severity, VULNERABILITY_QUERY_LIMIT)
    }

    pub fn health(&self) -> HealthReport {
        let index_reachable = self.store.ping();
        HealthReport {
            status: if index_reachable { "healthy" } else { "degraded" },
            index_reachable,
            hit_rate: self.stats.hit_rate(),
            cached_files: self.store.entry_count().unwrap_or(0),
            partitions: self.store.router().count(),
            version_control: self.version_control().is_some(),
        }
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            features: FEATURES.to_vec(),
            security_patterns: self.patterns.patterns().len(),
        }
    }

    /// Close store connections. Later operations reopen them lazily.
    pub fn close(&self) {
        self.store.close();
        log::debug!("Cache engine closed");
    }
}

fn process_memory() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = sysinfo::System::new();
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory())
}
