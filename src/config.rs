//! Engine configuration.
//!
//! Configuration is layered with figment, lowest priority first:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. A TOML file (by default `<config_dir>/config.toml`)
//! 3. Environment variables prefixed with `CODEVAULT_` (`__` separates nesting)
//!
//! The merged result is validated before use, so every engine component can
//! rely on the invariants checked in [`Config::validate`].

use directories::{BaseDirs, ProjectDirs};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CODEVAULT_";

/// Largest supported partition count; the router keys on one digest byte.
pub const MAX_PARTITIONS: usize = 256;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Errors produced while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// figment failed to merge or extract the layers.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is outside its accepted range.
    #[error("Invalid configuration value for `{field}`: {reason}")]
    Invalid {
        /// Offending option name
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Writing the configuration file failed.
    #[error("Failed to save configuration to {path}: {reason}")]
    Save {
        /// Destination file
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// No platform directories could be determined.
    #[error("Failed to determine project directories")]
    NoProjectDirs,
}

/// Every recognized engine option with its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for the index store and partition stores.
    pub cache_dir: PathBuf,
    /// Only files under one of these roots may be cached.
    pub allowed_dirs: Vec<PathBuf>,
    /// Total stored bytes above which maintenance warns.
    pub cache_size_limit: u64,
    /// Per-partition size above which maintenance warns.
    pub partition_target_size: u64,
    /// Files larger than this are never ingested.
    pub max_file_size: u64,
    /// Files larger than this are stored gzip-compressed.
    pub compression_threshold: u64,
    /// gzip compression level (0-9).
    pub compression_level: u32,
    /// Files larger than this are read through a memory map.
    pub mmap_threshold: u64,
    /// Run the pattern engine on source files.
    pub security_analysis: bool,
    /// Worker count for cache warming.
    pub parallel_workers: usize,
    /// Hot tier capacity (entries).
    pub hot_cache_size: usize,
    /// Warm tier capacity (entries).
    pub warm_cache_size: usize,
    /// Warm tier entry lifetime in seconds.
    pub warm_ttl_secs: u64,
    /// Interval between incremental version-control syncs.
    pub sync_interval_secs: u64,
    /// Interval between full vulnerability re-scans.
    pub scan_interval_secs: u64,
    /// Interval between partition balance checks.
    pub rebalance_interval_secs: u64,
    /// Largest/smallest partition ratio that triggers a rebalance warning.
    pub rebalance_ratio: f64,
    /// Entries scoring below this count as high risk in reports.
    pub risk_threshold: f64,
    /// Extensions considered when warming (lower-case, leading dot).
    pub allowed_extensions: Vec<String>,
    /// Number of partition stores. Changing it invalidates existing routing.
    pub partition_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            allowed_dirs: default_allowed_dirs(),
            cache_size_limit: 10 * GIB,
            partition_target_size: 500 * MIB,
            max_file_size: 50 * MIB,
            compression_threshold: 100 * KIB,
            compression_level: 6,
            mmap_threshold: MIB,
            security_analysis: true,
            parallel_workers: 8,
            hot_cache_size: 1000,
            warm_cache_size: 5000,
            warm_ttl_secs: 3600,
            sync_interval_secs: 300,
            scan_interval_secs: 3600,
            rebalance_interval_secs: 3600,
            rebalance_ratio: 2.0,
            risk_threshold: 50.0,
            allowed_extensions: default_extensions(),
            partition_count: 4,
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment.
    ///
    /// When `path` is `None` the platform default config file is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::config_path().ok().filter(|p| p.exists()),
        };
        if let Some(file) = file {
            log::debug!("Loading configuration from {}", file.display());
            figment = figment.merge(Toml::file(file));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Extract and validate a configuration from a prepared figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract().map_err(Box::new)?;
        config.validated()
    }

    /// Validate and normalize the configuration.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        self.allowed_extensions = self
            .allowed_extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect();
        self.validate()?;
        Ok(self)
    }

    /// Check every option against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.partition_count == 0 || self.partition_count > MAX_PARTITIONS {
            return Err(invalid(
                "partition_count",
                format!("must be between 1 and {MAX_PARTITIONS}"),
            ));
        }
        if self.hot_cache_size == 0 {
            return Err(invalid("hot_cache_size", "must be greater than zero"));
        }
        if self.warm_cache_size == 0 {
            return Err(invalid("warm_cache_size", "must be greater than zero"));
        }
        if self.parallel_workers == 0 {
            return Err(invalid("parallel_workers", "must be greater than zero"));
        }
        if self.max_file_size == 0 {
            return Err(invalid("max_file_size", "must be greater than zero"));
        }
        if self.compression_level > 9 {
            return Err(invalid("compression_level", "must be between 0 and 9"));
        }
        for (field, value) in [
            ("warm_ttl_secs", self.warm_ttl_secs),
            ("sync_interval_secs", self.sync_interval_secs),
            ("scan_interval_secs", self.scan_interval_secs),
            ("rebalance_interval_secs", self.rebalance_interval_secs),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if !(self.rebalance_ratio >= 1.0) {
            return Err(invalid("rebalance_ratio", "must be at least 1.0"));
        }
        if !(0.0..=100.0).contains(&self.risk_threshold) {
            return Err(invalid("risk_threshold", "must be between 0 and 100"));
        }
        if self.allowed_dirs.is_empty() {
            return Err(invalid("allowed_dirs", "must list at least one directory"));
        }
        Ok(())
    }

    /// Save the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let save_err = |reason: String| ConfigError::Save {
            path: path.to_path_buf(),
            reason,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| save_err(e.to_string()))?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| save_err(e.to_string()))?;
        fs::write(path, content).map_err(|e| save_err(e.to_string()))
    }

    /// Get the default platform-specific configuration path.
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let dirs = project_dirs().ok_or(ConfigError::NoProjectDirs)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Path of the index store.
    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.cache_dir.join("index.db")
    }

    /// Directory holding the partition stores.
    #[must_use]
    pub fn partition_dir(&self) -> PathBuf {
        self.cache_dir.join("partitions")
    }

    /// Warm tier lifetime.
    #[must_use]
    pub fn warm_ttl(&self) -> Duration {
        Duration::from_secs(self.warm_ttl_secs)
    }

    /// Whether `path` carries one of the allowed extensions.
    #[must_use]
    pub fn extension_allowed(&self, path: &Path) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => {
                let ext = format!(".{}", ext.to_ascii_lowercase());
                self.allowed_extensions.iter().any(|a| *a == ext)
            }
            None => false,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "codevault", "codevault")
}

fn default_cache_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".codevault"))
}

fn default_allowed_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(base) = BaseDirs::new() {
        dirs.push(base.home_dir().to_path_buf());
    }
    dirs.push(std::env::temp_dir());
    dirs
}

fn default_extensions() -> Vec<String> {
    [
        ".py", ".js", ".ts", ".java", ".cs", ".go", ".php", ".rb", ".c", ".cpp", ".h", ".hpp",
        ".rs", ".swift", ".kt", ".yml", ".yaml", ".json", ".xml", ".conf", ".ini", ".md", ".txt",
        ".sql", ".sh", ".bash", ".ps1",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_ascii_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}
