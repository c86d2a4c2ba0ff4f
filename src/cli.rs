//! Command-line interface definitions for CodeVault.
//!
//! Every subcommand except `watch` maps onto one command of the JSON command
//! surface and prints its result.
//!
//! ```bash
//! # Cache one file, forcing a re-read
//! codevault cache src/app.py --force
//!
//! # Warm the cache from glob patterns
//! codevault warm 'src/**/*.py' 'config/*.yml'
//!
//! # Sync a git checkout between two revisions
//! codevault git-update HEAD~3 HEAD --repo .
//!
//! # Run maintenance until Ctrl+C
//! codevault -v watch --repo .
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Security-aware content cache for source trees.
#[derive(Debug, Parser)]
#[command(name = "codevault")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Override the cache directory
    #[arg(long, value_name = "PATH", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Override the largest ingestible file (e.g., 10MB, 1GiB)
    #[arg(long, value_name = "SIZE", global = true, value_parser = parse_size)]
    pub max_file_size: Option<u64>,

    /// Print errors as JSON objects
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Cache one file
    Cache(CacheArgs),
    /// Cache every file matched by glob patterns
    Warm(WarmArgs),
    /// Print the cached content of a file
    Get(PathArg),
    /// Show whether a file is cached
    Check(PathArg),
    /// Show performance metrics
    Stats,
    /// Show the aggregate security report
    SecurityReport,
    /// Re-scan every cached source file
    Scan,
    /// Apply the changes between two revisions
    GitUpdate(GitUpdateArgs),
    /// List unresolved vulnerabilities
    Vulnerabilities(VulnerabilityArgs),
    /// Delete every cached entry
    Clear(ClearArgs),
    /// Compact the stores
    Optimize,
    /// Show engine health
    Health,
    /// Show engine name, version and features
    Info,
    /// Run background maintenance until interrupted
    Watch(WatchArgs),
    /// Execute a raw JSON request
    Request(RequestArgs),
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    /// File to cache
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Re-read the file even if the cached entry is fresh
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct WarmArgs {
    /// Glob patterns (`*` stays within a directory, `**` recurses)
    #[arg(value_name = "PATTERN", required = true)]
    pub patterns: Vec<String>,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Debug, Args)]
pub struct PathArg {
    #[arg(value_name = "PATH")]
    pub path: PathBuf,
}

#[derive(Debug, Args)]
pub struct GitUpdateArgs {
    /// Base revision
    pub base: String,

    /// Target revision
    pub target: String,

    /// Repository to bind before syncing
    #[arg(long, value_name = "PATH", default_value = ".")]
    pub repo: PathBuf,
}

#[derive(Debug, Args)]
pub struct VulnerabilityArgs {
    /// Only show this severity (low, medium, high, critical)
    #[arg(short, long)]
    pub severity: Option<String>,
}

#[derive(Debug, Args)]
pub struct ClearArgs {
    /// Confirm deletion of every cached entry
    #[arg(short = 'y', long)]
    pub yes: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Repository to keep in sync
    #[arg(long, value_name = "PATH")]
    pub repo: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// JSON request; `-` reads it from stdin
    #[arg(value_name = "JSON", default_value = "-")]
    pub json: String,
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// ```
/// use codevault::cli::parse_size;
///
/// assert_eq!(parse_size("1024").unwrap(), 1024);
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1MiB").unwrap(), 1_048_576);
/// ```
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
