//! Version-control bridge.
//!
//! A [`VersionControl`] implementation turns a revision diff into
//! [`VcsChange`] records that the engine applies to the cache. [`GitBridge`]
//! shells out to the `git` executable.

mod git;

pub use git::GitBridge;

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Kind of change between two revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
    Unknown,
}

impl ChangeKind {
    /// Map a name-status letter (`A`, `M`, `D`, `R100`, ...) to a kind.
    #[must_use]
    pub fn from_status(status: &str) -> Self {
        match status.chars().next() {
            Some('A') => Self::Added,
            Some('M') => Self::Modified,
            Some('D') => Self::Deleted,
            Some('R') => Self::Renamed,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Renamed => "renamed",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One changed path between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VcsChange {
    /// Absolute path after the change (the new path of a rename).
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// Absolute path before a rename.
    pub previous_path: Option<PathBuf>,
    pub old_revision: Option<String>,
    pub new_revision: Option<String>,
}

/// Source of revision diffs and per-file revision ids.
pub trait VersionControl: Send + Sync + fmt::Debug {
    /// Working tree root; change paths are resolved against it.
    fn root(&self) -> &Path;

    /// Changes between `base` and `target`.
    fn diff(&self, base: &str, target: &str) -> Result<Vec<VcsChange>>;

    /// Current head revision.
    fn head(&self) -> Result<String>;

    /// Object id of the file's current content, if tracked content can be hashed.
    fn revision_of(&self, path: &Path) -> Result<Option<String>>;

    /// Commit time of `revision` in unix seconds.
    fn commit_time(&self, revision: &str) -> Result<Option<f64>>;
}

/// Parse `--name-status` output into changes rooted at `root`.
///
/// Blank and malformed lines are skipped.
#[must_use]
pub fn parse_name_status(output: &str, root: &Path, base: &str, target: &str) -> Vec<VcsChange> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let status = fields.next()?.trim();
            if status.is_empty() {
                return None;
            }
            let first = fields.next()?;
            let kind = ChangeKind::from_status(status);
            let (path, previous_path) = match (kind, fields.next()) {
                (ChangeKind::Renamed, Some(new)) => (root.join(new), Some(root.join(first))),
                _ => (root.join(first), None),
            };
            Some(VcsChange {
                path,
                kind,
                previous_path,
                old_revision: Some(base.to_string()),
                new_revision: Some(target.to_string()),
            })
        })
        .collect()
}
