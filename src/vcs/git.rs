//! `git` executable bridge.

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use super::{parse_name_status, VcsChange, VersionControl};
use crate::error::{EngineError, Result};

/// Bridge over one git working tree.
#[derive(Debug, Clone)]
pub struct GitBridge {
    root: PathBuf,
}

impl GitBridge {
    /// Bind to the working tree containing `repo`.
    pub fn open(repo: &Path) -> Result<Self> {
        let output = run_git(repo, &["rev-parse", "--show-toplevel"])?;
        let root = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
        let root = root.canonicalize().map_err(|e| EngineError::io(&root, e))?;
        log::info!("Bound git repository: {}", root.display());
        Ok(Self { root })
    }

    /// Whether a `git` executable can be run.
    #[must_use]
    pub fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = run_git(&self.root, args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl VersionControl for GitBridge {
    fn root(&self) -> &Path {
        &self.root
    }

    fn diff(&self, base: &str, target: &str) -> Result<Vec<VcsChange>> {
        let (base, target) = (revision_arg(base)?, revision_arg(target)?);
        let out = self.git(&[
            "-c",
            "core.quotepath=off",
            "diff",
            "--name-status",
            "-M",
            base,
            target,
        ])?;
        let changes = parse_name_status(&out, &self.root, base, target);
        log::debug!("git diff {base}..{target}: {} changes", changes.len());
        Ok(changes)
    }

    fn head(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn revision_of(&self, path: &Path) -> Result<Option<String>> {
        let path = path.to_string_lossy();
        let id = self.git(&["hash-object", "--", path.as_ref()])?;
        let id = id.trim();
        Ok((!id.is_empty()).then(|| id.to_string()))
    }

    fn commit_time(&self, revision: &str) -> Result<Option<f64>> {
        let revision = revision_arg(revision)?;
        let out = self.git(&["show", "-s", "--format=%ct", revision])?;
        Ok(out.trim().parse::<f64>().ok())
    }
}

/// Reject revisions git would read as options (`--output=...`).
fn revision_arg(revision: &str) -> Result<&str> {
    if revision.is_empty() || revision.starts_with('-') {
        return Err(EngineError::InvalidRequest(format!(
            "invalid revision: {revision:?}"
        )));
    }
    Ok(revision)
}

fn run_git(dir: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| EngineError::Vcs(format!("Failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EngineError::Vcs(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }
    Ok(output)
}
