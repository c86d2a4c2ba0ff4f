//! Sync against real git repositories. Skipped when `git` is not installed.

use codevault::command::{dispatch, Request};
use codevault::config::Config;
use codevault::engine::CacheEngine;
use codevault::vcs::{ChangeKind, GitBridge, VersionControl};
use std::fs;
use std::path::{Path, PathBuf};
use serde_json::json;
use std::process::Command;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A fresh repository with `files` committed. Returns (dir, root, commit).
fn setup_repo(files: &[(&str, &str)]) -> Option<(TempDir, PathBuf, String)> {
    if !GitBridge::is_available() {
        eprintln!("git not available; skipping");
        return None;
    }
    let dir = tempdir().unwrap();
    let root = dir.path().join("repo");
    fs::create_dir(&root).unwrap();
    git(&root, &["init", "-q", "-b", "main"]);
    git(&root, &["config", "user.email", "test@example.com"]);
    git(&root, &["config", "user.name", "Test"]);
    for (name, content) in files {
        fs::write(root.join(name), content).unwrap();
    }
    let head = commit(&root, "initial");
    let root = root.canonicalize().unwrap();
    Some((dir, root, head))
}

fn commit(root: &Path, message: &str) -> String {
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", message]);
    git(root, &["rev-parse", "HEAD"])
}

fn engine(dir: &TempDir) -> CacheEngine {
    CacheEngine::open(Config {
        cache_dir: dir.path().join("cache"),
        allowed_dirs: vec![dir.path().to_path_buf()],
        partition_count: 2,
        ..Config::default()
    })
    .unwrap()
}

#[test]
fn test_deleted_file_leaves_no_trace() {
    let Some((dir, root, base)) = setup_repo(&[("foo.py", "x = 1\n"), ("bar.py", "y = 2\n")])
    else {
        return;
    };
    let engine = engine(&dir);
    engine.set_repo(&root).unwrap();
    let foo = root.join("foo.py");
    let bar = root.join("bar.py");
    engine.cache_file(&foo, false).unwrap();
    engine.cache_file(&bar, false).unwrap();

    fs::remove_file(&foo).unwrap();
    fs::write(&bar, "password = \"abc123\"\n").unwrap();
    let target = commit(&root, "drop foo");

    let summary = engine.sync(&base, &target).unwrap();
    assert_eq!(summary.changes, 2);
    assert_eq!(summary.removed, 1);
    assert_eq!(summary.ingested, 1);

    assert!(engine.store().query_entry(&foo).unwrap().is_none());
    assert!(engine.store().get_blob(&foo).unwrap().is_none());

    let bar_entry = engine.store().query_entry(&bar).unwrap().unwrap();
    assert_eq!(bar_entry.security_score, 80.0);
    assert_eq!(
        bar_entry.revision.as_deref(),
        Some(git(&root, &["hash-object", "bar.py"]).as_str())
    );
    assert_eq!(engine.store().commit_count().unwrap(), 1);
}

#[test]
fn test_rename_moves_entry() {
    let Some((dir, root, base)) = setup_repo(&[("old_name.py", "value = 42\nprint(value)\n")])
    else {
        return;
    };
    let engine = engine(&dir);
    engine.set_repo(&root).unwrap();
    let old = root.join("old_name.py");
    engine.cache_file(&old, false).unwrap();

    git(&root, &["mv", "old_name.py", "new_name.py"]);
    let target = commit(&root, "rename");

    let bridge = GitBridge::open(&root).unwrap();
    let changes = bridge.diff(&base, &target).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, ChangeKind::Renamed);
    assert_eq!(changes[0].previous_path.as_deref(), Some(old.as_path()));

    let summary = engine.sync(&base, &target).unwrap();
    assert_eq!((summary.removed, summary.ingested), (1, 1));
    assert!(!engine.check(&old).unwrap().cached);
    assert!(engine.check(&root.join("new_name.py")).unwrap().cached);
}

#[test]
fn test_incremental_sync_follows_head() {
    let Some((dir, root, _)) = setup_repo(&[("a.py", "a = 1\n")]) else {
        return;
    };
    let engine = engine(&dir);
    engine.set_repo(&root).unwrap();
    assert!(engine.incremental_sync().unwrap().is_none());

    fs::write(root.join("b.py"), "b = 2\n").unwrap();
    commit(&root, "add b");

    let summary = engine.incremental_sync().unwrap().unwrap();
    assert_eq!(summary.changes, 1);
    assert_eq!(summary.ingested, 1);
    assert!(engine.check(&root.join("b.py")).unwrap().cached);
    assert!(engine.incremental_sync().unwrap().is_none());
}

#[test]
fn test_bad_revision_is_an_error() {
    let Some((dir, root, base)) = setup_repo(&[("a.py", "a = 1\n")]) else {
        return;
    };
    let engine = engine(&dir);
    engine.set_repo(&root).unwrap();
    assert!(engine.sync(&base, "no-such-revision").is_err());
    assert_eq!(engine.store().commit_count().unwrap(), 0);
}

#[test]
fn test_option_like_revision_is_rejected() {
    let Some((dir, root, base)) = setup_repo(&[("a.py", "a = 1\n")]) else {
        return;
    };
    fs::write(root.join("a.py"), "a = 2\n").unwrap();
    commit(&root, "touch a");
    let victim = dir.path().join("victim.txt");
    fs::write(&victim, "precious\n").unwrap();

    let engine = Arc::new(engine(&dir));
    let bound = dispatch(&engine, &Request::new("set_repo", json!({ "path": root })));
    assert_eq!(bound["status"], "ok", "{bound}");

    let option = format!("--output={}", victim.display());
    for (from, to) in [(option.as_str(), "HEAD"), (base.as_str(), option.as_str())] {
        let result = dispatch(
            &engine,
            &Request::new("git_update", json!({ "base": from, "target": to })),
        );
        assert_eq!(result["status"], "error", "{result}");
    }
    assert_eq!(fs::read_to_string(&victim).unwrap(), "precious\n");
    assert_eq!(engine.store().commit_count().unwrap(), 0);
}

#[test]
fn test_set_repo_outside_git_fails() {
    if !GitBridge::is_available() {
        return;
    }
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let plain = dir.path().join("plain");
    fs::create_dir(&plain).unwrap();
    assert!(engine.set_repo(&plain).is_err());
    assert!(engine.version_control().is_none());
}
