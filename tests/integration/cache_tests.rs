use codevault::config::Config;
use codevault::engine::CacheEngine;
use codevault::error::EngineError;
use codevault::security::FileClass;
use codevault::store::{partition, StoredBlob};
use filetime::{set_file_mtime, FileTime};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;
use tempfile::{tempdir, TempDir};

fn config(dir: &TempDir) -> Config {
    Config {
        cache_dir: dir.path().join("cache"),
        allowed_dirs: vec![dir.path().to_path_buf()],
        partition_count: 3,
        compression_threshold: 256,
        ..Config::default()
    }
}

fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_password_scenario() {
    let dir = tempdir().unwrap();
    let engine = CacheEngine::open(config(&dir)).unwrap();
    let file = write(
        dir.path(),
        "login.py",
        "import os\npassword = \"abc123\"\nprint(password)\n",
    );

    let entry = engine.cache_file(&file, false).unwrap();
    assert_eq!(entry.file_class, FileClass::Source);
    assert_eq!(entry.security_score, 80.0);
    assert_eq!(entry.findings.len(), 1);
    assert_eq!(entry.findings[0].kind, "Hardcoded password");
    assert_eq!(entry.metadata.lines, Some(3));
    assert_eq!(entry.metadata.mime_type.as_deref(), Some("text/x-python"));
}

#[test]
fn test_unchanged_file_is_not_reread() {
    let dir = tempdir().unwrap();
    let engine = CacheEngine::open(config(&dir)).unwrap();
    let file = write(dir.path(), "a.py", "x = 1\n");

    let first = engine.cache_file(&file, false).unwrap();
    let second = engine.cache_file(&file, false).unwrap();
    assert_eq!(second.access_count, first.access_count + 1);
    assert_eq!(second.checksum, first.checksum);
    assert_eq!(second.cached_time, first.cached_time);
    assert!(second.last_accessed >= first.last_accessed);
    assert_eq!(engine.stats().misses(), 1);
    assert_eq!(engine.stats().hits(), 1);
}

#[test]
fn test_newer_mtime_triggers_reingest() {
    let dir = tempdir().unwrap();
    let engine = CacheEngine::open(config(&dir)).unwrap();
    let file = write(dir.path(), "a.py", "x = 1\n");
    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();
    let first = engine.cache_file(&file, false).unwrap();

    fs::write(&file, "token = 'abc'\n").unwrap();
    set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let second = engine.cache_file(&file, false).unwrap();

    assert_ne!(second.checksum, first.checksum);
    assert_eq!(second.modified_time, 1_700_000_000.0);
    assert_eq!(second.security_score, 80.0);
    assert_eq!(second.access_count, 2);
    assert_eq!(engine.stats().misses(), 2);
}

#[test]
fn test_compressed_blob_round_trip() {
    let dir = tempdir().unwrap();
    let engine = CacheEngine::open(config(&dir)).unwrap();
    let content = "line of readme text\n".repeat(100);
    let file = write(dir.path(), "README.md", &content);

    let entry = engine.cache_file(&file, false).unwrap();
    assert!(entry.compressed);

    let blob = engine.store().get_blob(&entry.path).unwrap().unwrap();
    assert!(blob.compressed);
    assert!(blob.content.len() < content.len());
    let mut raw = Vec::new();
    GzDecoder::new(&blob.content[..])
        .read_to_end(&mut raw)
        .unwrap();
    assert_eq!(blake3::hash(&raw).to_hex().to_string(), entry.checksum);

    assert_eq!(engine.get_content(&file).unwrap(), content.as_bytes());
}

#[test]
fn test_small_blob_stored_raw() {
    let dir = tempdir().unwrap();
    let engine = CacheEngine::open(config(&dir)).unwrap();
    let file = write(dir.path(), "notes.txt", "short\n");

    let entry = engine.cache_file(&file, false).unwrap();
    assert!(!entry.compressed);
    let blob = engine.store().get_blob(&entry.path).unwrap().unwrap();
    assert_eq!(blake3::hash(&blob.content).to_hex().to_string(), entry.checksum);
}

#[test]
fn test_content_survives_reopen() {
    let dir = tempdir().unwrap();
    let file = write(dir.path(), "a.rs", "fn main() {}\n");
    {
        let engine = CacheEngine::open(config(&dir)).unwrap();
        engine.cache_file(&file, false).unwrap();
        engine.close();
    }

    let engine = CacheEngine::open(config(&dir)).unwrap();
    assert_eq!(engine.get_content(&file).unwrap(), b"fn main() {}\n");
    assert_eq!(engine.stats().hits(), 1);
    assert_eq!(engine.store().query_entry(&file.canonicalize().unwrap()).unwrap().unwrap().access_count, 2);
}

#[test]
fn test_clear_scenario() {
    let dir = tempdir().unwrap();
    let engine = CacheEngine::open(config(&dir)).unwrap();
    let file = write(dir.path(), "a.py", "password = 'p'\n");
    engine.cache_file(&file, false).unwrap();

    assert!(matches!(engine.clear(false), Err(EngineError::NotConfirmed)));
    assert_eq!(engine.store().entry_count().unwrap(), 1);
    assert_eq!(engine.tiers().sizes(), (1, 1));

    engine.clear(true).unwrap();
    assert_eq!(engine.store().entry_count().unwrap(), 0);
    assert!(engine.vulnerabilities(None).unwrap().is_empty());
    assert!(engine
        .store()
        .partition_stats()
        .unwrap()
        .iter()
        .all(|p| p.file_count == 0));
    assert_eq!(engine.tiers().sizes(), (0, 0));
    assert!(engine.get_content(&file).is_none());
}

#[test]
fn test_reopen_reconciles_dangling_rows() {
    let dir = tempdir().unwrap();
    let kept = write(dir.path(), "kept.py", "a = 1\n");
    let dangling = write(dir.path(), "dangling.py", "b = 1\n");
    let orphan = dir.path().canonicalize().unwrap().join("orphan.py");
    {
        let engine = CacheEngine::open(config(&dir)).unwrap();
        engine.cache_file(&kept, false).unwrap();
        let entry = engine.cache_file(&dangling, false).unwrap();

        // Index row whose blob vanished.
        let conn = engine.store().partition_connection(entry.partition()).unwrap();
        partition::delete_blob(&conn.lock().unwrap(), &entry.path).unwrap();
        drop(conn);

        // Blob without an index row, as left by an interrupted ingestion.
        engine
            .store()
            .upsert_partition_blob(
                &orphan,
                &StoredBlob {
                    content: b"c = 1\n".to_vec(),
                    compressed: false,
                    size: 6,
                    checksum: blake3::hash(b"c = 1\n").to_hex().to_string(),
                },
            )
            .unwrap();
        engine.close();
    }

    let engine = CacheEngine::open(config(&dir)).unwrap();
    assert_eq!(engine.store().entry_count().unwrap(), 1);
    assert!(engine.check(&kept).unwrap().cached);
    assert!(!engine.check(&dangling).unwrap().cached);
    assert!(engine.store().get_blob(&orphan).unwrap().is_none());
}

#[test]
fn test_corrupted_blob_is_reported_not_served() {
    let dir = tempdir().unwrap();
    let engine = CacheEngine::open(config(&dir)).unwrap();
    let file = write(dir.path(), "a.py", "x = 1\n");
    let entry = engine.cache_file(&file, false).unwrap();
    engine.tiers().clear();

    let conn = engine.store().partition_connection(entry.partition()).unwrap();
    conn.lock()
        .unwrap()
        .execute("UPDATE blobs SET content = x'00'", [])
        .unwrap();
    drop(conn);

    assert!(matches!(
        engine.try_get_content(&file),
        Err(EngineError::ChecksumMismatch(_))
    ));
    assert!(engine.get_content(&file).is_none());
}
