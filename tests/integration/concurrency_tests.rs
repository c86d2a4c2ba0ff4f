use codevault::command::{dispatch, Request};
use codevault::config::Config;
use codevault::engine::CacheEngine;
use serde_json::json;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

fn shared_engine(dir: &tempfile::TempDir) -> Arc<CacheEngine> {
    Arc::new(
        CacheEngine::open(Config {
            cache_dir: dir.path().join("cache"),
            allowed_dirs: vec![dir.path().to_path_buf()],
            partition_count: 4,
            ..Config::default()
        })
        .unwrap(),
    )
}

#[test]
fn test_forced_recache_of_one_path_is_serialized() {
    let dir = tempdir().unwrap();
    let engine = shared_engine(&dir);
    let file = dir.path().join("shared.py");
    fs::write(&file, "password = \"abc123\"\n").unwrap();

    const THREADS: usize = 8;
    const ROUNDS: usize = 5;
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let file = file.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    assert!(engine.cache_file(&file, true).is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let entry = engine
        .store()
        .query_entry(&file.canonicalize().unwrap())
        .unwrap()
        .unwrap();
    // Every ingestion saw the previous one's row.
    assert_eq!(entry.access_count, (THREADS * ROUNDS) as u64);
    // Each ingestion superseded the previous findings.
    assert_eq!(engine.vulnerabilities(None).unwrap().len(), 1);
    assert_eq!(engine.stats().errors(), 0);
}

#[test]
fn test_reads_during_recache_never_miss() {
    let dir = tempdir().unwrap();
    let engine = shared_engine(&dir);
    let file = dir.path().join("churn.py");
    let versions = ["value = 1\n", "value = 22\n"];
    fs::write(&file, versions[0]).unwrap();
    engine.cache_file(&file, false).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let engine = Arc::clone(&engine);
        let file = file.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut reads = 0;
            while !done.load(Ordering::Acquire) || reads == 0 {
                let content = engine.get_content(&file).expect("cached file read as a miss");
                assert!(
                    versions.iter().any(|v| v.as_bytes() == content.as_slice()),
                    "torn content: {content:?}"
                );
                reads += 1;
            }
            reads
        })
    };

    for round in 0..200 {
        fs::write(&file, versions[round % 2]).unwrap();
        assert!(engine.cache_file(&file, true).is_some());
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);
    assert_eq!(engine.stats().errors(), 0);
    assert_eq!(engine.stats().misses(), 201);
}

#[test]
fn test_parallel_distinct_paths() {
    let dir = tempdir().unwrap();
    let engine = shared_engine(&dir);
    let files: Vec<_> = (0..32)
        .map(|i| {
            let path = dir.path().join(format!("mod_{i}.py"));
            fs::write(&path, format!("value_{i} = {i}\n")).unwrap();
            path
        })
        .collect();

    let handles: Vec<_> = files
        .chunks(8)
        .map(|chunk| {
            let engine = Arc::clone(&engine);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                for path in &chunk {
                    engine.cache_file(path, false).unwrap();
                    assert!(engine.get_content(path).is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.store().entry_count().unwrap(), 32);
    assert_eq!(engine.stats().misses(), 32);
    assert_eq!(engine.stats().hits(), 32);
    let stored: u64 = engine
        .store()
        .partition_stats()
        .unwrap()
        .iter()
        .map(|p| p.file_count)
        .sum();
    assert_eq!(stored, 32);
}

#[test]
fn test_commands_from_many_threads() {
    let dir = tempdir().unwrap();
    let engine = shared_engine(&dir);
    let file = dir.path().join("app.py");
    fs::write(&file, "x = 1\n").unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let file = file.clone();
            thread::spawn(move || {
                let request = match i % 3 {
                    0 => Request::new("cache", json!({ "path": file })),
                    1 => Request::new("check", json!({ "path": file })),
                    _ => Request::new("stats", json!({})),
                };
                let result = dispatch(&engine, &request);
                assert_eq!(result["status"], "ok", "{result}");
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(engine.check(&file).unwrap().cached);
}
