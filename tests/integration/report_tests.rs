use codevault::config::Config;
use codevault::engine::CacheEngine;
use codevault::security::Severity;
use std::fs;
use tempfile::{tempdir, TempDir};

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
fn test_security_report_aggregates() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let files = [
        ("clean.py", "total = 1 + 2\n"),
        ("secret.py", "password = \"abc123\"\n"),
        (
            "bad.py",
            "os.system(\"rm \" + arg)\neval(input())\npassword = \"x\"\n",
        ),
    ];
    for (name, content) in files {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        engine.cache_file(&path, false).unwrap();
    }

    let report = engine.security_report().unwrap();
    assert_eq!(report.summary.total_files, 3);
    assert!((report.summary.average_score - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(report.summary.high_risk_files, 1);
    assert_eq!(report.summary.open_vulnerabilities, 4);

    assert_eq!(report.vulnerabilities.len(), 3);
    assert_eq!(report.vulnerabilities[0].severity, Severity::Critical);
    let passwords = report
        .vulnerabilities
        .iter()
        .find(|g| g.kind == "Hardcoded password")
        .unwrap();
    assert_eq!((passwords.severity, passwords.count), (Severity::High, 2));

    assert!(report.lowest_scoring[0].path.ends_with("bad.py"));
    assert_eq!(report.lowest_scoring[0].security_score, 20.0);
    assert_eq!(report.lowest_scoring[0].findings.len(), 3);
    assert_eq!(report.lowest_scoring[2].security_score, 100.0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["vulnerabilities"][0]["severity"], "CRITICAL");
    assert!(json["vulnerabilities"][0]["type"].is_string());
}

#[test]
fn test_empty_report() {
    let dir = tempdir().unwrap();
    let report = engine(&dir).security_report().unwrap();
    assert_eq!(report.summary.total_files, 0);
    assert_eq!(report.summary.average_score, 100.0);
    assert!(report.vulnerabilities.is_empty());
    assert!(report.lowest_scoring.is_empty());
}

#[test]
fn test_lowest_scoring_is_capped() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    for i in 0..25 {
        fs::write(dir.path().join(format!("f{i}.py")), format!("token = 't{i}'\n")).unwrap();
    }
    let pattern = dir.path().join("*.py").to_string_lossy().into_owned();
    let warm = engine.warm(&[pattern], None).unwrap();
    assert_eq!(warm.cached, 25);
    assert!(warm.files_per_second > 0.0);

    let report = engine.security_report().unwrap();
    assert_eq!(report.lowest_scoring.len(), 20);
    assert_eq!(engine.vulnerabilities(Some(Severity::High)).unwrap().len(), 25);
    assert!(engine.vulnerabilities(Some(Severity::Low)).unwrap().is_empty());
}

#[test]
fn test_performance_metrics_track_activity() {
    let dir = tempdir().unwrap();
    let engine = engine(&dir);
    let file = dir.path().join("a.py");
    fs::write(&file, "a = 1\n").unwrap();

    engine.cache_file(&file, false).unwrap();
    engine.get_content(&file).unwrap();
    engine.get_content(&file).unwrap();
    assert!(engine.get_content(&dir.path().join("missing.py")).is_none());

    let metrics = engine.performance_metrics().unwrap();
    assert_eq!(metrics.cache_hits, 2);
    assert_eq!(metrics.cache_misses, 2);
    assert_eq!(metrics.hit_rate, 50.0);
    assert_eq!(metrics.cached_files, 1);
    assert_eq!(metrics.ingested_bytes, 6);
    assert_eq!(metrics.hot_entries, 1);
    assert_eq!(metrics.partition_balance.values().sum::<u64>(), 1);
}
