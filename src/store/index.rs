//! Index store schema and queries.
//!
//! The index store owns entry metadata, the vulnerability log, the
//! version-control commit log and the metrics log.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::{CacheEntry, ContentLocation, VulnerabilityRecord};
use crate::error::Result;
use crate::security::{FileClass, Finding, Severity};

use super::PartitionId;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    path TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    size INTEGER NOT NULL,
    modified_time REAL NOT NULL,
    cached_time REAL NOT NULL,
    compressed INTEGER NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed REAL NOT NULL,
    content_location TEXT NOT NULL,
    file_class TEXT NOT NULL,
    revision TEXT,
    security_score REAL NOT NULL DEFAULT 100.0,
    findings TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    partition_key TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_revision ON entries(revision);
CREATE INDEX IF NOT EXISTS idx_entries_score ON entries(security_score);
CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition_key);
CREATE INDEX IF NOT EXISTS idx_entries_class ON entries(file_class);

CREATE TABLE IF NOT EXISTS vulnerabilities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    vulnerability_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    line_number INTEGER,
    detected_time REAL NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_vulns_path ON vulnerabilities(file_path);
CREATE INDEX IF NOT EXISTS idx_vulns_open ON vulnerabilities(resolved, severity);

CREATE TABLE IF NOT EXISTS vcs_commits (
    commit_id TEXT PRIMARY KEY,
    commit_time REAL,
    files_changed INTEGER NOT NULL,
    synced_time REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS metrics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_time REAL NOT NULL,
    cache_hits INTEGER NOT NULL,
    cache_misses INTEGER NOT NULL,
    hit_rate REAL NOT NULL,
    memory_bytes INTEGER,
    partition_balance TEXT NOT NULL
);
"#;

const ENTRY_COLUMNS: &str = "path, checksum, size, modified_time, cached_time, compressed, \
     access_count, last_accessed, content_location, file_class, revision, security_score, \
     findings, metadata";

/// Create tables and indexes if missing.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Insert or replace the row for `entry.path`.
pub fn upsert_entry(conn: &Connection, entry: &CacheEntry) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO entries (path, checksum, size, modified_time, cached_time, \
         compressed, access_count, last_accessed, content_location, file_class, revision, \
         security_score, findings, metadata, partition_key) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            path_key(&entry.path),
            entry.checksum,
            entry.size as i64,
            entry.modified_time,
            entry.cached_time,
            entry.compressed,
            entry.access_count as i64,
            entry.last_accessed,
            entry.location.to_string(),
            entry.file_class.as_str(),
            entry.revision,
            entry.security_score,
            serde_json::to_string(&entry.findings)?,
            serde_json::to_string(&entry.metadata)?,
            entry.partition().to_string(),
        ],
    )?;
    Ok(())
}

/// Fetch the entry for `path`.
pub fn query_entry(conn: &Connection, path: &Path) -> Result<Option<CacheEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE path = ?1");
    let raw = conn
        .query_row(&sql, params![path_key(path)], RawEntry::from_row)
        .optional()?;
    raw.map(RawEntry::into_entry).transpose()
}

/// Record one access. Returns false when no row exists.
pub fn touch_entry(conn: &Connection, path: &Path, now: f64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE entries SET access_count = access_count + 1, last_accessed = ?1 WHERE path = ?2",
        params![now, path_key(path)],
    )?;
    Ok(changed > 0)
}

/// Rewrite the score and findings of an existing row.
pub fn update_security(
    conn: &Connection,
    path: &Path,
    score: f64,
    findings: &[Finding],
) -> Result<()> {
    conn.execute(
        "UPDATE entries SET security_score = ?1, findings = ?2 WHERE path = ?3",
        params![score, serde_json::to_string(findings)?, path_key(path)],
    )?;
    Ok(())
}

/// Delete the entry row and every vulnerability row of `path`.
pub fn delete_entry(conn: &mut Connection, path: &Path) -> Result<bool> {
    let tx = conn.transaction()?;
    let removed = tx.execute("DELETE FROM entries WHERE path = ?1", params![path_key(path)])?;
    tx.execute(
        "DELETE FROM vulnerabilities WHERE file_path = ?1",
        params![path_key(path)],
    )?;
    tx.commit()?;
    Ok(removed > 0)
}

/// Entries with the given version-control revision.
pub fn entries_by_revision(conn: &Connection, revision: &str) -> Result<Vec<CacheEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE revision = ?1 ORDER BY path");
    collect_entries(conn, &sql, params![revision])
}

/// Entries whose score lies in `[min, max]`, lowest first.
pub fn entries_by_score(conn: &Connection, min: f64, max: f64) -> Result<Vec<CacheEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries WHERE security_score BETWEEN ?1 AND ?2 \
         ORDER BY security_score ASC, path"
    );
    collect_entries(conn, &sql, params![min, max])
}

/// Entries routed to `partition`.
pub fn entries_by_partition(conn: &Connection, partition: PartitionId) -> Result<Vec<CacheEntry>> {
    let sql =
        format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE partition_key = ?1 ORDER BY path");
    collect_entries(conn, &sql, params![partition.to_string()])
}

/// Entries of one classification.
pub fn entries_by_class(conn: &Connection, class: FileClass) -> Result<Vec<CacheEntry>> {
    let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE file_class = ?1 ORDER BY path");
    collect_entries(conn, &sql, params![class.as_str()])
}

/// The `limit` lowest-scoring entries.
pub fn lowest_scoring(conn: &Connection, limit: usize) -> Result<Vec<CacheEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM entries ORDER BY security_score ASC, path LIMIT ?1"
    );
    collect_entries(conn, &sql, params![limit as i64])
}

/// Every indexed path with its partition key.
pub fn all_locations(conn: &Connection) -> Result<Vec<(PathBuf, String)>> {
    let mut stmt = conn.prepare("SELECT path, partition_key FROM entries")?;
    let rows = stmt.query_map([], |row| {
        Ok((PathBuf::from(row.get::<_, String>(0)?), row.get(1)?))
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Number of indexed entries.
pub fn entry_count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
    Ok(n as u64)
}

/// Mark every unresolved finding of `path` resolved. Returns rows changed.
pub fn resolve_vulnerabilities(conn: &Connection, path: &Path) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE vulnerabilities SET resolved = 1 WHERE file_path = ?1 AND resolved = 0",
        params![path_key(path)],
    )?)
}

/// Supersede `path`'s unresolved findings with `findings` in one transaction.
pub fn replace_vulnerabilities(
    conn: &mut Connection,
    path: &Path,
    findings: &[Finding],
    now: f64,
) -> Result<()> {
    let tx = conn.transaction()?;
    resolve_vulnerabilities(&tx, path)?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO vulnerabilities (file_path, vulnerability_type, severity, line_number, \
             detected_time) VALUES (?1, ?2, ?3, NULL, ?4)",
        )?;
        for finding in findings {
            stmt.execute(params![
                path_key(path),
                finding.kind,
                finding.severity.as_str(),
                now
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Unresolved findings, optionally of one severity, newest first.
pub fn query_vulnerabilities(
    conn: &Connection,
    severity: Option<Severity>,
    limit: usize,
) -> Result<Vec<VulnerabilityRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_path, vulnerability_type, severity, line_number, detected_time, resolved \
         FROM vulnerabilities WHERE resolved = 0 AND (?1 IS NULL OR severity = ?1) \
         ORDER BY detected_time DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(
        params![severity.map(Severity::as_str), limit as i64],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, bool>(6)?,
            ))
        },
    )?;

    let mut records = Vec::new();
    for row in rows {
        let (id, path, kind, severity, line_number, detected_at, resolved) = row?;
        records.push(VulnerabilityRecord {
            id,
            path: PathBuf::from(path),
            kind,
            severity: severity.parse().map_err(corrupt)?,
            line_number,
            detected_at,
            resolved,
        });
    }
    Ok(records)
}

/// Number of unresolved findings.
pub fn open_vulnerability_count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vulnerabilities WHERE resolved = 0",
        [],
        |r| r.get(0),
    )?;
    Ok(n as u64)
}

/// Unresolved findings counted per (severity, type), most severe first.
pub fn vulnerability_breakdown(conn: &Connection) -> Result<Vec<(Severity, String, u64)>> {
    let mut stmt = conn.prepare(
        "SELECT severity, vulnerability_type, COUNT(*) FROM vulnerabilities \
         WHERE resolved = 0 GROUP BY severity, vulnerability_type",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut groups: Vec<(Severity, String, u64)> = Vec::new();
    for row in rows {
        let (severity, kind, count) = row?;
        groups.push((severity.parse::<Severity>().map_err(corrupt)?, kind, count as u64));
    }
    groups.sort_by(|a, b| b.0.cmp(&a.0).then(b.2.cmp(&a.2)).then(a.1.cmp(&b.1)));
    Ok(groups)
}

/// Aggregate (count, average score, entries below `risk_threshold`).
pub fn score_summary(conn: &Connection, risk_threshold: f64) -> Result<(u64, f64, u64)> {
    let (count, avg, risky): (i64, Option<f64>, i64) = conn.query_row(
        "SELECT COUNT(*), AVG(security_score), \
         COUNT(CASE WHEN security_score < ?1 THEN 1 END) FROM entries",
        params![risk_threshold],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    Ok((count as u64, avg.unwrap_or(100.0), risky as u64))
}

/// Record a synced commit.
pub fn record_commit(
    conn: &Connection,
    commit_id: &str,
    commit_time: Option<f64>,
    files_changed: usize,
    now: f64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO vcs_commits (commit_id, commit_time, files_changed, synced_time) \
         VALUES (?1, ?2, ?3, ?4)",
        params![commit_id, commit_time, files_changed as i64, now],
    )?;
    Ok(())
}

/// Number of recorded commits.
pub fn commit_count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM vcs_commits", [], |r| r.get(0))?;
    Ok(n as u64)
}

/// Append one metrics snapshot.
pub fn record_metrics(
    conn: &Connection,
    now: f64,
    hits: u64,
    misses: u64,
    hit_rate: f64,
    memory_bytes: Option<u64>,
    balance: &BTreeMap<String, u64>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO metrics (recorded_time, cache_hits, cache_misses, hit_rate, memory_bytes, \
         partition_balance) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            now,
            hits as i64,
            misses as i64,
            hit_rate,
            memory_bytes.map(|b| b as i64),
            serde_json::to_string(balance)?,
        ],
    )?;
    Ok(())
}

/// Number of metrics snapshots.
pub fn metrics_count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM metrics", [], |r| r.get(0))?;
    Ok(n as u64)
}

/// Delete entries, vulnerabilities and commit history. Metrics history is kept.
pub fn clear(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "DELETE FROM entries; DELETE FROM vulnerabilities; DELETE FROM vcs_commits;",
    )?;
    tx.commit()?;
    Ok(())
}

/// Normalized text key for a path.
pub(crate) fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn collect_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CacheEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, RawEntry::from_row)?;
    let mut entries = Vec::new();
    for raw in rows {
        entries.push(raw?.into_entry()?);
    }
    Ok(entries)
}

fn corrupt(reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        reason.into(),
    )
}

/// Column values as stored, before parsing.
struct RawEntry {
    path: String,
    checksum: String,
    size: i64,
    modified_time: f64,
    cached_time: f64,
    compressed: bool,
    access_count: i64,
    last_accessed: f64,
    location: String,
    file_class: String,
    revision: Option<String>,
    security_score: f64,
    findings: String,
    metadata: String,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            path: row.get(0)?,
            checksum: row.get(1)?,
            size: row.get(2)?,
            modified_time: row.get(3)?,
            cached_time: row.get(4)?,
            compressed: row.get(5)?,
            access_count: row.get(6)?,
            last_accessed: row.get(7)?,
            location: row.get(8)?,
            file_class: row.get(9)?,
            revision: row.get(10)?,
            security_score: row.get(11)?,
            findings: row.get(12)?,
            metadata: row.get(13)?,
        })
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let location: ContentLocation = self.location.parse().map_err(corrupt)?;
        let file_class: FileClass = self.file_class.parse().map_err(corrupt)?;
        Ok(CacheEntry {
            path: PathBuf::from(self.path),
            checksum: self.checksum,
            size: self.size as u64,
            modified_time: self.modified_time,
            cached_time: self.cached_time,
            compressed: self.compressed,
            access_count: self.access_count as u64,
            last_accessed: self.last_accessed,
            location,
            file_class,
            revision: self.revision,
            security_score: self.security_score,
            findings: serde_json::from_str(&self.findings)?,
            metadata: serde_json::from_str(&self.metadata)?,
        })
    }
}
