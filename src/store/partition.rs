//! Partition store schema and blob operations.
//!
//! Each partition is a separate SQLite file holding the stored bytes of the
//! paths routed to it, keyed by path.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use crate::error::Result;

use super::index::path_key;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS blobs (
    path TEXT PRIMARY KEY,
    content BLOB NOT NULL,
    compressed INTEGER NOT NULL,
    size INTEGER NOT NULL,
    checksum TEXT NOT NULL,
    stored_time REAL NOT NULL
);
"#;

/// Stored bytes of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Bytes as stored (gzip when `compressed`).
    pub content: Vec<u8>,
    /// Whether `content` is gzip-compressed.
    pub compressed: bool,
    /// Uncompressed size.
    pub size: u64,
    /// Checksum of the uncompressed content.
    pub checksum: String,
}

/// Aggregate figures of one partition.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BlobStats {
    pub file_count: u64,
    pub total_size: u64,
    pub last_updated: Option<f64>,
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Insert or replace the blob for `path`.
pub fn put_blob(conn: &Connection, path: &Path, blob: &StoredBlob, now: f64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO blobs (path, content, compressed, size, checksum, stored_time) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            path_key(path),
            blob.content,
            blob.compressed,
            blob.size as i64,
            blob.checksum,
            now
        ],
    )?;
    Ok(())
}

pub fn get_blob(conn: &Connection, path: &Path) -> Result<Option<StoredBlob>> {
    let blob = conn
        .query_row(
            "SELECT content, compressed, size, checksum FROM blobs WHERE path = ?1",
            params![path_key(path)],
            |row| {
                Ok(StoredBlob {
                    content: row.get(0)?,
                    compressed: row.get(1)?,
                    size: row.get::<_, i64>(2)? as u64,
                    checksum: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(blob)
}

/// Delete the blob for `path`. Returns whether a row existed.
pub fn delete_blob(conn: &Connection, path: &Path) -> Result<bool> {
    let removed = conn.execute("DELETE FROM blobs WHERE path = ?1", params![path_key(path)])?;
    Ok(removed > 0)
}

pub fn stats(conn: &Connection) -> Result<BlobStats> {
    let (count, total, last): (i64, Option<i64>, Option<f64>) = conn.query_row(
        "SELECT COUNT(*), SUM(size), MAX(stored_time) FROM blobs",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    Ok(BlobStats {
        file_count: count as u64,
        total_size: total.unwrap_or(0) as u64,
        last_updated: last,
    })
}

/// Every path with a stored blob.
pub fn paths(conn: &Connection) -> Result<Vec<PathBuf>> {
    let mut stmt = conn.prepare("SELECT path FROM blobs")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(PathBuf::from(row?));
    }
    Ok(out)
}

pub fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM blobs", [])?;
    Ok(())
}
