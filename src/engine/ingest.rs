//! Single-file ingestion and lookup.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};

use super::CacheEngine;
use crate::cache::{now, unix_seconds, CacheEntry, ContentLocation, EntryMetadata};
use crate::error::{EngineError, Result};
use crate::report::{CheckResult, EntrySummary};
use crate::security::{classify, mime_type, Analysis, FileClass};
use crate::store::StoredBlob;

/// File bytes, memory-mapped or read into memory.
enum FileBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for FileBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => &map[..],
            Self::Owned(bytes) => &bytes[..],
        }
    }
}

impl CacheEngine {
    /// Ingest `path`, or return its fresh entry.
    ///
    /// Returns `None` on any validation or I/O failure; failures are logged
    /// and counted.
    pub fn cache_file(&self, path: &Path, force: bool) -> Option<CacheEntry> {
        self.try_cache_file(path, force).ok()
    }

    /// [`cache_file`](Self::cache_file) with the failure reason.
    pub fn try_cache_file(&self, path: &Path, force: bool) -> Result<CacheEntry> {
        let result = self
            .resolve(path)
            .and_then(|canonical| self.locks.with(&canonical, || self.ingest(&canonical, force)));
        if let Err(e) = &result {
            self.stats.error();
            match e {
                EngineError::OutsideAllowedRoots(_)
                | EngineError::TooLarge { .. }
                | EngineError::NotAFile(_) => log::warn!("Skipped {}: {e}", path.display()),
                _ => log::error!("Failed to cache {}: {e}", path.display()),
            }
        }
        result
    }

    /// Cached bytes of `path`, via hot, warm, then the store.
    pub fn get_content(&self, path: &Path) -> Option<Vec<u8>> {
        match self.try_get_content(path) {
            Ok(content) => content,
            Err(e) => {
                self.stats.error();
                log::error!("Failed to read cached content for {}: {e}", path.display());
                None
            }
        }
    }

    /// [`get_content`](Self::get_content) with the failure reason.
    ///
    /// `Ok(None)` means the path is not cached. Runs under the path lock so
    /// an entry is never paired with the blob of a concurrent re-ingestion.
    pub fn try_get_content(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let key = lookup_key(path);
        self.locks.with(&key, || self.read_cached(&key))
    }

    fn read_cached(&self, key: &Path) -> Result<Option<Vec<u8>>> {
        let entry = match self.tiers.get(key) {
            Some(hit) => hit.into_entry(),
            None => match self.store.query_entry(key)? {
                Some(entry) => {
                    self.tiers.insert(&entry);
                    entry
                }
                None => {
                    self.stats.miss();
                    return Ok(None);
                }
            },
        };

        let content = match self.load_content(&entry) {
            Ok(content) => content,
            Err(e) => {
                self.tiers.invalidate(key);
                return Err(e);
            }
        };
        self.store.touch_entry(key, now())?;
        self.stats.hit();
        Ok(Some(content))
    }

    /// Whether `path` is indexed, with a summary of its entry. No side effects.
    pub fn check(&self, path: &Path) -> Result<CheckResult> {
        let key = lookup_key(path);
        let entry = self.store.query_entry(&key)?;
        Ok(CheckResult {
            path: key,
            cached: entry.is_some(),
            entry: entry.as_ref().map(EntrySummary::from),
        })
    }

    /// Drop `path` from both tiers, its partition and the index.
    pub fn remove(&self, path: &Path) -> Result<bool> {
        let key = lookup_key(path);
        self.locks.with(&key, || {
            let removed = self.store.delete_by_path(&key)?;
            self.tiers.invalidate(&key);
            if removed {
                log::debug!("Removed {}", key.display());
            }
            Ok(removed)
        })
    }

    /// Stored bytes of `entry`, decompressed and checked against its checksum.
    pub(super) fn load_content(&self, entry: &CacheEntry) -> Result<Vec<u8>> {
        let blob = self
            .store
            .get_blob(&entry.path)?
            .ok_or_else(|| EngineError::MissingContent(entry.path.clone()))?;
        let content = if entry.compressed {
            decompress(&blob.content).map_err(|e| EngineError::io(&entry.path, e))?
        } else {
            blob.content
        };
        if blake3::hash(&content).to_hex().as_str() != entry.checksum {
            return Err(EngineError::ChecksumMismatch(entry.path.clone()));
        }
        Ok(content)
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let canonical = path.canonicalize().map_err(|e| EngineError::io(path, e))?;
        if !self
            .allowed_roots
            .iter()
            .any(|root| canonical.starts_with(root))
        {
            return Err(EngineError::OutsideAllowedRoots(canonical));
        }
        Ok(canonical)
    }

    /// The pipeline proper. Caller holds the path lock.
    fn ingest(&self, path: &Path, force: bool) -> Result<CacheEntry> {
        let meta = fs::metadata(path).map_err(|e| EngineError::io(path, e))?;
        if !meta.is_file() {
            return Err(EngineError::NotAFile(path.to_path_buf()));
        }
        let modified = unix_seconds(meta.modified().map_err(|e| EngineError::io(path, e))?);

        let existing = self.store.query_entry(path)?;
        if let Some(fresh) = existing
            .as_ref()
            .filter(|e| !force && e.modified_time >= modified)
        {
            let mut entry = fresh.clone();
            let at = now();
            self.store.touch_entry(path, at)?;
            entry.touch(at);
            self.stats.hit();
            log::trace!("Fresh: {}", path.display());
            return Ok(entry);
        }
        self.stats.miss();

        let limit = self.config.max_file_size;
        if meta.len() > limit {
            return Err(EngineError::TooLarge {
                path: path.to_path_buf(),
                size: meta.len(),
                limit,
            });
        }

        let file_class = classify(path);
        let bytes = read_file(path, meta.len(), self.config.mmap_threshold)?;
        let size = bytes.len() as u64;
        if size > limit {
            return Err(EngineError::TooLarge {
                path: path.to_path_buf(),
                size,
                limit,
            });
        }

        let analysis = if file_class == FileClass::Source && self.config.security_analysis {
            self.patterns.analyze(&String::from_utf8_lossy(&bytes), path)
        } else {
            Analysis::clean()
        };
        let checksum = blake3::hash(&bytes).to_hex().to_string();
        let partition = self.store.router().partition_for(path);

        let compressed = size > self.config.compression_threshold;
        let content = if compressed {
            compress(&bytes, self.config.compression_level)
                .map_err(|e| EngineError::io(path, e))?
        } else {
            bytes.to_vec()
        };
        let metadata = EntryMetadata {
            mime_type: mime_type(path).map(str::to_string),
            encoding: "utf-8".to_string(),
            lines: file_class
                .is_text()
                .then(|| bytes.iter().filter(|&&b| b == b'\n').count()),
        };
        drop(bytes);
        let revision = self.revision_of(path);

        self.store.upsert_partition_blob(
            path,
            &StoredBlob {
                content,
                compressed,
                size,
                checksum: checksum.clone(),
            },
        )?;

        let at = now();
        let entry = CacheEntry {
            path: path.to_path_buf(),
            checksum: checksum.clone(),
            size,
            modified_time: modified,
            cached_time: at,
            compressed,
            access_count: existing.map_or(1, |e| e.access_count + 1),
            last_accessed: at,
            location: ContentLocation {
                partition,
                checksum,
            },
            file_class,
            revision,
            security_score: analysis.score,
            findings: analysis.findings,
            metadata,
        };
        self.store.upsert_index_entry(&entry)?;
        self.tiers.insert(&entry);
        self.store.replace_vulnerabilities(path, &entry.findings)?;
        self.stats.ingested(size);

        log::debug!(
            "Cached {} ({} bytes, {}, {}, score {:.0})",
            path.display(),
            size,
            file_class,
            if compressed { "gzip" } else { "raw" },
            entry.security_score
        );
        Ok(entry)
    }

    /// Best-effort revision id from the bound bridge.
    fn revision_of(&self, path: &Path) -> Option<String> {
        let vcs = self.version_control()?;
        if !path.starts_with(vcs.root()) {
            return None;
        }
        match vcs.revision_of(path) {
            Ok(revision) => revision,
            Err(e) => {
                log::debug!("No revision for {}: {e}", path.display());
                None
            }
        }
    }
}

/// Key under which `path` is stored: canonical when it exists, else absolute.
pub(super) fn lookup_key(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn read_file(path: &Path, len: u64, mmap_threshold: u64) -> Result<FileBytes> {
    if len > 0 && len > mmap_threshold {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        // SAFETY: the map is read-only and dropped before ingestion returns;
        // a concurrent writer can only tear the read, which the next mtime
        // check re-ingests.
        match unsafe { Mmap::map(&file) } {
            Ok(map) => return Ok(FileBytes::Mapped(map)),
            Err(e) => log::debug!("mmap failed for {}, reading instead: {e}", path.display()),
        }
    }
    fs::read(path)
        .map(FileBytes::Owned)
        .map_err(|e| EngineError::io(path, e))
}

pub(crate) fn compress(bytes: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::new(level));
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub(crate) fn decompress(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut out)?;
    Ok(out)
}
