//! Batch warming from glob patterns.

use globset::{GlobBuilder, GlobMatcher};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use walkdir::WalkDir;

use super::CacheEngine;
use crate::error::{EngineError, Result};
use crate::progress::{ProgressCallback, PHASE_DISCOVER, PHASE_WARM};
use crate::report::WarmReport;

/// A compiled pattern plus the directory walk that can satisfy it.
#[derive(Debug)]
struct PatternWalk {
    base: PathBuf,
    max_depth: usize,
    matcher: GlobMatcher,
}

impl PatternWalk {
    /// Compile `pattern`, resolving relative patterns against `cwd`.
    ///
    /// `*` does not cross directory separators; `**` does.
    fn new(pattern: &str, cwd: &Path) -> Result<Self> {
        let absolute = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            cwd.join(pattern)
        };

        let mut base = PathBuf::new();
        let mut rest = Vec::new();
        for component in absolute.components() {
            let text = component.as_os_str().to_string_lossy();
            if rest.is_empty() && !has_glob_meta(&text) {
                base.push(component);
            } else {
                rest.push(component);
            }
        }
        if rest.is_empty() {
            // A literal path: walk its parent and match it exactly.
            if let Some(Component::Normal(_)) = absolute.components().next_back() {
                base.pop();
                rest.push(Component::CurDir);
            }
        }
        let recursive = rest
            .iter()
            .any(|c| c.as_os_str().to_string_lossy().contains("**"));
        let max_depth = if recursive { usize::MAX } else { rest.len() };

        let matcher = GlobBuilder::new(&absolute.to_string_lossy())
            .literal_separator(true)
            .build()
            .map_err(|e| EngineError::GlobPattern(e.to_string()))?
            .compile_matcher();

        Ok(Self {
            base,
            max_depth,
            matcher,
        })
    }
}

fn has_glob_meta(text: &str) -> bool {
    text.contains(&['*', '?', '[', '{'][..])
}

impl CacheEngine {
    /// Cache every distinct allowed file matched by `patterns`.
    ///
    /// Files are ingested on a pool of `parallel_workers` threads. Failures
    /// are tallied, never abort the batch.
    pub fn warm(
        &self,
        patterns: &[String],
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<WarmReport> {
        let started = Instant::now();

        if let Some(p) = progress {
            p.on_phase_start(PHASE_DISCOVER, 0);
        }
        let (files, skipped) = self.expand_patterns(patterns)?;
        if let Some(p) = progress {
            p.on_phase_end(PHASE_DISCOVER);
            p.on_phase_start(PHASE_WARM, files.len());
        }
        log::info!(
            "Warming {} files from {} patterns with {} workers ({} skipped)",
            files.len(),
            patterns.len(),
            self.config.parallel_workers,
            skipped
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallel_workers)
            .build()?;
        let done = AtomicUsize::new(0);
        let sizes: Vec<Option<u64>> = pool.install(|| {
            files
                .par_iter()
                .map(|path| {
                    let size = self.cache_file(path, false).map(|entry| entry.size);
                    let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(p) = progress {
                        p.on_progress(n, &path.to_string_lossy());
                        if let Some(bytes) = size {
                            p.on_item_completed(bytes);
                        }
                    }
                    size
                })
                .collect()
        });
        if let Some(p) = progress {
            p.on_phase_end(PHASE_WARM);
        }

        let mut report = WarmReport {
            processed: files.len(),
            skipped,
            ..WarmReport::default()
        };
        for size in sizes.into_iter().flatten() {
            report.cached += 1;
            report.total_size += size;
        }
        report.errors = report.processed - report.cached;
        report.finish(started.elapsed().as_secs_f64());

        log::info!(
            "Warm complete: {}/{} cached, {} errors, {} in {:.2}s",
            report.cached,
            report.processed,
            report.errors,
            bytesize::ByteSize(report.total_size),
            report.duration_secs
        );
        Ok(report)
    }

    /// Distinct canonical files matched by any pattern and carrying an allowed
    /// extension, plus the number of matches left out because they fall
    /// outside the allowed roots or exceed `max_file_size`.
    fn expand_patterns(&self, patterns: &[String]) -> Result<(Vec<PathBuf>, usize)> {
        let cwd = std::env::current_dir().map_err(|e| EngineError::io(".", e))?;
        let mut files = BTreeSet::new();
        let mut skipped = BTreeSet::new();

        for pattern in patterns {
            let walk = PatternWalk::new(pattern, &cwd)?;
            let entries = WalkDir::new(&walk.base)
                .max_depth(walk.max_depth)
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        log::debug!("Skipping unreadable entry while matching {pattern}: {e}");
                        None
                    }
                });
            for entry in entries {
                let path = entry.path();
                if !entry.file_type().is_file()
                    || !walk.matcher.is_match(path)
                    || !self.config.extension_allowed(path)
                {
                    continue;
                }
                let canonical = match path.canonicalize() {
                    Ok(canonical) => canonical,
                    Err(e) => {
                        log::debug!("Cannot resolve {}: {e}", path.display());
                        continue;
                    }
                };
                if self.warmable(&canonical) {
                    files.insert(canonical);
                } else {
                    skipped.insert(canonical);
                }
            }
        }
        Ok((files.into_iter().collect(), skipped.len()))
    }

    /// Whether ingestion would accept `canonical` on root and size grounds.
    fn warmable(&self, canonical: &Path) -> bool {
        if !self
            .allowed_roots
            .iter()
            .any(|root| canonical.starts_with(root))
        {
            log::debug!("Not warming {}: outside allowed directories", canonical.display());
            return false;
        }
        match canonical.metadata() {
            Ok(meta) if meta.len() > self.config.max_file_size => {
                log::debug!(
                    "Not warming {}: {} exceeds limit",
                    canonical.display(),
                    bytesize::ByteSize(meta.len())
                );
                false
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::tests::engine;
    use std::fs;
    use tempfile::TempDir;

    fn pattern(dir: &Path, glob: &str) -> String {
        dir.join(glob).to_string_lossy().into_owned()
    }

    #[test]
    fn test_pattern_walk_base_and_depth() {
        let cwd = Path::new("/work");
        let walk = PatternWalk::new("/src/app/*.py", cwd).unwrap();
        assert_eq!(walk.base, PathBuf::from("/src/app"));
        assert_eq!(walk.max_depth, 1);
        assert!(walk.matcher.is_match("/src/app/main.py"));
        assert!(!walk.matcher.is_match("/src/app/sub/main.py"));

        let walk = PatternWalk::new("src/**/*.rs", cwd).unwrap();
        assert_eq!(walk.base, PathBuf::from("/work/src"));
        assert_eq!(walk.max_depth, usize::MAX);
        assert!(walk.matcher.is_match("/work/src/a/b/lib.rs"));
    }

    #[test]
    fn test_literal_pattern_matches_itself() {
        let walk = PatternWalk::new("/src/app/main.py", Path::new("/")).unwrap();
        assert_eq!(walk.base, PathBuf::from("/src/app"));
        assert_eq!(walk.max_depth, 1);
        assert!(walk.matcher.is_match("/src/app/main.py"));
    }

    #[test]
    fn test_invalid_glob_is_rejected() {
        assert!(matches!(
            PatternWalk::new("/src/[a", Path::new("/")),
            Err(EngineError::GlobPattern(_))
        ));
    }

    #[test]
    fn test_warm_dedups_repeated_patterns() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("b.py"), "y = 2\n").unwrap();
        fs::write(dir.path().join("c.bin"), [0u8, 1, 2]).unwrap();

        let glob = pattern(dir.path(), "*.py");
        let report = engine.warm(&[glob.clone(), glob], None).unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.cached, 2);
        assert_eq!(report.errors, 0);
        assert_eq!(report.total_size, 12);
        assert_eq!(engine.stats().misses(), 2);
    }

    #[test]
    fn test_warm_skips_disallowed_extensions() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        fs::write(dir.path().join("c.bin"), [0u8, 1, 2]).unwrap();
        let report = engine.warm(&[pattern(dir.path(), "*")], None).unwrap();
        assert_eq!(report.processed, 0);
    }

    #[test]
    fn test_warm_skips_oversized_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        let engine = CacheEngine::open(Config {
            cache_dir: dir.path().join("cache"),
            allowed_dirs: vec![dir.path().join("src")],
            max_file_size: 64,
            ..Config::default()
        })
        .unwrap();
        fs::write(dir.path().join("src/small.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("src/huge.py"), "y = 2\n".repeat(100)).unwrap();
        fs::write(outside.path().join("foreign.py"), "z = 3\n").unwrap();

        let report = engine
            .warm(
                &[
                    pattern(&dir.path().join("src"), "*.py"),
                    pattern(outside.path(), "*.py"),
                ],
                None,
            )
            .unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.cached, 1);
        assert_eq!(report.errors, 0);
        assert_eq!(report.skipped, 2);
        assert_eq!(engine.stats().errors(), 0);
    }

    #[test]
    fn test_warm_recursive_pattern() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        fs::write(dir.path().join("pkg/a.py"), "a = 1\n").unwrap();
        fs::write(dir.path().join("pkg/sub/b.py"), "b = 1\n").unwrap();

        let report = engine
            .warm(&[pattern(dir.path(), "pkg/**/*.py")], None)
            .unwrap();
        assert_eq!(report.processed, 2);
    }
}
