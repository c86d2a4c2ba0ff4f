//! Error types and exit codes.
//!
//! The engine reports failures through [`EngineError`]. Operations whose
//! contract is "no result on failure" log and swallow these errors; the
//! command surface turns the rest into structured result fields.

use serde::Serialize;
use std::path::PathBuf;

/// Errors raised inside the caching engine.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// An I/O error occurred while accessing a file or directory.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A store query or connection failed.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// JSON (de)serialization of a stored column or request failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A security pattern failed to compile.
    #[error("Invalid security pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The path resolves outside every allowed root directory.
    #[error("Path outside allowed directories: {0}")]
    OutsideAllowedRoots(PathBuf),

    /// The file is larger than the configured ingestion ceiling.
    #[error("File too large: {path} ({size} bytes, limit {limit})")]
    TooLarge {
        /// Offending file
        path: PathBuf,
        /// Actual size in bytes
        size: u64,
        /// Configured ceiling in bytes
        limit: u64,
    },

    /// The path exists but is not a regular file.
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    /// An index entry has no blob in its partition.
    #[error("No stored content for {0}")]
    MissingContent(PathBuf),

    /// Stored bytes no longer hash to the recorded checksum.
    #[error("Checksum mismatch for {0}")]
    ChecksumMismatch(PathBuf),

    /// A destructive operation was requested without confirmation.
    #[error("Clear requires confirmation")]
    NotConfirmed,

    /// The version-control tool failed or returned unusable output.
    #[error("Version control error: {0}")]
    Vcs(String),

    /// A warm pattern is not a valid glob.
    #[error("Invalid glob pattern: {0}")]
    GlobPattern(String),

    /// The bounded worker pool could not be built.
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    /// A command request could not be interpreted.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

impl EngineError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Exit codes for the CodeVault binary.
///
/// - 0: Success
/// - 1: General error (unexpected failure)
/// - 2: Rejected (the command returned an error result)
/// - 130: Interrupted by user (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Success: the command completed.
    Success = 0,
    /// General error: An unexpected error occurred.
    GeneralError = 1,
    /// Rejected: the command completed but reported an error result.
    Rejected = 2,
    /// Interrupted: stopped by user (Ctrl+C).
    Interrupted = 130,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "CV000",
            Self::GeneralError => "CV001",
            Self::Rejected => "CV002",
            Self::Interrupted => "CV130",
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "CV001")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
    /// Whether the operation was interrupted
    pub interrupted: bool,
}

impl StructuredError {
    /// Create a new structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: err.to_string(),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::OutsideAllowedRoots(PathBuf::from("/etc/passwd"));
        assert_eq!(
            err.to_string(),
            "Path outside allowed directories: /etc/passwd"
        );

        let err = EngineError::TooLarge {
            path: PathBuf::from("/tmp/big.bin"),
            size: 10,
            limit: 5,
        };
        assert_eq!(
            err.to_string(),
            "File too large: /tmp/big.bin (10 bytes, limit 5)"
        );

        assert_eq!(
            EngineError::NotConfirmed.to_string(),
            "Clear requires confirmation"
        );
    }

    #[test]
    fn test_exit_code_prefixes() {
        assert_eq!(ExitCode::Success.as_i32(), 0);
        assert_eq!(ExitCode::Rejected.as_i32(), 2);
        assert_eq!(ExitCode::Interrupted.code_prefix(), "CV130");
    }

    #[test]
    fn test_structured_error_from_anyhow() {
        let err = anyhow::anyhow!("boom");
        let structured = StructuredError::new(&err, ExitCode::GeneralError);
        assert_eq!(structured.code, "CV001");
        assert_eq!(structured.exit_code, 1);
        assert_eq!(structured.message, "boom");
        assert!(!structured.interrupted);
    }
}
