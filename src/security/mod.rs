//! Security analysis for cached files.
//!
//! * [`classify`]: maps a path to a [`FileClass`]; only source files are scanned.
//! * [`patterns`]: the regex rule table and the scoring [`PatternEngine`].

pub mod classify;
pub mod patterns;

pub use classify::{classify, mime_type, FileClass};
pub use patterns::{Analysis, Finding, PatternEngine, SecurityPattern, Severity, CLEAN_SCORE};
