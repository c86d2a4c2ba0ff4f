//! File classification by extension and name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Coarse file category deciding how a file is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileClass {
    /// Program source; the only class that is pattern-scanned.
    Source,
    /// Configuration and build descriptors.
    Config,
    /// Non-text artifacts (images, archives, executables).
    Binary,
    /// Prose documentation.
    #[serde(rename = "docs")]
    Documentation,
    /// Anything unmatched.
    Data,
    /// Key material, credentials and environment files.
    #[serde(rename = "security")]
    SecuritySensitive,
}

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "cs", "go", "php", "rb", "c", "cpp", "rs",
];
const CONFIG_EXTENSIONS: &[&str] = &["yml", "yaml", "json", "xml", "conf", "ini", "toml"];
const DOC_EXTENSIONS: &[&str] = &["md", "txt", "rst", "adoc"];
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "pdf", "zip", "gz", "tar", "7z", "jar", "exe",
    "dll", "so", "dylib", "o", "a", "class", "pyc", "wasm", "bin",
];
const SENSITIVE_EXTENSIONS: &[&str] = &["pem", "key", "p12", "pfx", "keystore", "jks", "crt"];
const CONFIG_NAMES: &[&str] = &["Dockerfile", "Makefile", ".gitignore"];
const SENSITIVE_NAMES: &[&str] = &[
    ".env",
    ".htpasswd",
    ".netrc",
    ".pgpass",
    "id_rsa",
    "id_ed25519",
    "credentials",
];

/// Classify a file from its extension, falling back to its name.
///
/// Unmatched files are [`FileClass::Data`].
#[must_use]
pub fn classify(path: &Path) -> FileClass {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        let ext = ext.as_str();
        if SOURCE_EXTENSIONS.contains(&ext) {
            return FileClass::Source;
        }
        if CONFIG_EXTENSIONS.contains(&ext) {
            return FileClass::Config;
        }
        if DOC_EXTENSIONS.contains(&ext) {
            return FileClass::Documentation;
        }
        if SENSITIVE_EXTENSIONS.contains(&ext) {
            return FileClass::SecuritySensitive;
        }
        if BINARY_EXTENSIONS.contains(&ext) {
            return FileClass::Binary;
        }
    }

    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if SENSITIVE_NAMES.contains(&name) || name.starts_with(".env.") {
        FileClass::SecuritySensitive
    } else if CONFIG_NAMES.contains(&name) {
        FileClass::Config
    } else {
        FileClass::Data
    }
}

impl FileClass {
    /// Persisted name of the class.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Config => "config",
            Self::Binary => "binary",
            Self::Documentation => "docs",
            Self::Data => "data",
            Self::SecuritySensitive => "security",
        }
    }

    /// Whether line counts are meaningful for this class.
    #[must_use]
    pub fn is_text(self) -> bool {
        !matches!(self, Self::Binary)
    }
}

impl fmt::Display for FileClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::Source),
            "config" => Ok(Self::Config),
            "binary" => Ok(Self::Binary),
            "docs" => Ok(Self::Documentation),
            "data" => Ok(Self::Data),
            "security" => Ok(Self::SecuritySensitive),
            other => Err(format!("unknown file class: {other}")),
        }
    }
}

/// Guess a mime type from the extension.
#[must_use]
pub fn mime_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "py" => "text/x-python",
        "js" => "text/javascript",
        "ts" => "application/typescript",
        "java" => "text/x-java-source",
        "c" | "h" => "text/x-c",
        "cpp" | "hpp" => "text/x-c++",
        "rs" => "text/rust",
        "go" => "text/x-go",
        "php" => "application/x-httpd-php",
        "rb" => "text/x-ruby",
        "sh" | "bash" => "application/x-sh",
        "json" => "application/json",
        "xml" => "application/xml",
        "yml" | "yaml" => "application/yaml",
        "toml" => "application/toml",
        "md" => "text/markdown",
        "txt" | "ini" | "conf" => "text/plain",
        "sql" => "application/sql",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => return None,
    };
    Some(mime)
}
