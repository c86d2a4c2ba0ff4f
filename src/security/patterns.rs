//! Regex-based vulnerability pattern engine.
//!
//! The engine holds a fixed table of [`SecurityPattern`]s compiled once at
//! startup. [`PatternEngine::analyze`] is a pure function of its inputs and
//! takes `&self`, so one engine can be shared across any number of threads.
//!
//! # Scoring
//!
//! Every applicable pattern with at least one match yields exactly one
//! [`Finding`] (carrying the aggregated match count) and deducts its severity
//! penalty from a score starting at 100, floored at 0.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Score of content with no findings.
pub const CLEAN_SCORE: f64 = 100.0;

/// Characters of pattern source kept in a finding excerpt.
const EXCERPT_LEN: usize = 50;

/// Finding severity, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Minor weakness.
    Low,
    /// Weakness worth fixing.
    Medium,
    /// Likely exploitable.
    High,
    /// Directly exploitable.
    Critical,
}

impl Severity {
    /// Score deduction for one matched pattern of this severity.
    #[must_use]
    pub fn penalty(self) -> f64 {
        match self {
            Self::Critical => 30.0,
            Self::High => 20.0,
            Self::Medium => 10.0,
            Self::Low => 5.0,
        }
    }

    /// Persisted name of the severity.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// One compiled detection rule.
#[derive(Debug, Clone)]
pub struct SecurityPattern {
    /// Original regex text.
    pub source: &'static str,
    /// Compiled, case-insensitive, multi-line regex.
    pub regex: Regex,
    /// Severity of a match.
    pub severity: Severity,
    /// Human description; also the finding type.
    pub description: &'static str,
    /// Extensions (with leading dot) the rule applies to.
    pub extensions: &'static [&'static str],
}

impl SecurityPattern {
    /// Compile a rule.
    pub fn new(
        source: &'static str,
        severity: Severity,
        description: &'static str,
        extensions: &'static [&'static str],
    ) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .multi_line(true)
            .build()?;
        Ok(Self {
            source,
            regex,
            severity,
            description,
            extensions,
        })
    }

    /// Whether the rule applies to files with extension `ext` (e.g. `".py"`).
    #[must_use]
    pub fn applies_to(&self, ext: &str) -> bool {
        self.extensions.contains(&ext)
    }

    fn excerpt(&self) -> String {
        let head: String = self.source.chars().take(EXCERPT_LEN).collect();
        format!("{head}...")
    }
}

/// One matched rule in one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Rule description.
    #[serde(rename = "type")]
    pub kind: String,
    /// Rule severity.
    pub severity: Severity,
    /// Leading part of the rule's regex text.
    pub pattern: String,
    /// Number of non-overlapping matches.
    pub matches: usize,
}

/// Result of analyzing one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// 0-100, 100 meaning no findings.
    pub score: f64,
    /// Findings in rule declaration order.
    pub findings: Vec<Finding>,
}

impl Analysis {
    /// Analysis of content that was not scanned.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            score: CLEAN_SCORE,
            findings: Vec::new(),
        }
    }
}

const PY_JS_JAVA_CS_GO: &[&str] = &[".py", ".js", ".java", ".cs", ".go"];

type RuleDef = (
    &'static str,
    Severity,
    &'static str,
    &'static [&'static str],
);

const BUILTIN_RULES: &[RuleDef] = &[
    // Authentication & secrets
    (
        r#"(?:password|passwd|pwd)\s*=\s*["']([^"']+)["']"#,
        Severity::High,
        "Hardcoded password",
        PY_JS_JAVA_CS_GO,
    ),
    (
        r#"(?:api[_-]?key|apikey)\s*=\s*["']([^"']+)["']"#,
        Severity::High,
        "Hardcoded API key",
        &[".py", ".js", ".java", ".cs", ".go", ".yml", ".yaml"],
    ),
    (
        r#"(?:secret|token)\s*=\s*["']([^"']+)["']"#,
        Severity::High,
        "Hardcoded secret/token",
        PY_JS_JAVA_CS_GO,
    ),
    // SQL injection
    (
        r#"(?:execute|query)\s*\(\s*["'].*?%s.*?["'].*?%.*?\)"#,
        Severity::High,
        "Potential SQL injection",
        &[".py", ".php", ".java"],
    ),
    (
        r#"(?:execute|query)\s*\(\s*f["'].*?\{.*?\}.*?["']"#,
        Severity::High,
        "SQL injection via f-string",
        &[".py"],
    ),
    // Command injection
    (
        r"os\.system\s*\([^)]*\+[^)]*\)",
        Severity::Critical,
        "Command injection risk",
        &[".py"],
    ),
    (
        r"subprocess\.(?:call|run|Popen)\s*\([^,)]*\+[^,)]*",
        Severity::High,
        "Command injection via subprocess",
        &[".py"],
    ),
    (
        r"eval\s*\([^)]*(?:request|input|argv)",
        Severity::Critical,
        "Code injection via eval",
        &[".py", ".js", ".php"],
    ),
    // Path traversal
    (
        r"(?:open|file)\s*\([^)]*\.\.[/\\]",
        Severity::Medium,
        "Path traversal vulnerability",
        &[".py", ".js", ".java"],
    ),
    // Cryptography
    (
        r"(?:MD5|SHA1)\s*\(",
        Severity::Medium,
        "Weak cryptographic hash",
        &[".py", ".js", ".java", ".cs"],
    ),
    (
        r"random\.random\s*\(\)",
        Severity::Low,
        "Insecure random for security",
        &[".py"],
    ),
    // CORS
    (
        r"Access-Control-Allow-Origin.*?\*",
        Severity::Medium,
        "Overly permissive CORS",
        &[".py", ".js", ".java"],
    ),
    // Deserialization
    (
        r"pickle\.loads?\s*\(",
        Severity::High,
        "Unsafe deserialization",
        &[".py"],
    ),
    (
        r"yaml\.load\s*\([^,)]*\)",
        Severity::High,
        "Unsafe YAML loading",
        &[".py"],
    ),
];

/// Immutable table of compiled rules.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    patterns: Vec<SecurityPattern>,
}

impl PatternEngine {
    /// Compile the built-in rule table.
    pub fn builtin() -> Result<Self, regex::Error> {
        let patterns = BUILTIN_RULES
            .iter()
            .map(|&(source, severity, description, extensions)| {
                SecurityPattern::new(source, severity, description, extensions)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Build an engine from an explicit rule list.
    #[must_use]
    pub fn with_patterns(patterns: Vec<SecurityPattern>) -> Self {
        Self { patterns }
    }

    /// Rules in declaration order.
    #[must_use]
    pub fn patterns(&self) -> &[SecurityPattern] {
        &self.patterns
    }

    /// Score `content` using the rules applicable to `path`'s extension.
    #[must_use]
    pub fn analyze(&self, content: &str, path: &Path) -> Analysis {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!(".{}", ext.to_ascii_lowercase()),
            None => return Analysis::clean(),
        };

        let mut score = CLEAN_SCORE;
        let mut findings = Vec::new();
        for pattern in self.patterns.iter().filter(|p| p.applies_to(&ext)) {
            let matches = pattern.regex.find_iter(content).count();
            if matches == 0 {
                continue;
            }
            score -= pattern.severity.penalty();
            findings.push(Finding {
                kind: pattern.description.to_string(),
                severity: pattern.severity,
                pattern: pattern.excerpt(),
                matches,
            });
        }

        Analysis {
            score: score.max(0.0),
            findings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PatternEngine {
        PatternEngine::builtin().unwrap()
    }

    #[test]
    fn test_builtin_table_compiles() {
        assert_eq!(engine().patterns().len(), BUILTIN_RULES.len());
    }

    #[test]
    fn test_hardcoded_password_scores_80() {
        let content = "import os\npassword = \"abc123\"\nprint(password)\n";
        let analysis = engine().analyze(content, Path::new("/src/app.py"));

        assert_eq!(analysis.score, 80.0);
        assert_eq!(analysis.findings.len(), 1);
        assert_eq!(analysis.findings[0].kind, "Hardcoded password");
        assert_eq!(analysis.findings[0].severity, Severity::High);
        assert_eq!(analysis.findings[0].matches, 1);
        assert!(analysis.findings[0].pattern.ends_with("..."));
    }

    #[test]
    fn test_match_count_is_aggregated() {
        let content = "password = 'a'\nPASSWORD = 'b'\npwd = \"c\"\n";
        let analysis = engine().analyze(content, Path::new("x.py"));
        assert_eq!(analysis.findings.len(), 1);
        assert_eq!(analysis.findings[0].matches, 3);
        assert_eq!(analysis.score, 80.0);
    }

    #[test]
    fn test_extension_filter() {
        let content = "password = \"abc123\"";
        // .rb is a source extension but no rule lists it
        let analysis = engine().analyze(content, Path::new("x.rb"));
        assert_eq!(analysis, Analysis::clean());

        let analysis = engine().analyze(content, Path::new("noext"));
        assert_eq!(analysis, Analysis::clean());
    }

    #[test]
    fn test_findings_follow_declaration_order() {
        let content = "x = random.random()\nos.system('rm ' + path)\npassword = 'p'\n";
        let analysis = engine().analyze(content, Path::new("x.py"));
        let kinds: Vec<_> = analysis.findings.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                "Hardcoded password",
                "Command injection risk",
                "Insecure random for security"
            ]
        );
        assert_eq!(analysis.score, 100.0 - 20.0 - 30.0 - 5.0);
    }

    #[test]
    fn test_score_floors_at_zero() {
        let content = r#"
password = "a"
api_key = "b"
token = "c"
os.system("ls " + d)
eval(request.args)
pickle.loads(blob)
yaml.load(stream)
subprocess.call("x" + y)
"#;
        let analysis = engine().analyze(content, Path::new("bad.py"));
        assert!(analysis.findings.len() >= 8);
        assert_eq!(analysis.score, 0.0);
    }

    #[test]
    fn test_custom_rule_table() {
        let engine = PatternEngine::with_patterns(vec![
            SecurityPattern::new(r"\bTODO\b", Severity::Low, "Leftover marker", &[".rs"]).unwrap(),
            SecurityPattern::new(r"unsafe\s*\{", Severity::Medium, "Unsafe block", &[".rs"])
                .unwrap(),
        ]);
        assert_eq!(engine.patterns().len(), 2);

        let content = "// todo: tidy\nfn f() { unsafe { g() } }\n";
        let analysis = engine.analyze(content, Path::new("lib.rs"));
        assert_eq!(analysis.score, 100.0 - 5.0 - 10.0);
        let kinds: Vec<_> = analysis.findings.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, ["Leftover marker", "Unsafe block"]);

        assert_eq!(engine.analyze(content, Path::new("app.py")), Analysis::clean());
        assert_eq!(
            engine.analyze("password = 'x'\n", Path::new("lib.rs")),
            Analysis::clean()
        );
    }

    #[test]
    fn test_severity_parse_and_penalty() {
        assert_eq!("high".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("urgent".parse::<Severity>().is_err());
        assert_eq!(Severity::Critical.penalty(), 30.0);
        assert_eq!(Severity::Low.penalty(), 5.0);
    }
}
