//! JSON command surface.
//!
//! A request names a command and carries its parameters as a JSON object:
//!
//! ```json
//! {"command": "cache", "params": {"path": "/src/app.py", "force": true}}
//! ```
//!
//! Every command answers with a JSON object whose `status` is `ok`, `miss`,
//! `started` or `error`. Failures never cross this boundary as panics or
//! `Err`; they come back as `{"status": "error", "error": "..."}`.

use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::CacheEngine;
use crate::error::{EngineError, Result};
use crate::report::EntrySummary;
use crate::security::Severity;

/// One command invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PathParams {
    path: PathBuf,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct WarmParams {
    patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SyncParams {
    base: String,
    target: String,
}

#[derive(Debug, Default, Deserialize)]
struct SeverityParams {
    #[serde(default)]
    severity: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ClearParams {
    #[serde(default)]
    confirm: bool,
}

/// Names accepted by [`dispatch`].
pub const COMMANDS: &[&str] = &[
    "cache",
    "warm",
    "get",
    "check",
    "stats",
    "metrics",
    "security_report",
    "scan",
    "git_update",
    "set_repo",
    "vulnerabilities",
    "clear",
    "optimize",
    "health",
    "info",
];

/// Run `request` against `engine` and return its structured result.
pub fn dispatch(engine: &Arc<CacheEngine>, request: &Request) -> Value {
    match execute(engine, request) {
        Ok(result) => result,
        Err(e) => {
            log::warn!("Command {} failed: {e}", request.command);
            error_result(&e)
        }
    }
}

/// Parse a raw JSON request, dispatch it and serialize the result.
pub fn handle_raw(engine: &Arc<CacheEngine>, raw: &str) -> String {
    let result = match serde_json::from_str::<Request>(raw) {
        Ok(request) => dispatch(engine, &request),
        Err(e) => {
            log::warn!("Unparseable request: {e}");
            error_result(&EngineError::InvalidRequest(e.to_string()))
        }
    };
    result.to_string()
}

/// Whether a result carries an error.
#[must_use]
pub fn is_error(result: &Value) -> bool {
    result.get("status").and_then(Value::as_str) == Some("error")
}

fn execute(engine: &Arc<CacheEngine>, request: &Request) -> Result<Value> {
    log::debug!("Dispatching {}", request.command);
    match request.command.as_str() {
        "cache" => {
            let p: PathParams = params(request)?;
            match engine.cache_file(&p.path, p.force) {
                Some(entry) => ok(EntrySummary::from(&entry)),
                None => Ok(json!({
                    "status": "error",
                    "error": format!("Not cached: {}", p.path.display()),
                })),
            }
        }
        "warm" => {
            let p: WarmParams = params(request)?;
            ok(engine.warm(&p.patterns, None)?)
        }
        "get" => {
            let p: PathParams = params(request)?;
            Ok(match engine.get_content(&p.path) {
                Some(content) => json!({
                    "status": "ok",
                    "result": {
                        "path": p.path,
                        "size": content.len(),
                        "content": base64::engine::general_purpose::STANDARD.encode(&content),
                    },
                }),
                None => json!({ "status": "miss", "path": p.path }),
            })
        }
        "check" => {
            let p: PathParams = params(request)?;
            ok(engine.check(&p.path)?)
        }
        "stats" | "metrics" => ok(engine.performance_metrics()?),
        "security_report" => ok(engine.security_report()?),
        "scan" => {
            let engine = Arc::clone(engine);
            std::thread::Builder::new()
                .name("codevault-scan".into())
                .spawn(move || {
                    if let Err(e) = engine.scan_all() {
                        log::error!("Requested scan failed: {e}");
                    }
                })
                .map_err(|e| EngineError::io("scan thread", e))?;
            Ok(json!({ "status": "started" }))
        }
        "git_update" => {
            let p: SyncParams = params(request)?;
            ok(engine.sync(&p.base, &p.target)?)
        }
        "set_repo" => {
            let p: PathParams = params(request)?;
            engine.set_repo(&p.path)?;
            ok(json!({ "repo": p.path }))
        }
        "vulnerabilities" => {
            let p: SeverityParams = params(request)?;
            let severity = p
                .severity
                .map(|s| s.parse::<Severity>())
                .transpose()
                .map_err(EngineError::InvalidRequest)?;
            ok(engine.vulnerabilities(severity)?)
        }
        "clear" => {
            let p: ClearParams = params(request)?;
            engine.clear(p.confirm)?;
            ok(json!({ "cleared": true }))
        }
        "optimize" => {
            engine.optimize()?;
            ok(json!({ "optimized": true }))
        }
        "health" => ok(engine.health()),
        "info" => ok(engine.info()),
        other => Err(EngineError::InvalidRequest(format!(
            "unknown command: {other}"
        ))),
    }
}

fn params<T: DeserializeOwned>(request: &Request) -> Result<T> {
    let value = if request.params.is_null() {
        json!({})
    } else {
        request.params.clone()
    };
    serde_json::from_value(value)
        .map_err(|e| EngineError::InvalidRequest(format!("{}: {e}", request.command)))
}

fn ok(result: impl Serialize) -> Result<Value> {
    Ok(json!({ "status": "ok", "result": serde_json::to_value(result)? }))
}

fn error_result(error: &EngineError) -> Value {
    json!({ "status": "error", "error": error.to_string() })
}
