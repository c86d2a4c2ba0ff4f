//! CodeVault - security-aware content cache for source trees
//!
//! Files are read once, checksummed, scanned against a table of security
//! rules, optionally compressed and stored in a set of partitioned SQLite
//! stores. Lookups are served from a hot LRU tier, a warm TTL tier or the
//! stores, in that order. A git bridge keeps the cache in step with a
//! checkout; background maintenance re-syncs, re-scans and checks partition
//! balance.
//!
//! The [`engine::CacheEngine`] is the entry point; [`command`] exposes it as
//! JSON requests.

pub mod cache;
pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod progress;
pub mod report;
pub mod security;
pub mod signal;
pub mod store;
pub mod vcs;

use anyhow::Context;
use serde_json::json;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::{Cli, Commands};
use crate::command::Request;
use crate::config::Config;
use crate::engine::CacheEngine;
use crate::error::ExitCode;
use crate::maintenance::Scheduler;
use crate::progress::Progress;

/// Run one CLI invocation and report how it ended.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = dir;
    }
    if let Some(size) = cli.max_file_size {
        config.max_file_size = size;
    }
    log::debug!("Using cache directory {}", config.cache_dir.display());

    let engine = Arc::new(CacheEngine::open(config).context("Failed to open cache engine")?);
    let code = match cli.command {
        Commands::Watch(args) => watch(&engine, args.repo.as_deref())?,
        Commands::Warm(args) => {
            let progress = Progress::new(cli.quiet || args.no_progress);
            let report = engine.warm(&args.patterns, Some(&progress))?;
            print_json(&json!({ "status": "ok", "result": report }))?;
            ExitCode::Success
        }
        Commands::Get(args) => get(&engine, &args.path)?,
        Commands::Scan => {
            let summary = engine.scan_all()?;
            print_json(&json!({ "status": "ok", "result": summary }))?;
            ExitCode::Success
        }
        Commands::GitUpdate(args) => {
            engine
                .set_repo(&args.repo)
                .with_context(|| format!("Cannot open repository {}", args.repo.display()))?;
            run_request(
                &engine,
                &Request::new(
                    "git_update",
                    json!({ "base": args.base, "target": args.target }),
                ),
            )?
        }
        Commands::Request(args) => {
            let raw = if args.json == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read request from stdin")?;
                buf
            } else {
                args.json
            };
            let request: Request = serde_json::from_str(&raw).context("Invalid request")?;
            run_request(&engine, &request)?
        }
        Commands::Cache(args) => run_request(
            &engine,
            &Request::new("cache", json!({ "path": args.path, "force": args.force })),
        )?,
        Commands::Check(args) => {
            run_request(&engine, &Request::new("check", json!({ "path": args.path })))?
        }
        Commands::Stats => run_request(&engine, &Request::new("stats", json!({})))?,
        Commands::SecurityReport => {
            run_request(&engine, &Request::new("security_report", json!({})))?
        }
        Commands::Vulnerabilities(args) => run_request(
            &engine,
            &Request::new("vulnerabilities", json!({ "severity": args.severity })),
        )?,
        Commands::Clear(args) => {
            run_request(&engine, &Request::new("clear", json!({ "confirm": args.yes })))?
        }
        Commands::Optimize => run_request(&engine, &Request::new("optimize", json!({})))?,
        Commands::Health => run_request(&engine, &Request::new("health", json!({})))?,
        Commands::Info => run_request(&engine, &Request::new("info", json!({})))?,
    };

    engine.close();
    Ok(code)
}

fn run_request(engine: &Arc<CacheEngine>, request: &Request) -> anyhow::Result<ExitCode> {
    let result = command::dispatch(engine, request);
    print_json(&result)?;
    Ok(if command::is_error(&result) {
        ExitCode::Rejected
    } else {
        ExitCode::Success
    })
}

fn get(engine: &CacheEngine, path: &Path) -> anyhow::Result<ExitCode> {
    match engine.get_content(path) {
        Some(content) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&content)?;
            stdout.flush()?;
            Ok(ExitCode::Success)
        }
        None => {
            log::warn!("{} is not cached", path.display());
            Ok(ExitCode::Rejected)
        }
    }
}

fn watch(engine: &Arc<CacheEngine>, repo: Option<&Path>) -> anyhow::Result<ExitCode> {
    let shutdown = signal::install_handler()?;
    if let Some(repo) = repo {
        engine
            .set_repo(repo)
            .with_context(|| format!("Cannot open repository {}", repo.display()))?;
    }

    let scheduler = Scheduler::start(Arc::clone(engine), shutdown.clone());
    log::info!("Watching {}; press Ctrl+C to stop", engine.config().cache_dir.display());
    while !shutdown.wait_timeout(Duration::from_secs(1)) {}

    scheduler.stop();
    Ok(ExitCode::Interrupted)
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
