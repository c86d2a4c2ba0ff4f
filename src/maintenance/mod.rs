//! Background maintenance.
//!
//! Three independent loops share one engine and one shutdown flag:
//!
//! | task      | interval                  | work                          |
//! |-----------|---------------------------|-------------------------------|
//! | sync      | `sync_interval_secs`      | [`CacheEngine::incremental_sync`] |
//! | scan      | `scan_interval_secs`      | [`CacheEngine::scan_all`]     |
//! | rebalance | `rebalance_interval_secs` | [`CacheEngine::rebalance_check`] |
//!
//! A failing cycle is logged and the loop waits for the next one.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::CacheEngine;
use crate::error::Result;
use crate::signal::ShutdownHandler;

/// Handle to the running maintenance threads.
#[derive(Debug)]
pub struct Scheduler {
    shutdown: ShutdownHandler,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the sync, scan and rebalance loops.
    pub fn start(engine: Arc<CacheEngine>, shutdown: ShutdownHandler) -> Self {
        let config = engine.config();
        let tasks: [(&'static str, Duration, Task); 3] = [
            (
                "sync",
                Duration::from_secs(config.sync_interval_secs),
                |engine| engine.incremental_sync().map(drop),
            ),
            (
                "scan",
                Duration::from_secs(config.scan_interval_secs),
                |engine| engine.scan_all().map(drop),
            ),
            (
                "rebalance",
                Duration::from_secs(config.rebalance_interval_secs),
                |engine| engine.rebalance_check().map(drop),
            ),
        ];

        let workers = tasks
            .into_iter()
            .map(|(name, interval, task)| {
                let engine = Arc::clone(&engine);
                let shutdown = shutdown.clone();
                std::thread::Builder::new()
                    .name(format!("codevault-{name}"))
                    .spawn(move || run_loop(name, interval, &engine, &shutdown, task))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::error!("Failed to spawn maintenance thread: {e}");
                    None
                }
            })
            .collect();

        log::info!("Maintenance scheduler started");
        Self { shutdown, workers }
    }

    /// Number of live maintenance threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signal every loop and wait for it to exit.
    pub fn stop(self) {
        self.shutdown.request_shutdown();
        for worker in self.workers {
            if worker.join().is_err() {
                log::error!("A maintenance thread panicked");
            }
        }
        log::info!("Maintenance scheduler stopped");
    }
}

type Task = fn(&CacheEngine) -> Result<()>;

fn run_loop(
    name: &str,
    interval: Duration,
    engine: &CacheEngine,
    shutdown: &ShutdownHandler,
    task: Task,
) {
    log::debug!("Maintenance task {name} every {}s", interval.as_secs());
    while !shutdown.wait_timeout(interval) {
        if let Err(e) = task(engine) {
            log::error!("Maintenance task {name} failed: {e}");
        }
    }
    log::debug!("Maintenance task {name} exiting");
}
