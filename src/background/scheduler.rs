//! Background cycle driver.
//!
//! Spawns one OS thread that runs a [`CycleRunner`] cycle, then sleeps
//! `cycle_interval_secs` in small increments so shutdown stays responsive.
//! The shutdown flag is only checked between cycles; a running cycle always
//! completes. Each cycle opens its own connection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::runner::{CycleReport, CycleRunner};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::db::open_database;
use crate::error::CareError;
use crate::notify::{ContactNotifier, HttpGateway, NotificationChannel, SqliteContactDirectory};

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(250);

/// Timeout for a single gateway request.
const GATEWAY_TIMEOUT_SECS: u64 = 15;

/// Handle for the background scheduler thread.
///
/// Dropping the handle requests shutdown and joins the thread.
pub struct SchedulerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Request graceful shutdown. The current cycle (if running) completes.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start the background scheduler on a separate thread.
///
/// The HTTP gateway is built on that thread, so this is safe to call from
/// inside or outside an async runtime.
pub fn start_background_scheduler(
    db_path: PathBuf,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
) -> SchedulerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(
            interval_secs = config.cycle_interval_secs,
            db = %db_path.display(),
            "Background scheduler started"
        );
        scheduler_loop(&db_path, config, clock.as_ref(), &flag);
    });

    SchedulerHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn scheduler_loop(db_path: &Path, config: EngineConfig, clock: &dyn Clock, shutdown: &AtomicBool) {
    let interval = Duration::from_secs(config.cycle_interval_secs);
    let mut runner = CycleRunner::new(config);
    let mut gateway: Option<HttpGateway> = None;

    while !shutdown.load(Ordering::Relaxed) {
        if gateway.is_none() {
            match HttpGateway::new(GATEWAY_TIMEOUT_SECS) {
                Ok(g) => gateway = Some(g),
                Err(e) => tracing::error!(error = %e, "Cannot build notification gateway"),
            }
        }

        if let Some(channel) = gateway.as_ref() {
            match run_once(db_path, &mut runner, channel, clock) {
                Ok(report) => {
                    let errors = report.error_count();
                    if errors > 0 {
                        tracing::warn!(errors, "Cycle finished with errors");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Cycle failed"),
            }
        }

        // Sleep in small increments for responsive shutdown
        let mut slept = Duration::ZERO;
        while slept < interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            std::thread::sleep(SLEEP_GRANULARITY);
            slept += SLEEP_GRANULARITY;
        }
    }
    tracing::info!("Background scheduler shutting down");
}

/// Open the database and run one cycle against it.
pub fn run_once(
    db_path: &Path,
    runner: &mut CycleRunner,
    channel: &dyn NotificationChannel,
    clock: &dyn Clock,
) -> Result<CycleReport, CareError> {
    let conn = open_database(db_path)?;
    let directory = SqliteContactDirectory::new(&conn);
    let notifier = ContactNotifier::new(channel, &directory).with_log(&conn);
    runner.run_cycle(&conn, clock.now(), &notifier)
}
