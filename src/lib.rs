pub mod background;
pub mod clock;
pub mod config;
pub mod db;
pub mod dosing;
pub mod error;
pub mod medications;
pub mod models;
pub mod notify;

use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::clock::SystemClock;
use crate::config::EngineConfig;
use crate::error::CareError;

/// Run the scheduling daemon until Ctrl-C.
pub fn run() -> Result<(), CareError> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let engine = EngineConfig::load(&config::config_path())?;
    let db_path = config::database_path();

    // Fail fast on an unusable database before the loop starts.
    db::open_database(&db_path)?;

    let scheduler = background::start_background_scheduler(db_path, engine, Arc::new(SystemClock));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CareError::TransientIo(format!("cannot start runtime: {e}")))?;
    let signal = runtime.block_on(tokio::signal::ctrl_c());

    tracing::info!("Shutdown requested, waiting for the current cycle");
    drop(scheduler);

    signal.map_err(|e| CareError::TransientIo(format!("cannot listen for Ctrl-C: {e}")))
}
