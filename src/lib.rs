//! Cage Recorder - synchronized video and RFID capture sessions.
//!
//! This is the library crate behind the `cage-recorder` binary. It provides
//! session setup, the acquisition channels and the shutdown sequence.

pub mod capture;
pub mod config;
pub mod recorder;
pub mod session;
pub mod utils;
pub mod video;

use chrono::Local;
use config::SessionConfig;
use recorder::{CaptureEnd, SessionCoordinator, SessionSummary};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utils::error::AppResult;

/// Initialize logging. `level` overrides `RUST_LOG` when given.
pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => tracing_subscriber::EnvFilter::new(format!(
            "cage_recorder={level},cage_recorder_lib={level}"
        )),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "cage_recorder=info,cage_recorder_lib=info".into()),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Run one session from start to summary.
///
/// Shutdown runs even when capture fails, so whatever was captured is
/// finalized; the capture error is returned afterwards.
pub fn run_session(config: SessionConfig) -> AppResult<SessionSummary> {
    tracing::info!("Starting Cage Recorder v{}", env!("CARGO_PKG_VERSION"));

    let mut session = SessionCoordinator::new(config)?;
    let captured = session.run();

    match &captured {
        Ok(CaptureEnd::Elapsed) => tracing::info!(
            "Finished recording at {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ),
        Ok(CaptureEnd::Interrupted) => tracing::info!("Recording interrupted"),
        Err(e) => tracing::error!("Capture failed: {}", e),
    }

    let summary = session.shutdown()?;
    match captured {
        Err(e) if e.is_fatal() => Err(e),
        _ => Ok(summary),
    }
}
