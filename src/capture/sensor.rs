//! RFID sensor tasks
//!
//! Each RFID endpoint gets its own background thread running a blocking
//! scan loop. Observations are appended to that channel's log inside the
//! session directory. Device failures are retried in place and never leave
//! the task, so one dead reader cannot stall capture or the other channels.

use crate::capture::traits::{TagRead, TagSource};
use crate::utils::error::{AppError, AppResult};
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const RETRY_BACKOFF_MIN: Duration = Duration::from_millis(50);
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(2);
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Append-only log of one channel's observations
#[derive(Debug, Clone)]
pub struct TagLog {
    path: PathBuf,
    channel_id: String,
}

impl TagLog {
    /// Create the log file (empty) so it exists even if no tag is ever read
    pub fn create(path: impl Into<PathBuf>, channel_id: impl Into<String>) -> std::io::Result<Self> {
        let path = path.into();
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            channel_id: channel_id.into(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one observation. The file is opened per write so every line
    /// is on disk once this returns.
    pub fn append(&self, read: &TagRead) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(
            file,
            "{}\t{}\t{}",
            read.timestamp.format("%Y-%m-%d %H:%M:%S%.6f"),
            self.channel_id,
            read.payload
        )
    }
}

/// Counters shared between a sensor thread and its owner
#[derive(Debug, Default)]
struct SensorCounters {
    observations: AtomicU64,
    device_errors: AtomicU64,
}

/// One RFID acquisition channel
pub struct SensorTask {
    channel_id: String,
    endpoint: String,
    log: TagLog,
    source: Option<Box<dyn TagSource>>,
    counters: Arc<SensorCounters>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<Box<dyn TagSource>>>>,
}

impl SensorTask {
    /// Bind `source` to `channel_id`, logging to `log_path`
    pub fn new(
        channel_id: impl Into<String>,
        source: Box<dyn TagSource>,
        log_path: impl Into<PathBuf>,
        cancel: CancellationToken,
    ) -> std::io::Result<Self> {
        let channel_id = channel_id.into();
        let log = TagLog::create(log_path, channel_id.clone())?;
        Ok(Self {
            endpoint: source.endpoint().to_string(),
            channel_id,
            log,
            source: Some(source),
            counters: Arc::new(SensorCounters::default()),
            cancel,
            handle: Mutex::new(None),
        })
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Observations written to the log so far
    pub fn observations(&self) -> u64 {
        self.counters.observations.load(Ordering::Relaxed)
    }

    /// Device errors seen so far
    pub fn device_errors(&self) -> u64 {
        self.counters.device_errors.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the scan thread. Not joined during normal operation.
    pub fn start(&mut self) -> AppResult<()> {
        let source = self.source.take().ok_or_else(|| {
            AppError::State(format!("sensor channel {} already started", self.channel_id))
        })?;

        let channel_id = self.channel_id.clone();
        let log = self.log.clone();
        let counters = self.counters.clone();
        let cancel = self.cancel.clone();

        let handle = std::thread::Builder::new()
            .name(format!("rfid-{}", self.channel_id))
            .spawn(move || scan(&channel_id, source, &log, &counters, &cancel))?;

        *self.handle.lock() = Some(handle);
        tracing::info!("RFID channel {} scanning {}", self.channel_id, self.endpoint);
        Ok(())
    }

    /// Ask the scan loop to stop without waiting for it.
    ///
    /// A source that was never started is released immediately.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        if let Some(mut source) = self.source.take() {
            source.release();
        }
    }

    /// Stop the scan loop and release the device handle, waiting up to
    /// `grace` for the thread.
    pub fn release(&mut self, grace: Duration) {
        self.cancel();
        self.release_by(Instant::now() + grace);
    }

    /// Wait until `deadline` for a cancelled scan thread, then release its
    /// device handle. A thread still blocked in device I/O after that is
    /// abandoned to process exit.
    pub fn release_by(&mut self, deadline: Instant) {
        self.cancel();

        let Some(handle) = self.handle.lock().take() else {
            return;
        };

        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(CANCEL_POLL);
        }

        if !handle.is_finished() {
            tracing::warn!(
                "RFID channel {} still blocked on {}; abandoning it",
                self.channel_id,
                self.endpoint
            );
            return;
        }

        match handle.join() {
            Ok(mut source) => {
                source.release();
                tracing::info!(
                    "RFID channel {} released ({} observations, {} device errors)",
                    self.channel_id,
                    self.observations(),
                    self.device_errors()
                );
            }
            Err(_) => tracing::error!("RFID channel {} thread panicked", self.channel_id),
        }
    }
}

/// Blocking scan loop. Runs until `cancel` fires and hands the source back.
fn scan(
    channel_id: &str,
    mut source: Box<dyn TagSource>,
    log: &TagLog,
    counters: &SensorCounters,
    cancel: &CancellationToken,
) -> Box<dyn TagSource> {
    let mut backoff = RETRY_BACKOFF_MIN;

    while !cancel.is_cancelled() {
        match source.read_tag() {
            Ok(Some(read)) => {
                backoff = RETRY_BACKOFF_MIN;
                match log.append(&read) {
                    Ok(()) => {
                        counters.observations.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("RFID {} read {}", channel_id, read.payload);
                    }
                    Err(e) => tracing::error!(
                        "RFID channel {} failed to write {:?}: {}",
                        channel_id,
                        log.path(),
                        e
                    ),
                }
            }
            Ok(None) => {}
            Err(e) => {
                counters.device_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("RFID channel {}: {} (retrying in {:?})", channel_id, e, backoff);
                sleep_unless_cancelled(backoff, cancel);
                backoff = (backoff * 2).min(RETRY_BACKOFF_MAX);
            }
        }
    }

    tracing::debug!("RFID channel {} scan loop stopped", channel_id);
    source
}

fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) {
    let deadline = Instant::now() + duration;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}
