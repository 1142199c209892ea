//! Session coordinator
//!
//! Owns one capture session end to end: the session directory, the video
//! channel on the calling thread, the four RFID channels on their own
//! threads, and the shutdown sequence that leaves a complete artifact set on
//! disk.

use super::interrupt::{self, ShutdownSignal};
use super::state::{CaptureEnd, RecordingState, SessionSummary};
use crate::capture::camera::FfmpegCameraSource;
use crate::capture::rfid::SerialTagSource;
use crate::capture::sensor::SensorTask;
use crate::capture::traits::{FrameSource, TagSource};
use crate::config::{CameraBackend, CaptureMode, SessionConfig};
use crate::session::SessionLayout;
use crate::utils::counter;
use crate::utils::error::{
    AppError, AppResult, ConfigError, ErrorReport, PostProcessError, StorageError,
};
use crate::video::encoder::open_sink;
use crate::video::stream::StreamRecorder;
use chrono::{DateTime, Local};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// How long shutdown waits for the RFID threads to notice cancellation
const SENSOR_RELEASE_GRACE: Duration = Duration::from_millis(500);

/// How long capture may stay blocked in a frame read after a stop request
/// before the camera is interrupted
const CAPTURE_STOP_GRACE: Duration = Duration::from_secs(2);

/// Opened devices for one session
pub struct Devices {
    pub camera: Box<dyn FrameSource>,
    pub readers: Vec<Box<dyn TagSource>>,
}

impl Devices {
    /// Open the hardware named by `config`
    pub fn open(config: &SessionConfig) -> AppResult<Self> {
        let camera: Box<dyn FrameSource> = match config.camera.backend {
            CameraBackend::Ffmpeg => Box::new(FfmpegCameraSource::open(&config.camera)?),
            #[cfg(feature = "nokhwa-camera")]
            CameraBackend::Nokhwa => Box::new(crate::capture::webcam::NokhwaCameraSource::open(
                &config.camera,
            )?),
            #[cfg(not(feature = "nokhwa-camera"))]
            CameraBackend::Nokhwa => {
                return Err(ConfigError::Invalid(
                    "camera backend \"nokhwa\" requires the nokhwa-camera feature".to_string(),
                )
                .into())
            }
        };

        let readers = config
            .rfid_ports
            .iter()
            .map(|port| Box::new(SerialTagSource::open(port.as_str())) as Box<dyn TagSource>)
            .collect();

        Ok(Self { camera, readers })
    }
}

/// Coordinates one capture session
pub struct SessionCoordinator {
    config: SessionConfig,
    mode: CaptureMode,
    layout: SessionLayout,
    started_at: DateTime<Local>,
    recorder: StreamRecorder,
    sensors: Vec<SensorTask>,
    signal: ShutdownSignal,
    runtime: Option<Runtime>,
    capture_end: Option<CaptureEnd>,
    summary: Option<SessionSummary>,
}

impl SessionCoordinator {
    /// Open the configured hardware and create the session
    pub fn new(config: SessionConfig) -> AppResult<Self> {
        config.validate()?;
        let devices = Devices::open(&config)?;
        Self::with_devices(config, devices)
    }

    /// Create the session around already-opened devices
    pub fn with_devices(config: SessionConfig, devices: Devices) -> AppResult<Self> {
        config.validate()?;
        let mode = config.capture_mode()?;

        if devices.readers.len() != config.rfid_ports.len() {
            return Err(ConfigError::Invalid(format!(
                "expected {} RFID readers, got {}",
                config.rfid_ports.len(),
                devices.readers.len()
            ))
            .into());
        }

        std::fs::create_dir_all(&config.data_root).map_err(|e| ConfigError::DataRoot {
            path: config.data_root.clone(),
            source: e,
        })?;

        let started_at = Local::now();
        let session_path = config.session_path_at(&started_at);
        create_session_dir(&session_path)?;
        tracing::info!("Session directory: {:?}", session_path);

        let layout = SessionLayout::new(&session_path);
        let Devices { camera, readers } = devices;

        let sink = open_sink(&config.camera, camera.format(), &layout)?;
        let recorder = StreamRecorder::new(layout.clone(), camera, sink, config.camera.ffmpeg.clone())?;

        let mut sensors = Vec::with_capacity(readers.len());
        for (index, reader) in readers.into_iter().enumerate() {
            let channel_id = index.to_string();
            let log_path = layout.sensor_log_path(&channel_id);
            sensors.push(SensorTask::new(
                channel_id,
                reader,
                log_path,
                CancellationToken::new(),
            )?);
        }

        Ok(Self {
            config,
            mode,
            layout,
            started_at,
            recorder,
            sensors,
            signal: ShutdownSignal::new(),
            runtime: None,
            capture_end: None,
            summary: None,
        })
    }

    pub fn session_path(&self) -> &Path {
        self.layout.root()
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Handle for requesting a stop from outside the capture thread
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recorder.state()
    }

    pub fn sensors(&self) -> &[SensorTask] {
        &self.sensors
    }

    /// Start the RFID channels and capture video on this thread until the
    /// configured duration elapses or a stop is requested.
    pub fn run(&mut self) -> AppResult<CaptureEnd> {
        if self.recorder.state() != RecordingState::Idle {
            return Err(AppError::State("session has already run".to_string()));
        }

        for sensor in &mut self.sensors {
            if let Err(e) = sensor.start() {
                tracing::error!("RFID channel {} failed to start: {}", sensor.channel_id(), e);
            }
        }

        let capture_done = CancellationToken::new();
        match watcher_runtime() {
            Ok(runtime) => {
                interrupt::install(&runtime, self.signal.clone());
                match self.recorder.interrupt_handle() {
                    Some(camera) => {
                        interrupt::arm_escalation(
                            &runtime,
                            self.signal.clone(),
                            capture_done.clone(),
                            CAPTURE_STOP_GRACE,
                            camera,
                        );
                    }
                    None => tracing::debug!("Camera cannot be interrupted mid-read"),
                }
                self.runtime = Some(runtime);
            }
            Err(e) => tracing::error!("Interrupt watcher unavailable: {}", e),
        }

        let _capture_done = capture_done.drop_guard();
        let end = self
            .recorder
            .record(self.mode.duration(), self.signal.stop_token())?;
        self.capture_end = Some(end);
        Ok(end)
    }

    /// Finalize the session and report what was written.
    ///
    /// Safe to call more than once: later calls return the first summary.
    pub fn shutdown(&mut self) -> AppResult<SessionSummary> {
        if let Some(summary) = &self.summary {
            return Ok(summary.clone());
        }
        if !self.signal.begin_shutdown() {
            return Err(AppError::State("shutdown already attempted".to_string()));
        }

        tracing::info!("Shutting down session {:?}", self.layout.root());

        for sensor in &mut self.sensors {
            sensor.cancel();
        }

        // Video goes first; the RFID threads wind down meanwhile
        let finalized = self.recorder.finalize();

        let deadline = Instant::now() + SENSOR_RELEASE_GRACE;
        for sensor in &mut self.sensors {
            sensor.release_by(deadline);
        }

        let video = finalized?;
        let session_path = self.layout.root().to_path_buf();

        let frames_written = counter::count_artifact_frames(&video.path, video.container, &session_path)?;
        let channel_lines = counter::count_log_lines(&session_path)?;
        let measured_fps = match counter::measured_fps(&session_path) {
            Ok(fps) => fps,
            Err(e) => {
                tracing::warn!("Could not measure capture rate: {}", e);
                None
            }
        };

        tracing::info!("Frames in {:?}: {}", video.path, frames_written);
        if let Some(fps) = measured_fps {
            tracing::info!("Measured capture rate: {:.2} fps", fps);
        }
        for (channel, lines) in &channel_lines {
            tracing::info!("Lines written to RFID channel {}: {}", channel, lines);
        }

        let mut post_processed = None;
        let mut post_process_error = None;
        if self.config.fps_post_process {
            match self.post_process(measured_fps) {
                Ok(path) => {
                    tracing::info!(
                        "Finished post processing at {}",
                        Local::now().format("%Y-%m-%d %H:%M:%S")
                    );
                    post_processed = Some(path.to_string_lossy().to_string());
                }
                Err(e) => {
                    tracing::error!("Post-processing failed, {:?} is unchanged: {}", video.path, e);
                    post_process_error = Some(ErrorReport::from(&AppError::from(e)));
                }
            }
        }

        let summary = SessionSummary {
            session_path: session_path.to_string_lossy().to_string(),
            started_at: self.started_at,
            finished_at: Local::now(),
            capture_end: self.capture_end,
            video_path: video.path.to_string_lossy().to_string(),
            frames_written,
            measured_fps,
            channel_lines,
            post_processed,
            post_process_error,
        };

        if let Err(e) = write_summary(&self.layout.summary_path(), &summary) {
            tracing::warn!("Failed to write session summary: {}", e);
        }

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }

        self.summary = Some(summary.clone());
        Ok(summary)
    }

    fn post_process(&self, measured_fps: Option<f64>) -> Result<PathBuf, PostProcessError> {
        let target = self
            .config
            .post_process_fps
            .or(measured_fps)
            .ok_or(PostProcessError::InvalidFps(0.0))?;
        tracing::info!("Post-processing to {:.2} fps", target);
        self.recorder.post_process(target)
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        if self.summary.is_none() && !self.signal.is_shutting_down() {
            tracing::warn!("Session {:?} dropped without shutdown", self.layout.root());
            for sensor in &mut self.sensors {
                sensor.release(Duration::ZERO);
            }
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn create_session_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir(path).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => ConfigError::SessionExists(path.to_path_buf()),
        _ => ConfigError::DataRoot {
            path: path.to_path_buf(),
            source: e,
        },
    })
}

fn watcher_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("interrupt-watcher")
        .enable_all()
        .build()
}

fn write_summary(path: &Path, summary: &SessionSummary) -> AppResult<()> {
    let json = serde_json::to_string_pretty(summary).map_err(StorageError::from)?;
    std::fs::write(path, json)?;
    Ok(())
}
