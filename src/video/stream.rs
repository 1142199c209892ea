//! Video stream recorder
//!
//! Owns the session's single video channel. Capture runs on the caller's
//! thread: the camera sustains a clearly higher frame rate there than on a
//! background thread, so the coordinator drives it directly.

use crate::capture::traits::{CaptureInterrupt, FrameSource};
use crate::recorder::state::{CaptureEnd, RecordingState};
use crate::session::SessionLayout;
use crate::utils::error::{AppError, AppResult, PostProcessError, StorageError};
use crate::video::encoder::{VideoContainer, VideoSink};
use crate::video::post_process;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Consecutive camera failures tolerated before capture gives up
const MAX_CONSECUTIVE_FRAME_ERRORS: u32 = 5;

/// A finalized video artifact
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedVideo {
    pub path: PathBuf,
    pub container: VideoContainer,
    pub frames: u64,
    pub nominal_fps: f64,
    pub elapsed: Duration,
}

/// Recorder for the session's video channel
pub struct StreamRecorder {
    layout: SessionLayout,
    source: Box<dyn FrameSource>,
    sink: Box<dyn VideoSink>,
    timestamps: Option<BufWriter<File>>,
    state: RecordingState,
    frames: u64,
    elapsed: Duration,
    ffmpeg: String,
    finalized: Option<FinalizedVideo>,
}

impl StreamRecorder {
    /// Bind a camera and a sink to the session directory
    pub fn new(
        layout: SessionLayout,
        source: Box<dyn FrameSource>,
        sink: Box<dyn VideoSink>,
        ffmpeg: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let timestamps = BufWriter::new(File::create(layout.frame_timestamps_path())?);
        Ok(Self {
            layout,
            source,
            sink,
            timestamps: Some(timestamps),
            state: RecordingState::Idle,
            frames: 0,
            elapsed: Duration::ZERO,
            ffmpeg: ffmpeg.into(),
            finalized: None,
        })
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Frames written so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn artifact_path(&self) -> &Path {
        self.sink.path()
    }

    pub fn finalized(&self) -> Option<&FinalizedVideo> {
        self.finalized.as_ref()
    }

    /// Handle that unblocks a camera stuck inside `record`
    pub fn interrupt_handle(&self) -> Option<Arc<dyn CaptureInterrupt>> {
        self.source.interrupt_handle()
    }

    /// Capture frames until `duration` elapses, or until `stop` is
    /// cancelled when `duration` is None.
    ///
    /// Frames and their timestamps are written as they arrive, so whatever
    /// was captured before an interruption is kept.
    pub fn record(
        &mut self,
        duration: Option<Duration>,
        stop: &CancellationToken,
    ) -> AppResult<CaptureEnd> {
        self.state.transition(RecordingState::Recording)?;

        let format = self.source.format().clone();
        match duration {
            Some(d) => tracing::info!(
                "Recording {}x{} @ {}fps for {:?}",
                format.width,
                format.height,
                format.fps,
                d
            ),
            None => tracing::info!(
                "Recording {}x{} @ {}fps until interrupted",
                format.width,
                format.height,
                format.fps
            ),
        }

        let started = Instant::now();
        let deadline = duration.map(|d| started + d);
        let mut consecutive_errors = 0u32;

        let end = loop {
            if stop.is_cancelled() {
                break CaptureEnd::Interrupted;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break CaptureEnd::Elapsed;
            }

            let frame = match self.source.next_frame() {
                Ok(frame) => {
                    consecutive_errors = 0;
                    frame
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        "Failed to capture frame ({}/{}): {}",
                        consecutive_errors,
                        MAX_CONSECUTIVE_FRAME_ERRORS,
                        e
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_FRAME_ERRORS {
                        self.elapsed = started.elapsed();
                        return Err(AppError::Device(e));
                    }
                    continue;
                }
            };

            self.sink.write_frame(&frame)?;
            if let Some(timestamps) = self.timestamps.as_mut() {
                writeln!(timestamps, "{}\t{}", self.frames, frame.captured_at.to_rfc3339())
                    .map_err(StorageError::from)?;
            }
            self.frames += 1;

            if self.frames == 1 {
                tracing::info!("First frame captured: {} bytes", frame.data.len());
            }
        };

        self.elapsed = started.elapsed();
        let fps = if self.elapsed.as_secs_f64() > 0.0 {
            self.frames as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        };
        tracing::info!(
            "Captured {} frames in {:.2}s ({:.1} fps actual), {:?}",
            self.frames,
            self.elapsed.as_secs_f64(),
            fps,
            end
        );

        Ok(end)
    }

    /// Flush and close the video output. Callable once, whether capture
    /// ended normally, was interrupted, or never started.
    pub fn finalize(&mut self) -> Result<FinalizedVideo, StorageError> {
        if self.finalized.is_some() || self.state == RecordingState::Finalizing {
            return Err(StorageError::AlreadyFinalized);
        }
        self.state
            .transition(RecordingState::Finalizing)
            .map_err(|_| StorageError::AlreadyFinalized)?;

        tracing::info!("Finalizing video output {:?}", self.sink.path());

        if let Some(timestamps) = self.timestamps.take() {
            let file = timestamps
                .into_inner()
                .map_err(|e| StorageError::Io(e.into_error()))?;
            file.sync_all()?;
        }

        let path = self.sink.finish()?;

        if let Err(e) = self.source.close() {
            tracing::warn!("Camera did not close cleanly: {}", e);
        }

        let finalized = FinalizedVideo {
            path,
            container: self.sink.container(),
            frames: self.sink.frames_written(),
            nominal_fps: self.source.format().fps,
            elapsed: self.elapsed,
        };

        self.state = RecordingState::Done;
        self.finalized = Some(finalized.clone());
        Ok(finalized)
    }

    /// Write a copy of the finalized artifact retimed to `target_fps`.
    /// The finalized artifact itself is left untouched.
    pub fn post_process(&self, target_fps: f64) -> Result<PathBuf, PostProcessError> {
        let video = self.finalized.as_ref().ok_or(PostProcessError::NotFinalized)?;
        post_process::validate_fps(target_fps)?;

        let output = self
            .layout
            .retimed_video_path(target_fps, video.container.extension());

        match video.container {
            VideoContainer::Mp4 => post_process::retime_mp4(
                &self.ffmpeg,
                &video.path,
                &output,
                video.nominal_fps,
                target_fps,
            )?,
            VideoContainer::Raw => post_process::retime_raw(&video.path, &output, target_fps)?,
        }

        Ok(output)
    }
}
