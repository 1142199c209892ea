//! V4L2 camera capture through ffmpeg
//!
//! ffmpeg opens the camera device and writes raw yuv420p frames to its
//! stdout; each `next_frame` reads exactly one frame from the pipe.

use crate::capture::traits::{CaptureInterrupt, Frame, FrameSource, VideoFormat};
use crate::config::CameraSettings;
use crate::utils::error::DeviceError;
use chrono::Local;
use parking_lot::Mutex;
use std::io::{BufReader, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;

/// Pixel format requested from ffmpeg
const CAPTURE_PIXEL_FORMAT: &str = "yuv420p";

/// Camera source backed by an `ffmpeg -f v4l2` child process
pub struct FfmpegCameraSource {
    process: Arc<CaptureProcess>,
    stdout: BufReader<ChildStdout>,
    format: VideoFormat,
    frame_size: usize,
    frames_read: u64,
}

impl FfmpegCameraSource {
    /// Start capturing from the configured camera device
    pub fn open(settings: &CameraSettings) -> Result<Self, DeviceError> {
        let format = VideoFormat {
            width: settings.width,
            height: settings.height,
            fps: settings.framerate as f64,
            pixel_format: CAPTURE_PIXEL_FORMAT.to_string(),
        };
        let frame_size = format.frame_size().ok_or_else(|| {
            DeviceError::Camera(format!("unsupported pixel format {}", format.pixel_format))
        })?;

        let args = build_capture_args(settings);
        tracing::info!("Starting camera capture: {} {:?}", settings.ffmpeg, args);

        let mut command = Command::new(&settings.ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        // Keep the terminal's Ctrl-C away from ffmpeg; the coordinator owns shutdown.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut process = command.spawn().map_err(|e| DeviceError::Open {
            endpoint: settings.device.clone(),
            source: e,
        })?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| DeviceError::Camera("Failed to capture FFmpeg stdout".to_string()))?;

        Ok(Self {
            process: Arc::new(CaptureProcess(Mutex::new(process))),
            stdout: BufReader::with_capacity(frame_size * 2, stdout),
            format,
            frame_size,
            frames_read: 0,
        })
    }

    /// Number of frames read so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

impl FrameSource for FfmpegCameraSource {
    fn format(&self) -> &VideoFormat {
        &self.format
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        let mut buffer = vec![0u8; self.frame_size];

        match self.stdout.read_exact(&mut buffer) {
            Ok(()) => {
                self.frames_read += 1;
                Ok(Frame {
                    data: buffer,
                    captured_at: Local::now(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                DeviceError::Disconnected("ffmpeg camera stream ended".to_string()),
            ),
            Err(e) => Err(DeviceError::Camera(format!("Failed to read frame: {}", e))),
        }
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        let mut process = self.process.0.lock();
        let _ = process.kill();
        process
            .wait()
            .map_err(|e| DeviceError::Camera(format!("Failed to reap ffmpeg capture: {}", e)))?;
        tracing::info!("Camera capture closed after {} frames", self.frames_read);
        Ok(())
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn CaptureInterrupt>> {
        Some(self.process.clone())
    }
}

impl Drop for FfmpegCameraSource {
    fn drop(&mut self) {
        self.process.interrupt();
    }
}

/// The ffmpeg capture child, killable from any thread
struct CaptureProcess(Mutex<Child>);

impl CaptureInterrupt for CaptureProcess {
    /// Killing ffmpeg closes its stdout, so a blocked `read_exact` ends
    fn interrupt(&self) {
        if let Err(e) = self.0.lock().kill() {
            tracing::debug!("ffmpeg capture already exited: {}", e);
        }
    }
}

fn build_capture_args(settings: &CameraSettings) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "v4l2".to_string(),
        "-framerate".to_string(),
        settings.framerate.to_string(),
        "-video_size".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-i".to_string(),
        settings.device.clone(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        CAPTURE_PIXEL_FORMAT.to_string(),
        "-".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_args_request_raw_frames() {
        let settings = CameraSettings {
            device: "/dev/video1".to_string(),
            framerate: 20,
            ..CameraSettings::default()
        };
        let args = build_capture_args(&settings);

        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "/dev/video1");
        assert!(args.windows(2).any(|w| w[0] == "-framerate" && w[1] == "20"));
        assert!(args.windows(2).any(|w| w[0] == "-video_size" && w[1] == "640x480"));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[test]
    fn test_open_missing_binary_is_device_error() {
        let settings = CameraSettings {
            ffmpeg: "/nonexistent/ffmpeg".to_string(),
            ..CameraSettings::default()
        };
        let err = FfmpegCameraSource::open(&settings).err().unwrap();
        assert!(matches!(err, DeviceError::Open { .. }));
    }
}
