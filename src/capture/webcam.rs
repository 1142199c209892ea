//! In-process webcam capture using nokhwa
//!
//! Alternative to the ffmpeg capture source. Raw camera buffers are handed
//! to the encoder as-is; the pixel format is mapped to the matching ffmpeg
//! name so the encoder can convert.

use crate::capture::traits::{Frame, FrameSource, VideoFormat};
use crate::config::CameraSettings;
use crate::utils::error::DeviceError;
use chrono::Local;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
};
use nokhwa::Camera;

/// Webcam source using nokhwa's native backend
pub struct NokhwaCameraSource {
    camera: Camera,
    format: VideoFormat,
    frames_read: u64,
}

impl NokhwaCameraSource {
    pub fn open(settings: &CameraSettings) -> Result<Self, DeviceError> {
        let index = camera_index(&settings.device);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            configured_format(settings),
        ));

        let mut camera = Camera::new(index.clone(), requested)
            .map_err(|e| DeviceError::Camera(format!("Failed to open camera {:?}: {}", index, e)))?;
        camera
            .open_stream()
            .map_err(|e| DeviceError::Camera(format!("Failed to open camera stream: {}", e)))?;

        let camera_format = camera.camera_format();
        let frame_format = camera_format.format();
        let pixel_format = match frame_format {
            FrameFormat::YUYV => "yuyv422",
            FrameFormat::NV12 => "nv12",
            FrameFormat::RAWRGB => "rgb24",
            FrameFormat::MJPEG => "mjpeg",
            FrameFormat::GRAY => "gray",
            _ => {
                tracing::warn!("Unknown camera format {:?}, assuming yuyv422", frame_format);
                "yuyv422"
            }
        };

        let format = VideoFormat {
            width: camera_format.resolution().width(),
            height: camera_format.resolution().height(),
            fps: camera_format.frame_rate() as f64,
            pixel_format: pixel_format.to_string(),
        };

        tracing::info!(
            "Webcam opened: {}x{} @ {}fps, format={:?} (requested {}x{} @ {}fps)",
            format.width,
            format.height,
            format.fps,
            frame_format,
            settings.width,
            settings.height,
            settings.framerate
        );

        Ok(Self {
            camera,
            format,
            frames_read: 0,
        })
    }
}

impl FrameSource for NokhwaCameraSource {
    fn format(&self) -> &VideoFormat {
        &self.format
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        // Blocks until the camera delivers; the camera controls the timing.
        let buffer = self
            .camera
            .frame()
            .map_err(|e| DeviceError::Camera(format!("Failed to capture frame: {}", e)))?;
        self.frames_read += 1;

        Ok(Frame {
            data: buffer.buffer().to_vec(),
            captured_at: Local::now(),
        })
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.camera
            .stop_stream()
            .map_err(|e| DeviceError::Camera(format!("Error stopping camera stream: {}", e)))?;
        tracing::info!("Webcam closed after {} frames", self.frames_read);
        Ok(())
    }
}

/// Resolution and rate the camera should get as close to as it can
fn configured_format(settings: &CameraSettings) -> CameraFormat {
    CameraFormat::new_from(
        settings.width,
        settings.height,
        FrameFormat::YUYV,
        settings.framerate,
    )
}

/// Map a configured device ("/dev/video2", "2" or a backend-specific name)
/// to a nokhwa camera index.
fn camera_index(device: &str) -> CameraIndex {
    let trimmed = device.trim_start_matches("/dev/video");
    match trimmed.parse::<u32>() {
        Ok(idx) => CameraIndex::Index(idx),
        Err(_) => CameraIndex::String(device.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_index_from_device_path() {
        assert_eq!(camera_index("/dev/video2"), CameraIndex::Index(2));
        assert_eq!(camera_index("0"), CameraIndex::Index(0));
        assert_eq!(
            camera_index("usb-cam"),
            CameraIndex::String("usb-cam".to_string())
        );
    }

    #[test]
    fn test_requested_format_follows_settings() {
        let settings = CameraSettings {
            width: 1280,
            height: 720,
            framerate: 25,
            ..CameraSettings::default()
        };
        let format = configured_format(&settings);
        assert_eq!(format.width(), 1280);
        assert_eq!(format.height(), 720);
        assert_eq!(format.frame_rate(), 25);
        assert_eq!(format.format(), FrameFormat::YUYV);
    }
}
