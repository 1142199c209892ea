//! Capture trait definitions
//!
//! Device-agnostic seams for the two kinds of acquisition channel: the
//! single video stream and the RFID tag readers.

use crate::utils::error::DeviceError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Geometry and encoding of the frames a source produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Nominal frame rate
    pub fps: f64,

    /// FFmpeg pixel format name of each frame buffer (e.g. "yuv420p")
    pub pixel_format: String,
}

impl VideoFormat {
    /// Size of one frame in bytes, if the pixel format is uncompressed
    pub fn frame_size(&self) -> Option<usize> {
        let pixels = self.width as usize * self.height as usize;
        match self.pixel_format.as_str() {
            "yuv420p" | "nv12" => Some(pixels * 3 / 2),
            "yuyv422" => Some(pixels * 2),
            "rgb24" => Some(pixels * 3),
            "rgba" => Some(pixels * 4),
            "gray" => Some(pixels),
            _ => None,
        }
    }
}

/// One captured video frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

/// One RFID observation
#[derive(Debug, Clone, PartialEq)]
pub struct TagRead {
    pub timestamp: DateTime<Local>,
    pub payload: String,
}

/// A video acquisition device
///
/// Sources are driven from the coordinator's own thread, so they need not
/// be `Send`.
pub trait FrameSource {
    fn format(&self) -> &VideoFormat;

    /// Block until the device delivers the next frame.
    fn next_frame(&mut self) -> Result<Frame, DeviceError>;

    /// Stop the device and release its handle.
    fn close(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Handle that unblocks a pending `next_frame` from another thread.
    /// None if the device cannot be interrupted.
    fn interrupt_handle(&self) -> Option<Arc<dyn CaptureInterrupt>> {
        None
    }
}

/// Forces a blocked video device to give up its current read
pub trait CaptureInterrupt: Send + Sync {
    fn interrupt(&self);
}

/// An RFID reader endpoint
pub trait TagSource: Send {
    /// Device path or other stable name of the endpoint
    fn endpoint(&self) -> &str;

    /// Block until the next observation. `Ok(None)` means the read returned
    /// without a tag (idle line, read timeout).
    fn read_tag(&mut self) -> Result<Option<TagRead>, DeviceError>;

    /// Release the device handle.
    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        let format = VideoFormat {
            width: 640,
            height: 480,
            fps: 30.0,
            pixel_format: "yuv420p".to_string(),
        };
        assert_eq!(format.frame_size(), Some(460_800));

        let mjpeg = VideoFormat {
            pixel_format: "mjpeg".to_string(),
            ..format
        };
        assert_eq!(mjpeg.frame_size(), None);
    }
}
