//! Fake devices for unit tests

use crate::capture::traits::{CaptureInterrupt, Frame, FrameSource, TagRead, TagSource, VideoFormat};
use crate::utils::error::DeviceError;
use chrono::Local;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Held by tests that install signal watchers or raise signals, since
/// every watcher in the process sees a raised signal
pub static SIGNAL_LOCK: Mutex<()> = parking_lot::const_mutex(());

fn test_format(fps: f64) -> VideoFormat {
    VideoFormat {
        width: 4,
        height: 2,
        fps,
        pixel_format: "gray".to_string(),
    }
}

/// Camera producing small frames at a fixed interval
pub struct FakeCamera {
    format: VideoFormat,
    interval: Duration,
    produced: u64,
    failures_remaining: u32,
}

impl FakeCamera {
    pub fn new(interval: Duration) -> Self {
        Self {
            format: test_format(1.0 / interval.as_secs_f64()),
            interval,
            produced: 0,
            failures_remaining: 0,
        }
    }

    /// Fail the next `count` reads before producing frames again
    pub fn failing(mut self, count: u32) -> Self {
        self.failures_remaining = count;
        self
    }
}

impl FrameSource for FakeCamera {
    fn format(&self) -> &VideoFormat {
        &self.format
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        std::thread::sleep(self.interval);
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(DeviceError::Camera("simulated frame drop".to_string()));
        }
        self.produced += 1;
        Ok(Frame {
            data: vec![(self.produced % 256) as u8; 8],
            captured_at: Local::now(),
        })
    }
}

/// Reader that reports `count` tags, then idles like a quiet serial line
pub struct ScriptedTagSource {
    endpoint: String,
    remaining: u64,
    next: u64,
}

impl ScriptedTagSource {
    pub fn new(endpoint: &str, count: u64) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            remaining: count,
            next: 0,
        }
    }
}

impl TagSource for ScriptedTagSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn read_tag(&mut self) -> Result<Option<TagRead>, DeviceError> {
        if self.remaining == 0 {
            std::thread::sleep(Duration::from_millis(5));
            return Ok(None);
        }
        std::thread::sleep(Duration::from_millis(2));
        self.remaining -= 1;
        let payload = format!("{}-tag-{}", self.endpoint, self.next);
        self.next += 1;
        Ok(Some(TagRead {
            timestamp: Local::now(),
            payload,
        }))
    }
}

/// Reader whose device is permanently broken
pub struct FailingTagSource {
    endpoint: String,
}

impl FailingTagSource {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
        }
    }
}

impl TagSource for FailingTagSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn read_tag(&mut self) -> Result<Option<TagRead>, DeviceError> {
        Err(DeviceError::Disconnected(self.endpoint.clone()))
    }
}

/// Camera that hangs in `next_frame` until its capture is interrupted
pub struct StalledCamera {
    format: VideoFormat,
    release: Arc<StallRelease>,
}

#[derive(Default)]
struct StallRelease {
    released: Mutex<bool>,
    wake: Condvar,
}

impl CaptureInterrupt for StallRelease {
    fn interrupt(&self) {
        *self.released.lock() = true;
        self.wake.notify_all();
    }
}

impl StalledCamera {
    pub fn new() -> Self {
        Self {
            format: test_format(30.0),
            release: Arc::new(StallRelease::default()),
        }
    }
}

impl FrameSource for StalledCamera {
    fn format(&self) -> &VideoFormat {
        &self.format
    }

    fn next_frame(&mut self) -> Result<Frame, DeviceError> {
        let mut released = self.release.released.lock();
        while !*released {
            self.release.wake.wait(&mut released);
        }
        Err(DeviceError::Disconnected("stalled camera".to_string()))
    }

    fn interrupt_handle(&self) -> Option<Arc<dyn CaptureInterrupt>> {
        Some(self.release.clone())
    }
}

/// Reader stuck in a long blocking read that ignores cancellation
pub struct BlockingTagSource {
    endpoint: String,
    block: Duration,
}

impl BlockingTagSource {
    pub fn new(endpoint: &str, block: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            block,
        }
    }
}

impl TagSource for BlockingTagSource {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn read_tag(&mut self) -> Result<Option<TagRead>, DeviceError> {
        std::thread::sleep(self.block);
        Ok(None)
    }
}
