//! Session directory layout
//!
//! A session is one capture run. Everything it produces lands in a single
//! directory named after the local time the session was constructed:
//! - video.mp4 / video.raw: the video artifact
//! - video_timestamps.txt: one line per frame written
//! - rfid_reader_<id>.txt: one log per RFID channel
//! - summary.json: counts reported at shutdown

use chrono::{DateTime, TimeZone};
use std::path::{Path, PathBuf};

/// chrono format of a session directory name, e.g. `2024_03_07_14:05:09`
pub const SESSION_DIR_FORMAT: &str = "%Y_%m_%d_%H:%M:%S";

/// Frame timestamp log written alongside the video artifact
pub const FRAME_TIMESTAMPS_FILE: &str = "video_timestamps.txt";

/// Summary written at the end of shutdown
pub const SUMMARY_FILE: &str = "summary.json";

const VIDEO_STEM: &str = "video";
const SENSOR_LOG_PREFIX: &str = "rfid_reader_";
const SENSOR_LOG_EXTENSION: &str = "txt";

/// Format the directory name for a session started at `time`
pub fn session_dir_name<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(SESSION_DIR_FORMAT).to_string()
}

/// File naming inside one session directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn video_path(&self, extension: &str) -> PathBuf {
        self.root.join(format!("{VIDEO_STEM}.{extension}"))
    }

    /// Output path of a retimed copy of the video artifact
    pub fn retimed_video_path(&self, fps: f64, extension: &str) -> PathBuf {
        self.root
            .join(format!("{VIDEO_STEM}_{fps:.2}fps.{extension}"))
    }

    pub fn frame_timestamps_path(&self) -> PathBuf {
        self.root.join(FRAME_TIMESTAMPS_FILE)
    }

    pub fn sensor_log_path(&self, channel_id: &str) -> PathBuf {
        self.root
            .join(format!("{SENSOR_LOG_PREFIX}{channel_id}.{SENSOR_LOG_EXTENSION}"))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    /// Channel id of a sensor log file name, if it is one
    pub fn sensor_channel_of(file_name: &str) -> Option<&str> {
        file_name
            .strip_prefix(SENSOR_LOG_PREFIX)?
            .strip_suffix(SENSOR_LOG_EXTENSION)?
            .strip_suffix('.')
            .filter(|id| !id.is_empty())
    }
}
