//! Session configuration
//!
//! Settings are read from a TOML file, then overridden by `CAGE_RECORDER_*`
//! environment variables, then by CLI flags.
//!
//! ```toml
//! [tracker_cage_record]
//! data_root = "/data/"
//! user_interrupt_only = false
//! record_time_sec = 300
//! fps_post_process = true
//!
//! [camera]
//! device = "/dev/video0"
//! width = 640
//! height = 480
//! framerate = 30
//! encoder = "ffmpeg"
//! ```

use crate::session::session_dir_name;
use crate::utils::error::ConfigError;
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "cage-recorder.toml";

/// The four RFID reader endpoints wired to the cage
pub const DEFAULT_RFID_PORTS: [&str; 4] = [
    "/dev/ttyUSB0",
    "/dev/ttyUSB1",
    "/dev/ttyUSB2",
    "/dev/ttyUSB3",
];

/// How the capture ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Capture until an external interrupt arrives
    UserInterrupt,
    /// Capture for a fixed duration
    Bounded(Duration),
}

impl CaptureMode {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            CaptureMode::UserInterrupt => None,
            CaptureMode::Bounded(duration) => Some(*duration),
        }
    }
}

/// Camera acquisition backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// V4L2 capture through an ffmpeg child process
    Ffmpeg,
    /// In-process capture through nokhwa (`nokhwa-camera` feature)
    Nokhwa,
}

/// Video artifact encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// H.264 in MP4 through ffmpeg
    Ffmpeg,
    /// Length-prefixed raw frame container
    Raw,
}

/// Camera capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub backend: CameraBackend,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub encoder: EncoderKind,
    /// ffmpeg binary used for capture, encoding and post-processing
    pub ffmpeg: String,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Ffmpeg,
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            framerate: 30,
            encoder: EncoderKind::Ffmpeg,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

/// Validated session settings
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Directory under which session directories are created
    pub data_root: PathBuf,
    /// Capture until interrupted instead of for `record_time_sec`
    pub user_interrupt_only: bool,
    pub record_time_sec: Option<u64>,
    /// Retime the finalized video after capture
    pub fps_post_process: bool,
    /// Target rate for post-processing. Defaults to the measured capture rate.
    pub post_process_fps: Option<f64>,
    pub rfid_ports: Vec<String>,
    pub camera: CameraSettings,
}

impl SessionConfig {
    /// Session that runs until interrupted
    pub fn user_interrupt(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            user_interrupt_only: true,
            record_time_sec: None,
            fps_post_process: false,
            post_process_fps: None,
            rfid_ports: DEFAULT_RFID_PORTS.iter().map(|p| p.to_string()).collect(),
            camera: CameraSettings::default(),
        }
    }

    /// Session that records for `record_time_sec` seconds
    pub fn bounded(data_root: impl Into<PathBuf>, record_time_sec: u64) -> Self {
        Self {
            user_interrupt_only: false,
            record_time_sec: Some(record_time_sec),
            ..Self::user_interrupt(data_root)
        }
    }

    /// Load configuration from `path`, or from `./cage-recorder.toml` when
    /// `path` is `None`, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
            path: path.clone(),
            source: e,
        })?;

        let mut file = parse_toml(&contents, &path)?;
        let overrides = apply_env_overrides(&mut file.tracker_cage_record)?;
        if !overrides.is_empty() {
            tracing::info!("Environment overrides applied: {}", overrides.join(", "));
        }

        let config = Self::from_file(file)?;
        tracing::debug!("Loaded session config from {:?}", path);
        Ok(config)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let record = file.tracker_cage_record;

        let data_root = record
            .data_root
            .filter(|root| !root.trim().is_empty())
            .ok_or_else(|| ConfigError::Invalid("data_root must be set".to_string()))?;

        let config = Self {
            data_root: PathBuf::from(data_root),
            user_interrupt_only: record.user_interrupt_only,
            record_time_sec: record.record_time_sec,
            fps_post_process: record.fps_post_process,
            post_process_fps: record.post_process_fps,
            rfid_ports: record.rfid_ports.unwrap_or_else(|| {
                DEFAULT_RFID_PORTS.iter().map(|p| p.to_string()).collect()
            }),
            camera: file.camera,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check every setting, including the duration mode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capture_mode()?;

        if self.rfid_ports.len() != DEFAULT_RFID_PORTS.len() {
            return Err(ConfigError::Invalid(format!(
                "expected {} rfid_ports, got {}",
                DEFAULT_RFID_PORTS.len(),
                self.rfid_ports.len()
            )));
        }

        if let Some(fps) = self.post_process_fps {
            if !fps.is_finite() || fps <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "post_process_fps must be positive, got {fps}"
                )));
            }
        }

        if self.camera.width == 0 || self.camera.height == 0 || self.camera.framerate == 0 {
            return Err(ConfigError::Invalid(
                "camera width, height and framerate must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolve the duration settings. Exactly one of "until interrupted"
    /// and "for `record_time_sec`" must be configured.
    pub fn capture_mode(&self) -> Result<CaptureMode, ConfigError> {
        match (self.user_interrupt_only, self.record_time_sec) {
            (true, None) => Ok(CaptureMode::UserInterrupt),
            (true, Some(secs)) => Err(ConfigError::DurationMode(format!(
                "record_time_sec = {secs} conflicts with user_interrupt_only = true"
            ))),
            (false, None) => Err(ConfigError::DurationMode(
                "record_time_sec is required when user_interrupt_only = false".to_string(),
            )),
            (false, Some(0)) => Err(ConfigError::DurationMode(
                "record_time_sec must be positive".to_string(),
            )),
            (false, Some(secs)) => Ok(CaptureMode::Bounded(Duration::from_secs(secs))),
        }
    }

    /// Path of the session that starts at `time`
    pub fn session_path_at<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> PathBuf
    where
        Tz::Offset: std::fmt::Display,
    {
        self.data_root.join(session_dir_name(time))
    }
}

/// On-disk layout of the config file
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    tracker_cage_record: RecordSection,
    #[serde(default)]
    camera: CameraSettings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RecordSection {
    data_root: Option<String>,
    user_interrupt_only: bool,
    record_time_sec: Option<u64>,
    fps_post_process: bool,
    post_process_fps: Option<f64>,
    rfid_ports: Option<Vec<String>>,
}

fn parse_toml(contents: &str, path: &Path) -> Result<ConfigFile, ConfigError> {
    toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Apply `CAGE_RECORDER_*` environment overrides, returning the names of
/// the variables that took effect. A value that does not parse is an error.
fn apply_env_overrides(record: &mut RecordSection) -> Result<Vec<String>, ConfigError> {
    apply_overrides(record, |name| env::var(name).ok())
}

fn apply_overrides(
    record: &mut RecordSection,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Vec<String>, ConfigError> {
    let mut applied = Vec::new();

    if let Some(v) = lookup("CAGE_RECORDER_DATA_ROOT") {
        record.data_root = Some(v);
        applied.push("CAGE_RECORDER_DATA_ROOT".to_string());
    }
    if let Some(v) = lookup("CAGE_RECORDER_USER_INTERRUPT_ONLY") {
        record.user_interrupt_only = parse_flag("CAGE_RECORDER_USER_INTERRUPT_ONLY", &v)?;
        applied.push("CAGE_RECORDER_USER_INTERRUPT_ONLY".to_string());
    }
    if let Some(v) = lookup("CAGE_RECORDER_RECORD_TIME_SEC") {
        let secs = v.trim().parse::<u64>().map_err(|_| {
            ConfigError::Invalid(format!(
                "CAGE_RECORDER_RECORD_TIME_SEC must be whole seconds, got {v:?}"
            ))
        })?;
        record.record_time_sec = Some(secs);
        applied.push("CAGE_RECORDER_RECORD_TIME_SEC".to_string());
    }
    if let Some(v) = lookup("CAGE_RECORDER_FPS_POST_PROCESS") {
        record.fps_post_process = parse_flag("CAGE_RECORDER_FPS_POST_PROCESS", &v)?;
        applied.push("CAGE_RECORDER_FPS_POST_PROCESS".to_string());
    }

    Ok(applied)
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ConfigError::Invalid(format!(
            "{name} must be true or false, got {value:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn parse(contents: &str) -> Result<SessionConfig, ConfigError> {
        SessionConfig::from_file(parse_toml(contents, Path::new("test.toml"))?)
    }

    #[test]
    fn test_parse_bounded_config() {
        let config = parse(
            r#"
[tracker_cage_record]
data_root = "/data/"
user_interrupt_only = false
record_time_sec = 5
fps_post_process = false
"#,
        )
        .unwrap();

        assert_eq!(config.data_root, PathBuf::from("/data/"));
        assert_eq!(
            config.capture_mode().unwrap(),
            CaptureMode::Bounded(Duration::from_secs(5))
        );
        assert!(!config.fps_post_process);
        assert_eq!(config.rfid_ports, DEFAULT_RFID_PORTS.to_vec());
        assert_eq!(config.camera, CameraSettings::default());
    }

    #[test]
    fn test_parse_camera_section() {
        let config = parse(
            r#"
[tracker_cage_record]
data_root = "/data/"
user_interrupt_only = true
fps_post_process = true
post_process_fps = 20.0

[camera]
device = "/dev/video2"
framerate = 25
encoder = "raw"
"#,
        )
        .unwrap();

        assert_eq!(config.capture_mode().unwrap(), CaptureMode::UserInterrupt);
        assert_eq!(config.post_process_fps, Some(20.0));
        assert_eq!(config.camera.device, "/dev/video2");
        assert_eq!(config.camera.framerate, 25);
        assert_eq!(config.camera.encoder, EncoderKind::Raw);
        assert_eq!(config.camera.width, 640);
    }

    #[test]
    fn test_missing_duration_is_rejected() {
        let err = parse(
            r#"
[tracker_cage_record]
data_root = "/data/"
user_interrupt_only = false
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DurationMode(_)));
    }

    #[test]
    fn test_duration_with_interrupt_only_is_rejected() {
        let mut config = SessionConfig::user_interrupt("/data/");
        config.record_time_sec = Some(10);
        assert!(matches!(
            config.capture_mode(),
            Err(ConfigError::DurationMode(_))
        ));

        let mut config = SessionConfig::bounded("/data/", 10);
        config.record_time_sec = Some(0);
        assert!(matches!(
            config.capture_mode(),
            Err(ConfigError::DurationMode(_))
        ));
    }

    #[test]
    fn test_missing_data_root_is_rejected() {
        let err = parse("[tracker_cage_record]\nuser_interrupt_only = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_wrong_port_count_is_rejected() {
        let mut config = SessionConfig::bounded("/data/", 5);
        config.rfid_ports.pop();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_reports_path() {
        let err = parse("[tracker_cage_record\n").unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, PathBuf::from("test.toml")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_session_path_is_under_data_root() {
        let config = SessionConfig::bounded("/data/", 5);
        let time = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2023, 11, 2, 13, 4, 5)
            .unwrap();
        assert_eq!(
            config.session_path_at(&time),
            PathBuf::from("/data/2023_11_02_13:04:05")
        );
    }

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: std::collections::HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut record = RecordSection {
            data_root: Some("/data/".to_string()),
            user_interrupt_only: true,
            ..RecordSection::default()
        };
        let applied = apply_overrides(
            &mut record,
            lookup(&[
                ("CAGE_RECORDER_USER_INTERRUPT_ONLY", "False"),
                ("CAGE_RECORDER_RECORD_TIME_SEC", "30"),
                ("CAGE_RECORDER_FPS_POST_PROCESS", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(applied.len(), 3);
        assert!(!record.user_interrupt_only);
        assert_eq!(record.record_time_sec, Some(30));
        assert!(record.fps_post_process);
        assert_eq!(record.data_root.as_deref(), Some("/data/"));
    }

    #[test]
    fn test_unparseable_env_override_is_rejected() {
        let mut record = RecordSection::default();
        let err = apply_overrides(&mut record, lookup(&[("CAGE_RECORDER_RECORD_TIME_SEC", "5s")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(record.record_time_sec, None);

        let err = apply_overrides(
            &mut record,
            lookup(&[("CAGE_RECORDER_USER_INTERRUPT_ONLY", "yes")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
