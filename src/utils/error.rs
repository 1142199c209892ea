//! Error types and handling
//!
//! Error taxonomy shared by the session coordinator and its channels.
//! Configuration and storage errors are fatal; device and post-processing
//! errors are reported and contained.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or inconsistent configuration. The session never starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Inconsistent capture duration: {0}")]
    DurationMode(String),

    #[error("Data root {path} is not usable: {source}")]
    DataRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Session directory already exists: {0}")]
    SessionExists(PathBuf),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// A capture device failed. Contained within the owning channel.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Failed to open device {endpoint}: {source}")]
    Open {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("Read from {endpoint} failed: {source}")]
    Read {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("Device {0} disconnected")]
    Disconnected(String),

    #[error("Camera error: {0}")]
    Camera(String),
}

/// Flushing or finalizing recorded output failed. The session output is
/// considered incomplete.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Corrupt video artifact {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Recording already finalized")]
    AlreadyFinalized,
}

/// Post-processing failed. The finalized raw artifact stays valid.
#[derive(Error, Debug)]
pub enum PostProcessError {
    #[error("Invalid target frame rate: {0}")]
    InvalidFps(f64),

    #[error("Recording has not been finalized")]
    NotFinalized,

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    PostProcess(#[from] PostProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state: {0}")]
    State(String),
}

impl AppError {
    /// Whether this error must end the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AppError::PostProcess(_))
    }
}

/// Serialisable error record kept in the session summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorReport {
    fn from(error: &AppError) -> Self {
        let code = match error {
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Device(_) => "DEVICE_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::PostProcess(_) => "POST_PROCESS_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::State(_) => "STATE_ERROR",
        };

        ErrorReport {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
