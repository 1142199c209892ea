//! Video artifact writers
//!
//! Two sinks share the `VideoSink` interface:
//! - `FfmpegEncoder` pipes frames into an ffmpeg H.264/MP4 encoder
//! - `RawVideoWriter` stores frames in a length-prefixed container that
//!   needs no external tools and survives an interrupted capture
//!
//! Raw container layout (little endian):
//! header `CAGERAW1` | width u32 | height u32 | fps*1000 u32
//! per frame: capture time µs since epoch i64 | length u32 | payload

use crate::capture::traits::{Frame, VideoFormat};
use crate::config::{CameraSettings, EncoderKind};
use crate::session::SessionLayout;
use crate::utils::error::StorageError;
use chrono::{DateTime, Local};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

pub const RAW_MAGIC: &[u8; 8] = b"CAGERAW1";
pub const RAW_HEADER_LEN: usize = 20;

/// Container of a finished video artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Mp4,
    Raw,
}

impl VideoContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            VideoContainer::Mp4 => "mp4",
            VideoContainer::Raw => "raw",
        }
    }
}

/// Destination of captured frames
pub trait VideoSink {
    fn container(&self) -> VideoContainer;

    /// Path of the artifact being written
    fn path(&self) -> &Path;

    fn write_frame(&mut self, frame: &Frame) -> Result<(), StorageError>;

    fn frames_written(&self) -> u64;

    /// Flush and close the artifact so it is complete and readable.
    fn finish(&mut self) -> Result<PathBuf, StorageError>;
}

/// Create the sink configured for this session
pub fn open_sink(
    settings: &CameraSettings,
    format: &VideoFormat,
    layout: &SessionLayout,
) -> Result<Box<dyn VideoSink>, StorageError> {
    match settings.encoder {
        EncoderKind::Ffmpeg => Ok(Box::new(FfmpegEncoder::spawn(
            &settings.ffmpeg,
            format,
            &layout.video_path(VideoContainer::Mp4.extension()),
        )?)),
        EncoderKind::Raw => Ok(Box::new(RawVideoWriter::create(
            format,
            &layout.video_path(VideoContainer::Raw.extension()),
        )?)),
    }
}

/// H.264/MP4 encoder fed through ffmpeg's stdin
pub struct FfmpegEncoder {
    process: Option<Child>,
    stdin: Option<ChildStdin>,
    output: PathBuf,
    frame_count: u64,
}

impl FfmpegEncoder {
    pub fn spawn(ffmpeg: &str, format: &VideoFormat, output: &Path) -> Result<Self, StorageError> {
        let args = build_encoder_args(format, output);
        tracing::info!(
            "Starting FFmpeg encoder: {}x{} @ {}fps, pixel_format={}, output: {:?}",
            format.width,
            format.height,
            format.fps,
            format.pixel_format,
            output
        );

        let mut command = Command::new(ffmpeg);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // A terminal Ctrl-C must not reach the encoder before finalize closes it.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut process = command
            .spawn()
            .map_err(|e| StorageError::Encoder(format!("Failed to start FFmpeg encoder: {}", e)))?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| StorageError::Encoder("Failed to capture FFmpeg stdin".to_string()))?;

        Ok(Self {
            process: Some(process),
            stdin: Some(stdin),
            output: output.to_path_buf(),
            frame_count: 0,
        })
    }
}

impl VideoSink for FfmpegEncoder {
    fn container(&self) -> VideoContainer {
        VideoContainer::Mp4
    }

    fn path(&self) -> &Path {
        &self.output
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), StorageError> {
        let stdin = self.stdin.as_mut().ok_or(StorageError::AlreadyFinalized)?;
        stdin.write_all(&frame.data)?;
        self.frame_count += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }

    fn finish(&mut self) -> Result<PathBuf, StorageError> {
        let process = self.process.take().ok_or(StorageError::AlreadyFinalized)?;

        // Closing stdin signals EOF; ffmpeg then writes the moov atom.
        drop(self.stdin.take());
        let output = process.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StorageError::Encoder(format!(
                "FFmpeg exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!(
            "FFmpeg encoder finished: {} frames, output: {:?}",
            self.frame_count,
            self.output
        );
        Ok(self.output.clone())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
        }
    }
}

fn build_encoder_args(format: &VideoFormat, output: &Path) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ];

    if format.pixel_format == "mjpeg" {
        args.extend(["-f".to_string(), "mjpeg".to_string()]);
    } else {
        args.extend([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pixel_format".to_string(),
            format.pixel_format.clone(),
            "-video_size".to_string(),
            format!("{}x{}", format.width, format.height),
        ]);
    }

    args.extend([
        "-framerate".to_string(),
        format.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-crf".to_string(),
        "23".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]);

    args
}

/// Header of a raw container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHeader {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl RawHeader {
    pub fn encode(&self) -> [u8; RAW_HEADER_LEN] {
        let mut bytes = [0u8; RAW_HEADER_LEN];
        bytes[..8].copy_from_slice(RAW_MAGIC);
        bytes[8..12].copy_from_slice(&self.width.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.height.to_le_bytes());
        let milli_fps = (self.fps * 1000.0).round() as u32;
        bytes[16..20].copy_from_slice(&milli_fps.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8; RAW_HEADER_LEN]) -> Option<Self> {
        if &bytes[..8] != RAW_MAGIC {
            return None;
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Some(Self {
            width: word(8),
            height: word(12),
            fps: word(16) as f64 / 1000.0,
        })
    }
}

/// Writer for the raw frame container
pub struct RawVideoWriter {
    writer: Option<BufWriter<File>>,
    path: PathBuf,
    frame_count: u64,
}

impl RawVideoWriter {
    pub fn create(format: &VideoFormat, path: &Path) -> Result<Self, StorageError> {
        let header = RawHeader {
            width: format.width,
            height: format.height,
            fps: format.fps,
        };
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&header.encode())?;

        tracing::info!(
            "Writing raw video: {}x{} @ {}fps, output: {:?}",
            format.width,
            format.height,
            format.fps,
            path
        );

        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            frame_count: 0,
        })
    }
}

impl VideoSink for RawVideoWriter {
    fn container(&self) -> VideoContainer {
        VideoContainer::Raw
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), StorageError> {
        let writer = self.writer.as_mut().ok_or(StorageError::AlreadyFinalized)?;
        let len = u32::try_from(frame.data.len())
            .map_err(|_| StorageError::Encoder(format!("frame of {} bytes is too large", frame.data.len())))?;

        writer.write_all(&frame.captured_at.timestamp_micros().to_le_bytes())?;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&frame.data)?;
        self.frame_count += 1;
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.frame_count
    }

    fn finish(&mut self) -> Result<PathBuf, StorageError> {
        let writer = self.writer.take().ok_or(StorageError::AlreadyFinalized)?;
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))?;
        file.sync_all()?;

        tracing::info!(
            "Raw video finished: {} frames, output: {:?}",
            self.frame_count,
            self.path
        );
        Ok(self.path.clone())
    }
}

/// One frame read back from a raw container
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub captured_at: DateTime<Local>,
    pub data: Vec<u8>,
}

/// Reader for the raw frame container
pub struct RawVideoReader {
    reader: BufReader<File>,
    path: PathBuf,
    header: RawHeader,
}

impl RawVideoReader {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut bytes = [0u8; RAW_HEADER_LEN];
        reader.read_exact(&mut bytes).map_err(|e| corrupt(path, e))?;
        let header = RawHeader::decode(&bytes).ok_or_else(|| StorageError::Corrupt {
            path: path.to_path_buf(),
            message: "bad magic".to_string(),
        })?;

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            header,
        })
    }

    pub fn header(&self) -> &RawHeader {
        &self.header
    }

    /// Read the next frame. Returns None at a clean end of file.
    pub fn read_frame(&mut self) -> Result<Option<RawFrame>, StorageError> {
        let mut timestamp = [0u8; 8];
        match self.reader.read_exact(&mut timestamp) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut len = [0u8; 4];
        self.reader
            .read_exact(&mut len)
            .map_err(|e| corrupt(&self.path, e))?;
        let mut data = vec![0u8; u32::from_le_bytes(len) as usize];
        self.reader
            .read_exact(&mut data)
            .map_err(|e| corrupt(&self.path, e))?;

        let micros = i64::from_le_bytes(timestamp);
        let captured_at = DateTime::from_timestamp_micros(micros)
            .map(|t| t.with_timezone(&Local))
            .ok_or_else(|| StorageError::Corrupt {
                path: self.path.clone(),
                message: format!("invalid frame timestamp {micros}"),
            })?;

        Ok(Some(RawFrame { captured_at, data }))
    }

    /// Count the remaining frames, validating each one
    pub fn count_frames(mut self) -> Result<u64, StorageError> {
        let mut count = 0;
        while self.read_frame()?.is_some() {
            count += 1;
        }
        Ok(count)
    }
}

fn corrupt(path: &Path, error: std::io::Error) -> StorageError {
    if error.kind() == ErrorKind::UnexpectedEof {
        StorageError::Corrupt {
            path: path.to_path_buf(),
            message: "truncated".to_string(),
        }
    } else {
        StorageError::Io(error)
    }
}
