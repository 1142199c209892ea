//! Frame-rate post-processing
//!
//! The camera rarely sustains its nominal rate, so a finalized artifact
//! plays back too fast or too slow. Retiming writes a copy whose playback
//! rate is `target_fps`; the original artifact is never touched.

use crate::utils::error::PostProcessError;
use crate::video::encoder::{RawHeader, RAW_HEADER_LEN};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::Command;

pub fn validate_fps(target_fps: f64) -> Result<(), PostProcessError> {
    if target_fps.is_finite() && target_fps > 0.0 {
        Ok(())
    } else {
        Err(PostProcessError::InvalidFps(target_fps))
    }
}

/// Retime an MP4 by scaling its input timestamps, copying the stream
/// without re-encoding.
pub fn retime_mp4(
    ffmpeg: &str,
    input: &Path,
    output: &Path,
    nominal_fps: f64,
    target_fps: f64,
) -> Result<(), PostProcessError> {
    validate_fps(target_fps)?;
    validate_fps(nominal_fps)?;

    let args = build_retime_args(input, output, nominal_fps, target_fps);
    tracing::info!("Retiming {:?} from {}fps to {}fps", input, nominal_fps, target_fps);

    let result = Command::new(ffmpeg)
        .args(&args)
        .output()
        .map_err(|e| PostProcessError::Ffmpeg(format!("Failed to run FFmpeg: {}", e)))?;

    if !result.status.success() {
        let stderr = String::from_utf8_lossy(&result.stderr);
        return Err(PostProcessError::Ffmpeg(format!(
            "FFmpeg retime failed ({}): {}",
            result.status,
            stderr.trim()
        )));
    }

    Ok(())
}

fn build_retime_args(input: &Path, output: &Path, nominal_fps: f64, target_fps: f64) -> Vec<String> {
    // -itsscale multiplies every input timestamp; 30fps material played at 20fps scales by 1.5
    let scale = nominal_fps / target_fps;
    vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-itsscale".to_string(),
        format!("{:.6}", scale),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Retime a raw container by copying it with a new rate in the header
pub fn retime_raw(input: &Path, output: &Path, target_fps: f64) -> Result<(), PostProcessError> {
    validate_fps(target_fps)?;

    let mut reader = BufReader::new(File::open(input)?);
    let mut bytes = [0u8; RAW_HEADER_LEN];
    reader.read_exact(&mut bytes)?;
    let header = RawHeader::decode(&bytes).ok_or_else(|| {
        PostProcessError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{:?} is not a raw video artifact", input),
        ))
    })?;

    let retimed = RawHeader {
        fps: target_fps,
        ..header
    };

    let mut writer = BufWriter::new(File::create(output)?);
    writer.write_all(&retimed.encode())?;
    std::io::copy(&mut reader, &mut writer)?;
    writer.flush()?;

    tracing::info!("Retimed {:?} from {}fps to {}fps", input, header.fps, target_fps);
    Ok(())
}
