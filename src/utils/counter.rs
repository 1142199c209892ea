//! Frame and line counting over a session directory
//!
//! Used at shutdown to report what each channel actually wrote to disk.

use crate::session::SessionLayout;
use crate::utils::error::StorageError;
use crate::video::encoder::{RawVideoReader, VideoContainer};
use chrono::DateTime;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Frames written to the session's video output, from its timestamp log
pub fn count_video_frames(session_path: &Path) -> Result<u64, StorageError> {
    count_lines(&SessionLayout::new(session_path).frame_timestamps_path())
}

/// Frames in a finalized video artifact.
///
/// Raw artifacts are reopened and walked frame by frame, which also checks
/// they are readable. MP4 frames are taken from the timestamp log.
pub fn count_artifact_frames(
    artifact: &Path,
    container: VideoContainer,
    session_path: &Path,
) -> Result<u64, StorageError> {
    let logged = count_video_frames(session_path)?;
    let frames = match container {
        VideoContainer::Raw => RawVideoReader::open(artifact)?.count_frames()?,
        VideoContainer::Mp4 => logged,
    };

    if frames != logged {
        tracing::warn!(
            "{:?} holds {} frames but {} timestamps were logged",
            artifact,
            frames,
            logged
        );
    }
    Ok(frames)
}

/// Lines written to each RFID channel log, keyed by channel id
pub fn count_log_lines(session_path: &Path) -> Result<BTreeMap<String, u64>, StorageError> {
    let mut counts = BTreeMap::new();

    for entry in fs::read_dir(session_path)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(channel) = name.to_str().and_then(SessionLayout::sensor_channel_of) else {
            continue;
        };
        counts.insert(channel.to_string(), count_lines(&entry.path())?);
    }

    Ok(counts)
}

/// Capture rate over the span of the frame timestamp log.
/// None with fewer than two frames.
pub fn measured_fps(session_path: &Path) -> Result<Option<f64>, StorageError> {
    let path = SessionLayout::new(session_path).frame_timestamps_path();
    let reader = BufReader::new(File::open(&path)?);

    let mut first = None;
    let mut last = None;
    let mut frames = 0u64;

    for line in reader.lines() {
        let line = line?;
        let Some(stamp) = line.split('\t').nth(1) else {
            continue;
        };
        let time = DateTime::parse_from_rfc3339(stamp).map_err(|e| StorageError::Corrupt {
            path: path.clone(),
            message: format!("bad frame timestamp {stamp:?}: {e}"),
        })?;
        first.get_or_insert(time);
        last = Some(time);
        frames += 1;
    }

    let (Some(first), Some(last)) = (first, last) else {
        return Ok(None);
    };
    let span = (last - first).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0;
    if frames < 2 || span <= 0.0 {
        return Ok(None);
    }

    // frames - 1 intervals span first..last
    Ok(Some((frames - 1) as f64 / span))
}

fn count_lines(path: &Path) -> Result<u64, StorageError> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.lines() {
        if !line?.is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_count_log_lines_per_channel() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        fs::write(layout.sensor_log_path("0"), "a\nb\nc\n").unwrap();
        fs::write(layout.sensor_log_path("1"), "").unwrap();
        fs::write(layout.sensor_log_path("2"), "x\n").unwrap();
        fs::write(layout.frame_timestamps_path(), "0\tt\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored\n").unwrap();

        let counts = count_log_lines(dir.path()).unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts["0"], 3);
        assert_eq!(counts["1"], 0);
        assert_eq!(counts["2"], 1);
    }

    #[test]
    fn test_count_video_frames_and_fps() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        fs::write(
            layout.frame_timestamps_path(),
            "0\t2024-03-07T10:00:00+00:00\n\
             1\t2024-03-07T10:00:00.500+00:00\n\
             2\t2024-03-07T10:00:01+00:00\n",
        )
        .unwrap();

        assert_eq!(count_video_frames(dir.path()).unwrap(), 3);
        assert_eq!(measured_fps(dir.path()).unwrap(), Some(2.0));
    }

    #[test]
    fn test_measured_fps_needs_two_frames() {
        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        fs::write(layout.frame_timestamps_path(), "0\t2024-03-07T10:00:00+00:00\n").unwrap();
        assert_eq!(measured_fps(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_raw_artifact_frames_come_from_the_artifact() {
        use crate::capture::traits::{Frame, VideoFormat};
        use crate::video::encoder::{RawVideoWriter, VideoSink};
        use chrono::Local;

        let dir = tempdir().unwrap();
        let layout = SessionLayout::new(dir.path());
        let format = VideoFormat {
            width: 2,
            height: 1,
            fps: 10.0,
            pixel_format: "gray".to_string(),
        };
        let mut writer = RawVideoWriter::create(&format, &layout.video_path("raw")).unwrap();
        for _ in 0..3 {
            writer
                .write_frame(&Frame {
                    data: vec![0; 2],
                    captured_at: Local::now(),
                })
                .unwrap();
        }
        let artifact = writer.finish().unwrap();
        fs::write(layout.frame_timestamps_path(), "0\ta\n1\tb\n2\tc\n3\td\n").unwrap();

        let frames = count_artifact_frames(&artifact, VideoContainer::Raw, dir.path()).unwrap();
        assert_eq!(frames, 3);
        assert_eq!(
            count_artifact_frames(&artifact, VideoContainer::Mp4, dir.path()).unwrap(),
            4
        );

        // A truncated artifact fails the reopen check
        let bytes = fs::read(&artifact).unwrap();
        fs::write(&artifact, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(
            count_artifact_frames(&artifact, VideoContainer::Raw, dir.path()),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_missing_timestamp_log_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(count_video_frames(dir.path()), Err(StorageError::Io(_))));
    }
}
