//! Video channel
//!
//! The stream recorder, the artifact writers it feeds, and the frame-rate
//! post-processing applied to finalized artifacts.

pub mod encoder;
pub mod post_process;
pub mod stream;

pub use encoder::{open_sink, FfmpegEncoder, RawVideoReader, RawVideoWriter, VideoContainer, VideoSink};
pub use stream::{FinalizedVideo, StreamRecorder};
