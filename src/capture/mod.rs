//! Acquisition channels
//!
//! Device sources for the session: the video camera and the RFID readers,
//! plus the background sensor tasks that drive the readers.

pub mod camera;
pub mod rfid;
pub mod sensor;
pub mod traits;

#[cfg(feature = "nokhwa-camera")]
pub mod webcam;

#[cfg(test)]
pub(crate) mod testing;

pub use camera::FfmpegCameraSource;
pub use rfid::SerialTagSource;
pub use sensor::{SensorTask, TagLog};
pub use traits::{CaptureInterrupt, Frame, FrameSource, TagRead, TagSource, VideoFormat};

#[cfg(feature = "nokhwa-camera")]
pub use webcam::NokhwaCameraSource;
