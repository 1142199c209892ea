//! Session lifecycle
//!
//! This module ties the channels of one session together:
//! - SessionCoordinator creates the session and runs the shutdown sequence
//! - ShutdownSignal turns interrupts into a single stop request
//! - RecordingState tracks the video channel's lifecycle

pub mod coordinator;
pub mod interrupt;
pub mod state;

pub use coordinator::{Devices, SessionCoordinator};
pub use interrupt::ShutdownSignal;
pub use state::{CaptureEnd, RecordingState, SessionSummary};
