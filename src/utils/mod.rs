//! Utility modules

pub mod counter;
pub mod error;

pub use error::{AppError, AppResult};
