//! Error classification

pub mod error;

pub use error::{ErrorSeverity, EstimationError, EstimationResult};
