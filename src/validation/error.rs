//! Error classification for the positioning engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::config::ConfigError;

/// Result type for estimation and tracking operations
pub type EstimationResult<T> = Result<T, EstimationError>;

/// Errors raised by the estimator and the tag tracking layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    /// Precondition violation: the observation set cannot be used
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// The minimizer produced non-finite coordinates
    #[error("Numeric divergence in {algorithm}: terminal point ({x}, {y}) is not finite")]
    NumericDivergence { algorithm: String, x: f64, y: f64 },

    /// The underlying optimization backend reported a failure
    #[error("Solver failure in {algorithm}: {details}")]
    SolverFailure { algorithm: String, details: String },

    /// Invalid estimator configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Tag {tag_id} not found")]
    UnknownTag { tag_id: u32 },

    #[error("Anchor {anchor_id} not found")]
    UnknownAnchor { anchor_id: u32 },
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Critical, // caller bug or bad configuration
    High,     // no usable position this round
    Low,      // lookup miss, nothing was changed
}

impl EstimationError {
    pub fn empty_observations() -> Self {
        EstimationError::InvalidInput {
            reason: "at least one anchor observation is required".to_string(),
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            EstimationError::InvalidInput { .. } | EstimationError::Config(_) => {
                ErrorSeverity::Critical
            }
            EstimationError::NumericDivergence { .. } | EstimationError::SolverFailure { .. } => {
                ErrorSeverity::High
            }
            EstimationError::UnknownTag { .. } | EstimationError::UnknownAnchor { .. } => {
                ErrorSeverity::Low
            }
        }
    }

    /// Whether re-running the estimate (e.g. from another seed) could succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EstimationError::NumericDivergence { .. } | EstimationError::SolverFailure { .. }
        )
    }
}

impl From<argmin::core::Error> for EstimationError {
    fn from(e: argmin::core::Error) -> Self {
        EstimationError::SolverFailure {
            algorithm: "BFGS".to_string(),
            details: e.to_string(),
        }
    }
}
