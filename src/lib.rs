//! Indoor Positioning Locator
//!
//! Estimates the 2D position of a tag from distances reported by fixed
//! anchors, by minimizing the mean squared distance residual from a
//! warm-start seed.

pub mod core;
pub mod algorithms;
pub mod validation;
pub mod utils;
pub mod tracking;

// Re-export commonly used types
pub use core::{AnchorObservation, Point2D, TagEstimate};
pub use algorithms::{EstimateReport, MeanSquaredResidual, PositionEstimator, SearchBounds};
pub use validation::{ErrorSeverity, EstimationError, EstimationResult};
pub use utils::{AppConfig, ConfigurationManager, EstimatorConfig, SolverKind};
pub use tracking::{
    AnchorUpdate, AnchorUpdateHandler, InMemoryTagStore, TagStore, UpdateOutcome,
};
