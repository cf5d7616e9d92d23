//! Core positioning algorithms

pub mod objective;
pub mod bounds;
pub mod bfgs;
pub mod levenberg_marquardt;
pub mod estimator;

pub use objective::MeanSquaredResidual;
pub use bounds::SearchBounds;
pub use estimator::{EstimateReport, PositionEstimator};

use crate::core::Point2D;

/// Terminal state of a local minimizer run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOutcome {
    pub position: Point2D,
    pub iterations: u64,
    /// False when the run stopped on the iteration cap or a backend hiccup
    pub converged: bool,
}
