//! Warm-started position estimation from anchor distance observations

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algorithms::bounds::SearchBounds;
use crate::algorithms::objective::MeanSquaredResidual;
use crate::algorithms::{bfgs, levenberg_marquardt, SolverOutcome};
use crate::core::{AnchorObservation, Point2D};
use crate::utils::config::{EstimatorConfig, SolverKind};
use crate::validation::error::{EstimationError, EstimationResult};

/// Estimate plus diagnostics about how it was obtained
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateReport {
    /// New tag position
    pub position: Point2D,
    /// Warm-start point the minimizer started from
    pub seed: Point2D,
    pub solver: SolverKind,
    pub iterations: u64,
    /// False when the minimizer stopped without meeting its tolerance.
    /// The position is used regardless.
    pub converged: bool,
    /// Objective value at `position`
    pub cost: f64,
    /// Root mean square distance residual at `position`
    pub rms_residual: f64,
    pub anchor_count: usize,
}

/// Multilateration engine.
///
/// Stateless between calls: each [`estimate`](Self::estimate) is a pure
/// function of the seed and observations, so one estimator can be shared
/// freely across tags and threads.
#[derive(Debug, Clone, Default)]
pub struct PositionEstimator {
    config: EstimatorConfig,
}

impl PositionEstimator {
    pub fn new(config: EstimatorConfig) -> EstimationResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Refine `seed` against `observations` and return the new position
    pub fn estimate(
        &self,
        seed: Point2D,
        observations: &[AnchorObservation],
    ) -> EstimationResult<Point2D> {
        self.estimate_with_report(seed, observations)
            .map(|report| report.position)
    }

    /// Same as [`estimate`](Self::estimate), also returning fit diagnostics
    pub fn estimate_with_report(
        &self,
        seed: Point2D,
        observations: &[AnchorObservation],
    ) -> EstimationResult<EstimateReport> {
        check_inputs(&seed, observations)?;
        let objective = MeanSquaredResidual::new(observations)?;
        let bounds = self
            .config
            .bounds
            .and_then(|b| SearchBounds::around(observations, b.margin));

        debug!(
            solver = ?self.config.solver,
            anchors = observations.len(),
            seed_x = seed.x,
            seed_y = seed.y,
            "estimating tag position"
        );

        let outcome: SolverOutcome = match self.config.solver {
            SolverKind::Bfgs => bfgs::minimize(objective, seed, bounds, &self.config)?,
            SolverKind::LevenbergMarquardt => {
                levenberg_marquardt::minimize(objective, seed, bounds, &self.config)?
            }
        };

        let position = match &bounds {
            Some(b) => b.clamp(&outcome.position),
            None => outcome.position,
        };
        if !position.is_finite() {
            return Err(EstimationError::NumericDivergence {
                algorithm: format!("{:?}", self.config.solver),
                x: position.x,
                y: position.y,
            });
        }

        let cost = objective.value(&position);
        let report = EstimateReport {
            position,
            seed,
            solver: self.config.solver,
            iterations: outcome.iterations,
            converged: outcome.converged,
            cost,
            rms_residual: cost.sqrt(),
            anchor_count: observations.len(),
        };

        if report.converged {
            debug!(
                x = position.x,
                y = position.y,
                iterations = report.iterations,
                rms_residual = report.rms_residual,
                "estimate converged"
            );
        } else {
            warn!(
                x = position.x,
                y = position.y,
                iterations = report.iterations,
                rms_residual = report.rms_residual,
                "estimate did not converge, using terminal iterate"
            );
        }

        Ok(report)
    }
}

fn check_inputs(seed: &Point2D, observations: &[AnchorObservation]) -> EstimationResult<()> {
    if observations.is_empty() {
        return Err(EstimationError::empty_observations());
    }
    if !seed.is_finite() {
        return Err(EstimationError::InvalidInput {
            reason: format!("seed ({}, {}) is not finite", seed.x, seed.y),
        });
    }
    if let Some((index, _)) = observations
        .iter()
        .enumerate()
        .find(|(_, obs)| !obs.position.is_finite() || !obs.measured_distance.is_finite())
    {
        return Err(EstimationError::InvalidInput {
            reason: format!("observation {} has non-finite values", index),
        });
    }
    Ok(())
}
