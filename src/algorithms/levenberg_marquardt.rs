//! Levenberg-Marquardt minimization with adaptive damping and a trust region.
//!
//! Specialized to the residual structure of the objective: each anchor
//! contributes one residual `|p - a_i| - d_i` whose Jacobian row is the unit
//! vector from the anchor to `p`.

use nalgebra::{DMatrix, DVector, Matrix2, Vector2};
use tracing::trace;

use crate::algorithms::bounds::SearchBounds;
use crate::algorithms::objective::MeanSquaredResidual;
use crate::algorithms::SolverOutcome;
use crate::core::Point2D;
use crate::utils::config::EstimatorConfig;
use crate::validation::error::{EstimationError, EstimationResult};

const ALGORITHM: &str = "Levenberg-Marquardt";

/// Damping and trust region schedule
#[derive(Debug, Clone, Copy)]
struct DampingSchedule {
    initial_lambda: f64,
    initial_trust_radius: f64,
    max_lambda: f64,
    min_trust_radius: f64,
}

impl Default for DampingSchedule {
    fn default() -> Self {
        Self {
            initial_lambda: 1e-3,
            initial_trust_radius: 1000.0,
            max_lambda: 1e12,
            min_trust_radius: 1e-12,
        }
    }
}

/// Minimize from `seed` with the default damping schedule
pub fn minimize(
    objective: MeanSquaredResidual<'_>,
    seed: Point2D,
    bounds: Option<SearchBounds>,
    config: &EstimatorConfig,
) -> EstimationResult<SolverOutcome> {
    minimize_with_schedule(objective, seed, bounds, config, DampingSchedule::default())
}

fn minimize_with_schedule(
    objective: MeanSquaredResidual<'_>,
    seed: Point2D,
    bounds: Option<SearchBounds>,
    config: &EstimatorConfig,
    schedule: DampingSchedule,
) -> EstimationResult<SolverOutcome> {
    let n = objective.len() as f64;
    let project = |p: Point2D| match &bounds {
        Some(b) => b.clamp(&p),
        None => p,
    };

    let mut current = project(seed);
    let mut lambda = schedule.initial_lambda;
    let mut nu = 2.0;
    let mut trust_radius = schedule.initial_trust_radius;
    let mut prev_cost = f64::INFINITY;
    let mut converged = false;
    let mut iterations = 0u64;

    while iterations < config.max_iterations {
        let (residuals, jacobian) = objective.residuals_and_jacobian(&current);
        let current_cost = residuals.dot(&residuals) / n;

        if (prev_cost - current_cost).abs() < config.cost_tolerance {
            converged = true;
            break;
        }

        // gradient of the mean objective: (2 / N) J^T r
        let jt_r = jacobian.transpose() * &residuals;
        if (jt_r.norm() * 2.0 / n) < config.gradient_tolerance {
            match objective.step_off_anchor(&current) {
                Some(next) => {
                    trace!(x = next.x, y = next.y, "stepping off anchor");
                    iterations += 1;
                    current = project(next);
                    prev_cost = f64::INFINITY;
                    continue;
                }
                None => {
                    converged = true;
                    break;
                }
            }
        }

        iterations += 1;

        let jt_j = jacobian.transpose() * &jacobian;
        let jt_j = Matrix2::new(jt_j[(0, 0)], jt_j[(0, 1)], jt_j[(1, 0)], jt_j[(1, 1)]);
        let jt_r = Vector2::new(jt_r[0], jt_r[1]);

        // Damp the diagonal, scaled by its share of the trace
        let mut augmented = jt_j;
        let mean_diagonal = jt_j.trace() / 2.0 + 1e-12;
        for i in 0..2 {
            augmented[(i, i)] += lambda * (1.0 + jt_j[(i, i)].abs() / mean_diagonal);
        }

        let step = match solve_2x2(&augmented, &jt_r) {
            Some(step) => step,
            None => {
                lambda = (lambda * nu).min(schedule.max_lambda);
                nu = (nu * 2.0).min(10.0);
                if lambda >= schedule.max_lambda {
                    break;
                }
                continue;
            }
        };

        let step_norm = step.norm();
        let step = if step_norm > trust_radius {
            step * (trust_radius / step_norm)
        } else {
            step
        };

        let candidate = project(Point2D::new(current.x - step.x, current.y - step.y));
        if !candidate.is_finite() {
            return Err(EstimationError::NumericDivergence {
                algorithm: ALGORITHM.to_string(),
                x: candidate.x,
                y: candidate.y,
            });
        }
        let candidate_cost = objective.value(&candidate);

        let taken = Vector2::new(current.x - candidate.x, current.y - candidate.y);
        let predicted = predicted_reduction(&residuals, &jacobian, &taken) / n;
        let actual = current_cost - candidate_cost;
        let gain_ratio = if predicted.abs() > 1e-300 {
            actual / predicted
        } else {
            0.0
        };

        trace!(
            iteration = iterations,
            cost = current_cost,
            candidate_cost,
            gain_ratio,
            lambda,
            "LM step"
        );

        if gain_ratio > 0.25 {
            current = candidate;
            prev_cost = current_cost;
            if gain_ratio > 0.75 {
                lambda = (lambda / nu).max(1e-12);
                trust_radius = (trust_radius * 2.0).min(schedule.initial_trust_radius * 10.0);
                nu = 2.0;
            }
        } else {
            lambda = (lambda * nu).min(schedule.max_lambda);
            trust_radius *= 0.5;
            nu = (nu * 2.0).min(10.0);
        }

        if lambda >= schedule.max_lambda || trust_radius < schedule.min_trust_radius {
            trace!(lambda, trust_radius, "LM stalled before meeting tolerance");
            break;
        }
    }

    Ok(SolverOutcome {
        position: current,
        iterations,
        converged,
    })
}

/// Reduction of `|r|^2` predicted by the linear model for the move `p - step`
fn predicted_reduction(residuals: &DVector<f64>, jacobian: &DMatrix<f64>, step: &Vector2<f64>) -> f64 {
    let step_dv = DVector::from_column_slice(&[step.x, step.y]);
    let linear_term = jacobian * &step_dv;
    2.0 * residuals.dot(&linear_term) - linear_term.dot(&linear_term)
}

fn solve_2x2(a: &Matrix2<f64>, b: &Vector2<f64>) -> Option<Vector2<f64>> {
    let x = a.lu().solve(b)?;
    if x.x.is_finite() && x.y.is_finite() {
        Some(x)
    } else {
        None
    }
}
