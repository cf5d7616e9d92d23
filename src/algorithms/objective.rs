//! Mean squared residual objective over a set of anchor observations
//!
//! For a candidate point `p` and `N` observations the objective is
//!
//! ```text
//! error(p) = (1 / N) * Σ_i ( |p - anchor_i| - measured_distance_i )^2
//! ```
//!
//! The residual is a difference of plain Euclidean distances, so the value is
//! zero exactly when every geometric distance matches its measurement.

use nalgebra::{DMatrix, DVector, Vector2};

use crate::core::{AnchorObservation, Point2D, ZERO_DISTANCE_EPSILON};
use crate::validation::error::{EstimationError, EstimationResult};

/// Borrowed view of a non-empty observation set
#[derive(Debug, Clone, Copy)]
pub struct MeanSquaredResidual<'a> {
    observations: &'a [AnchorObservation],
}

impl<'a> MeanSquaredResidual<'a> {
    /// Wrap an observation set, refusing an empty one
    pub fn new(observations: &'a [AnchorObservation]) -> EstimationResult<Self> {
        if observations.is_empty() {
            return Err(EstimationError::empty_observations());
        }
        Ok(Self { observations })
    }

    pub fn observations(&self) -> &'a [AnchorObservation] {
        self.observations
    }

    pub(crate) fn len(&self) -> usize {
        self.observations.len()
    }

    /// Objective value at `p`
    pub fn value(&self, p: &Point2D) -> f64 {
        let sum = self
            .observations
            .iter()
            .map(|obs| obs.residual_at(p).powi(2))
            .fold(0.0, |acc, sq| acc + sq);
        sum / self.observations.len() as f64
    }

    /// Analytic gradient at `p`.
    ///
    /// The distance term of an anchor sitting exactly at `p` is not
    /// differentiable; it contributes a zero subgradient.
    pub fn gradient(&self, p: &Point2D) -> Vector2<f64> {
        let point = p.to_vector2();
        let n = self.observations.len() as f64;
        self.observations
            .iter()
            .fold(Vector2::zeros(), |acc, obs| {
                let diff = point - obs.position.to_vector2();
                let distance = diff.norm();
                if distance > ZERO_DISTANCE_EPSILON {
                    acc + diff * (2.0 * (distance - obs.measured_distance) / distance)
                } else {
                    acc
                }
            })
            / n
    }

    /// Residual vector and its Jacobian with respect to `(x, y)`
    pub fn residuals_and_jacobian(&self, p: &Point2D) -> (DVector<f64>, DMatrix<f64>) {
        let n = self.observations.len();
        let point = p.to_vector2();
        let mut residuals = DVector::zeros(n);
        let mut jacobian = DMatrix::zeros(n, 2);

        for (i, obs) in self.observations.iter().enumerate() {
            let diff = point - obs.position.to_vector2();
            let distance = diff.norm();
            residuals[i] = distance - obs.measured_distance;

            if distance > ZERO_DISTANCE_EPSILON {
                jacobian[(i, 0)] = diff.x / distance;
                jacobian[(i, 1)] = diff.y / distance;
            }
        }

        (residuals, jacobian)
    }

    /// Move `p` off an anchor it sits on while that anchor still reports a
    /// positive distance.
    ///
    /// Such a point has a zero subgradient for the anchor's term but is a
    /// local maximum of it, so it is never a minimizer. The move follows the
    /// descent direction of the remaining anchors, or +x when they balance,
    /// starting at the reported distance and halving until the objective
    /// drops. Returns `None` when `p` is not on such an anchor.
    pub fn step_off_anchor(&self, p: &Point2D) -> Option<Point2D> {
        let reach = self
            .observations
            .iter()
            .filter(|obs| {
                obs.position.distance_to(p) <= ZERO_DISTANCE_EPSILON
                    && obs.measured_distance > ZERO_DISTANCE_EPSILON
            })
            .map(|obs| obs.measured_distance)
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |m| m.max(d))))?;

        let g = self.gradient(p);
        let direction = if g.norm() > ZERO_DISTANCE_EPSILON {
            -g / g.norm()
        } else {
            Vector2::new(1.0, 0.0)
        };

        let start = self.value(p);
        let mut step = reach;
        for _ in 0..64 {
            let candidate = Point2D::new(p.x + direction.x * step, p.y + direction.y * step);
            if self.value(&candidate) < start {
                return Some(candidate);
            }
            step *= 0.5;
        }
        None
    }

    /// Root mean square of the residuals, in the units of the coordinate plane
    pub fn rms_residual(&self, p: &Point2D) -> f64 {
        self.value(p).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn triangle_observations(truth: Point2D) -> Vec<AnchorObservation> {
        [Point2D::new(0.0, 0.0), Point2D::new(10.0, 0.0), Point2D::new(0.0, 10.0)]
            .iter()
            .map(|a| AnchorObservation::new(*a, a.distance_to(&truth)))
            .collect()
    }

    #[test]
    fn test_empty_observations_rejected() {
        let result = MeanSquaredResidual::new(&[]);
        assert!(matches!(result, Err(EstimationError::InvalidInput { .. })));
    }

    #[test]
    fn test_step_off_anchor_with_positive_distance() {
        let anchor = Point2D::new(1.0, 1.0);
        let obs = vec![AnchorObservation::new(anchor, 3.0)];
        let objective = MeanSquaredResidual::new(&obs).unwrap();

        // the subgradient vanishes on the anchor even though the cost is 9
        assert_abs_diff_eq!(objective.gradient(&anchor).norm(), 0.0);
        let moved = objective.step_off_anchor(&anchor).unwrap();
        assert_abs_diff_eq!(moved.distance_to(&anchor), 3.0, epsilon = 1e-12);
        assert!(objective.value(&moved) < objective.value(&anchor));

        assert!(objective.step_off_anchor(&Point2D::new(4.0, 1.0)).is_none());
    }

    #[test]
    fn test_step_off_anchor_follows_other_anchors() {
        let obs = vec![
            AnchorObservation::new(Point2D::new(0.0, 0.0), 5.0),
            AnchorObservation::new(Point2D::new(10.0, 0.0), 7.2801),
            AnchorObservation::new(Point2D::new(0.0, 10.0), 6.7082),
        ];
        let objective = MeanSquaredResidual::new(&obs).unwrap();
        let moved = objective.step_off_anchor(&Point2D::ORIGIN).unwrap();
        assert!(moved.x > 0.0 && moved.y > 0.0);
        assert!(objective.value(&moved) < objective.value(&Point2D::ORIGIN));
    }

    #[test]
    fn test_zero_distance_anchor_is_not_stepped_off() {
        let obs = vec![
            AnchorObservation::new(Point2D::new(2.0, 2.0), 0.0),
            AnchorObservation::new(Point2D::new(0.0, 0.0), 8f64.sqrt()),
        ];
        let objective = MeanSquaredResidual::new(&obs).unwrap();
        assert!(objective.step_off_anchor(&Point2D::new(2.0, 2.0)).is_none());
    }

    #[test]
    fn test_zero_at_exact_fit() {
        let truth = Point2D::new(3.0, 4.0);
        let obs = triangle_observations(truth);
        let objective = MeanSquaredResidual::new(&obs).unwrap();
        assert_abs_diff_eq!(objective.value(&truth), 0.0, epsilon = 1e-12);

        let grad = objective.gradient(&truth);
        assert_abs_diff_eq!(grad.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_value_is_mean_not_sum() {
        let obs = vec![
            AnchorObservation::new(Point2D::new(0.0, 0.0), 1.0),
            AnchorObservation::new(Point2D::new(0.0, 0.0), 3.0),
        ];
        let objective = MeanSquaredResidual::new(&obs).unwrap();
        // distances are 2 for both: residuals 1 and -1
        assert_relative_eq!(objective.value(&Point2D::new(2.0, 0.0)), 1.0);
        assert_relative_eq!(objective.rms_residual(&Point2D::new(2.0, 0.0)), 1.0);
    }

    #[test]
    fn test_gradient_matches_central_difference() {
        let obs = vec![
            AnchorObservation::new(Point2D::new(0.0, 0.0), 5.0),
            AnchorObservation::new(Point2D::new(10.0, 0.0), 7.2801),
            AnchorObservation::new(Point2D::new(0.0, 10.0), 6.7082),
        ];
        let objective = MeanSquaredResidual::new(&obs).unwrap();
        let p = Point2D::new(5.0, 5.0);
        let h = 1e-6;

        let dx = (objective.value(&Point2D::new(p.x + h, p.y))
            - objective.value(&Point2D::new(p.x - h, p.y)))
            / (2.0 * h);
        let dy = (objective.value(&Point2D::new(p.x, p.y + h))
            - objective.value(&Point2D::new(p.x, p.y - h)))
            / (2.0 * h);

        let grad = objective.gradient(&p);
        assert_abs_diff_eq!(grad.x, dx, epsilon = 1e-6);
        assert_abs_diff_eq!(grad.y, dy, epsilon = 1e-6);
    }

    #[test]
    fn test_gradient_at_anchor_is_finite() {
        let obs = vec![
            AnchorObservation::new(Point2D::new(0.0, 0.0), 2.0),
            AnchorObservation::new(Point2D::new(4.0, 0.0), 2.0),
        ];
        let objective = MeanSquaredResidual::new(&obs).unwrap();
        let grad = objective.gradient(&Point2D::new(0.0, 0.0));
        assert!(grad.x.is_finite() && grad.y.is_finite());
        // only the second anchor contributes: (2/N) * (4 - 2) * (-1, 0)
        assert_relative_eq!(grad.x, -2.0);
        assert_relative_eq!(grad.y, 0.0);
    }

    #[test]
    fn test_jacobian_rows_are_unit_vectors() {
        let obs = triangle_observations(Point2D::new(3.0, 4.0));
        let objective = MeanSquaredResidual::new(&obs).unwrap();
        let (residuals, jacobian) = objective.residuals_and_jacobian(&Point2D::new(1.0, 1.0));
        assert_eq!(residuals.len(), 3);
        for i in 0..3 {
            let row_norm = (jacobian[(i, 0)].powi(2) + jacobian[(i, 1)].powi(2)).sqrt();
            assert_relative_eq!(row_norm, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_order_independent() {
        let mut obs = triangle_observations(Point2D::new(3.0, 4.0));
        let p = Point2D::new(7.5, -1.25);
        let forward = MeanSquaredResidual::new(&obs).unwrap().value(&p);
        obs.reverse();
        let reversed = MeanSquaredResidual::new(&obs).unwrap().value(&p);
        assert_relative_eq!(forward, reversed, epsilon = 1e-12);
    }
}
