//! Core data types for the positioning engine

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// A location in the shared 2D coordinate plane used by anchors and tags
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub const ORIGIN: Point2D = Point2D { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point2D) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Round both coordinates to a fixed number of decimal places.
    ///
    /// Storage layers that keep positions as fixed-precision decimals use this
    /// when persisting; the estimator itself never rounds.
    pub fn rounded_to(&self, decimals: u32) -> Self {
        let scale = 10f64.powi(decimals as i32);
        Self {
            x: (self.x * scale).round() / scale,
            y: (self.y * scale).round() / scale,
        }
    }

    pub fn to_vector2(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}

impl From<Vector2<f64>> for Point2D {
    fn from(v: Vector2<f64>) -> Self {
        Self { x: v.x, y: v.y }
    }
}

impl From<(f64, f64)> for Point2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// One anchor's fixed location and its latest reported distance to the tag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorObservation {
    pub position: Point2D,
    pub measured_distance: f64,
}

impl AnchorObservation {
    pub fn new(position: Point2D, measured_distance: f64) -> Self {
        Self {
            position,
            measured_distance,
        }
    }

    /// Signed difference between the geometric and measured distance at `p`
    pub fn residual_at(&self, p: &Point2D) -> f64 {
        p.distance_to(&self.position) - self.measured_distance
    }
}

/// A tag's current best-known position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TagEstimate {
    pub position: Point2D,
}

impl TagEstimate {
    pub fn new(position: Point2D) -> Self {
        Self { position }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_to() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(3.0, 4.0);
        assert_relative_eq!(a.distance_to(&b), 5.0);
        assert_relative_eq!(b.distance_to(&a), 5.0);
    }

    #[test]
    fn test_rounded_to_two_decimals() {
        let p = Point2D::new(3.14159, -2.71828);
        let r = p.rounded_to(2);
        assert_relative_eq!(r.x, 3.14);
        assert_relative_eq!(r.y, -2.72);
    }

    #[test]
    fn test_residual_sign() {
        let obs = AnchorObservation::new(Point2D::ORIGIN, 5.0);
        assert_relative_eq!(obs.residual_at(&Point2D::new(6.0, 0.0)), 1.0);
        assert_relative_eq!(obs.residual_at(&Point2D::new(0.0, 4.0)), -1.0);
    }

    #[test]
    fn test_non_finite_detection() {
        assert!(Point2D::new(1.0, 2.0).is_finite());
        assert!(!Point2D::new(f64::NAN, 2.0).is_finite());
        assert!(!Point2D::new(1.0, f64::INFINITY).is_finite());
    }
}
