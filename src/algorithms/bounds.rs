//! Axis-aligned search region derived from anchor geometry

use crate::core::{AnchorObservation, Point2D};

/// Rectangle the solver iterates are kept inside
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchBounds {
    pub min: Point2D,
    pub max: Point2D,
}

impl SearchBounds {
    /// Bounding box of the anchors, grown by the largest measured distance plus `margin`.
    ///
    /// Any point consistent with the measurements lies inside this box, so it
    /// only bites when the iterates run away from the anchors.
    pub fn around(observations: &[AnchorObservation], margin: f64) -> Option<Self> {
        let first = observations.first()?;
        let reach = observations
            .iter()
            .map(|obs| obs.measured_distance.abs())
            .fold(0.0_f64, f64::max)
            + margin;

        let (min, max) = observations.iter().fold(
            (first.position, first.position),
            |(min, max), obs| {
                (
                    Point2D::new(min.x.min(obs.position.x), min.y.min(obs.position.y)),
                    Point2D::new(max.x.max(obs.position.x), max.y.max(obs.position.y)),
                )
            },
        );

        Some(Self {
            min: Point2D::new(min.x - reach, min.y - reach),
            max: Point2D::new(max.x + reach, max.y + reach),
        })
    }

    pub fn contains(&self, p: &Point2D) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    /// Project `p` onto the rectangle
    pub fn clamp(&self, p: &Point2D) -> Point2D {
        Point2D::new(
            p.x.clamp(self.min.x, self.max.x),
            p.y.clamp(self.min.y, self.max.y),
        )
    }
}
