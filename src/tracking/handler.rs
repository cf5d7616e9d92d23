//! Re-estimates a tag's position whenever one of its anchors reports a distance

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::algorithms::{EstimateReport, PositionEstimator};
use crate::core::Point2D;
use crate::tracking::store::{AnchorId, TagId, TagStore};
use crate::validation::error::{EstimationError, EstimationResult};

/// A new distance measurement from one anchor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnchorUpdate {
    pub anchor_id: AnchorId,
    pub distance: f64,
    /// Relocate the anchor before estimating
    #[serde(default)]
    pub position: Option<Point2D>,
}

impl AnchorUpdate {
    pub fn distance(anchor_id: AnchorId, distance: f64) -> Self {
        Self {
            anchor_id,
            distance,
            position: None,
        }
    }

    /// Reject readings that would leave a non-finite value in the store
    pub fn validate(&self) -> EstimationResult<()> {
        if !self.distance.is_finite() {
            return Err(EstimationError::InvalidInput {
                reason: format!(
                    "anchor {} reported non-finite distance {}",
                    self.anchor_id, self.distance
                ),
            });
        }
        if let Some(p) = self.position.filter(|p| !p.is_finite()) {
            return Err(EstimationError::InvalidInput {
                reason: format!(
                    "anchor {} relocated to non-finite position ({}, {})",
                    self.anchor_id, p.x, p.y
                ),
            });
        }
        Ok(())
    }
}

/// Result of applying one [`AnchorUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub tag_id: TagId,
    /// Stored position before the update, used as the seed
    pub previous: Point2D,
    /// Position written back to the store
    pub stored: Point2D,
    pub report: EstimateReport,
}

/// Drives the read-seed / estimate / write-back cycle against a store.
///
/// Updates for one tag are applied one at a time through `&mut self`, which
/// keeps the read-modify-write on the stored position serialized.
pub struct AnchorUpdateHandler<S: TagStore> {
    estimator: PositionEstimator,
    store: S,
}

impl<S: TagStore> AnchorUpdateHandler<S> {
    pub fn new(estimator: PositionEstimator, store: S) -> Self {
        Self { estimator, store }
    }

    pub fn estimator(&self) -> &PositionEstimator {
        &self.estimator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Record the measurement and move the anchor's tag to the new estimate.
    ///
    /// A non-finite reading is refused before anything is written. A valid
    /// distance is recorded even if estimation fails; the stored tag position
    /// is only replaced by a finite estimate.
    pub fn apply_update(&mut self, update: AnchorUpdate) -> EstimationResult<UpdateOutcome> {
        if let Err(e) = update.validate() {
            warn!(anchor_id = update.anchor_id, error = %e, "discarding anchor reading");
            return Err(e);
        }
        let tag_id = self
            .store
            .record_distance(update.anchor_id, update.distance, update.position)?;
        let seed = self.store.tag_position(tag_id)?;
        let observations = self.store.observations(tag_id)?;

        let report = match self.estimator.estimate_with_report(seed, &observations) {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    tag_id,
                    anchor_id = update.anchor_id,
                    severity = ?e.severity(),
                    error = %e,
                    "keeping previous tag position"
                );
                return Err(e);
            }
        };

        self.store.set_tag_position(tag_id, report.position)?;
        let stored = self.store.tag_position(tag_id)?;

        info!(
            tag_id,
            anchor_id = update.anchor_id,
            x = stored.x,
            y = stored.y,
            converged = report.converged,
            "tag position updated"
        );

        Ok(UpdateOutcome {
            tag_id,
            previous: seed,
            stored,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::store::InMemoryTagStore;
    use approx::assert_abs_diff_eq;

    fn handler_with_triangle() -> (AnchorUpdateHandler<InMemoryTagStore>, TagId, [AnchorId; 3]) {
        let mut store = InMemoryTagStore::default();
        let tag = store.create_tag("resident");
        let a = store.add_anchor(tag, Point2D::new(0.0, 0.0)).unwrap();
        let b = store.add_anchor(tag, Point2D::new(10.0, 0.0)).unwrap();
        let c = store.add_anchor(tag, Point2D::new(0.0, 10.0)).unwrap();
        let handler = AnchorUpdateHandler::new(PositionEstimator::default(), store);
        (handler, tag, [a, b, c])
    }

    #[test]
    fn test_updates_converge_on_tag() {
        let (mut handler, tag, anchors) = handler_with_triangle();
        let truth = Point2D::new(3.0, 4.0);

        let mut last = None;
        for anchor_id in anchors {
            let anchor_pos = handler.store().anchor(anchor_id).unwrap().position;
            let outcome = handler
                .apply_update(AnchorUpdate::distance(anchor_id, anchor_pos.distance_to(&truth)))
                .unwrap();
            assert_eq!(outcome.tag_id, tag);
            last = Some(outcome);
        }

        let outcome = last.unwrap();
        assert_eq!(outcome.report.anchor_count, 3);
        let stored = handler.store().tag_position(tag).unwrap();
        assert_eq!(stored, outcome.stored);
        assert_abs_diff_eq!(stored.x, 3.0, epsilon = 0.05);
        assert_abs_diff_eq!(stored.y, 4.0, epsilon = 0.05);
    }

    #[test]
    fn test_previous_position_is_seed() {
        let (mut handler, tag, anchors) = handler_with_triangle();
        handler
            .store_mut()
            .set_tag_position(tag, Point2D::new(5.0, 5.0))
            .unwrap();

        let outcome = handler.apply_update(AnchorUpdate::distance(anchors[0], 5.0)).unwrap();
        assert_eq!(outcome.previous, Point2D::new(5.0, 5.0));
        assert_eq!(outcome.report.seed, Point2D::new(5.0, 5.0));
    }

    #[test]
    fn test_unknown_anchor_leaves_store_untouched() {
        let (mut handler, tag, _) = handler_with_triangle();
        let result = handler.apply_update(AnchorUpdate::distance(42, 1.0));
        assert!(matches!(result, Err(EstimationError::UnknownAnchor { anchor_id: 42 })));
        assert_eq!(handler.store().tag_position(tag).unwrap(), Point2D::ORIGIN);
    }

    #[test]
    fn test_failed_estimate_keeps_position() {
        let (mut handler, tag, anchors) = handler_with_triangle();
        handler
            .store_mut()
            .set_tag_position(tag, Point2D::new(1.0, 1.0))
            .unwrap();

        let result = handler.apply_update(AnchorUpdate::distance(anchors[1], f64::NAN));
        assert!(matches!(result, Err(EstimationError::InvalidInput { .. })));
        assert_eq!(handler.store().tag_position(tag).unwrap(), Point2D::new(1.0, 1.0));
        assert_eq!(handler.store().anchor(anchors[1]).unwrap().distance, 0.0);

        // a bad reading from one anchor must not block the others
        let outcome = handler
            .apply_update(AnchorUpdate::distance(anchors[2], 6.7082))
            .unwrap();
        assert!(outcome.stored.is_finite());
        assert_ne!(outcome.stored, Point2D::new(1.0, 1.0));
    }

    #[test]
    fn test_non_finite_relocation_rejected() {
        let (mut handler, _, anchors) = handler_with_triangle();
        let result = handler.apply_update(AnchorUpdate {
            anchor_id: anchors[0],
            distance: 4.0,
            position: Some(Point2D::new(f64::INFINITY, 0.0)),
        });
        assert!(matches!(result, Err(EstimationError::InvalidInput { .. })));

        let anchor = handler.store().anchor(anchors[0]).unwrap();
        assert_eq!(anchor.position, Point2D::ORIGIN);
        assert_eq!(anchor.distance, 0.0);
    }

    #[test]
    fn test_relocating_anchor_with_update() {
        let (mut handler, tag, anchors) = handler_with_triangle();
        let outcome = handler
            .apply_update(AnchorUpdate {
                anchor_id: anchors[2],
                distance: 3.0,
                position: Some(Point2D::new(0.0, 20.0)),
            })
            .unwrap();
        assert_eq!(outcome.tag_id, tag);
        assert_eq!(
            handler.store().anchor(anchors[2]).unwrap().position,
            Point2D::new(0.0, 20.0)
        );
        assert!(outcome.stored.is_finite());
    }
}
