//! Tag/anchor storage interface and an in-memory implementation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::{AnchorObservation, Point2D, PERSISTED_DECIMALS};
use crate::validation::error::{EstimationError, EstimationResult};

pub type TagId = u32;
pub type AnchorId = u32;

/// What the update handler needs from persistence.
///
/// Implementations must hand out a consistent snapshot of a tag's
/// observations for the duration of one estimate.
pub trait TagStore {
    /// Current stored position of the tag, used as the warm-start seed
    fn tag_position(&self, tag_id: TagId) -> EstimationResult<Point2D>;

    /// Persist a new position for the tag
    fn set_tag_position(&mut self, tag_id: TagId, position: Point2D) -> EstimationResult<()>;

    /// All anchor observations currently associated with the tag, in anchor order
    fn observations(&self, tag_id: TagId) -> EstimationResult<Vec<AnchorObservation>>;

    /// Overwrite an anchor's latest distance, optionally relocating it.
    /// Returns the tag the anchor belongs to.
    fn record_distance(
        &mut self,
        anchor_id: AnchorId,
        distance: f64,
        position: Option<Point2D>,
    ) -> EstimationResult<TagId>;
}

/// A tracked entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: TagId,
    pub name: String,
    pub position: Point2D,
    pub anchor_count: u32,
}

/// A fixed reference point bound to one tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: AnchorId,
    pub tag_id: TagId,
    pub position: Point2D,
    pub distance: f64,
}

impl AnchorRecord {
    pub fn observation(&self) -> AnchorObservation {
        AnchorObservation::new(self.position, self.distance)
    }
}

/// Registry of tags and anchors held in memory.
///
/// Ids are assigned sequentially from 1 and never reused. Deleting a tag
/// removes its anchors.
#[derive(Debug, Clone)]
pub struct InMemoryTagStore {
    tags: BTreeMap<TagId, TagRecord>,
    anchors: BTreeMap<AnchorId, AnchorRecord>,
    next_tag_id: TagId,
    next_anchor_id: AnchorId,
    round_persisted: bool,
}

impl Default for InMemoryTagStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InMemoryTagStore {
    /// Create an empty store. With `round_persisted` positions are kept to
    /// two decimal places, like a fixed-precision decimal column.
    pub fn new(round_persisted: bool) -> Self {
        Self {
            tags: BTreeMap::new(),
            anchors: BTreeMap::new(),
            next_tag_id: 1,
            next_anchor_id: 1,
            round_persisted,
        }
    }

    fn persisted(&self, p: Point2D) -> Point2D {
        if self.round_persisted {
            p.rounded_to(PERSISTED_DECIMALS)
        } else {
            p
        }
    }

    /// Register a tag at the origin
    pub fn create_tag(&mut self, name: impl Into<String>) -> TagId {
        let id = self.next_tag_id;
        self.next_tag_id += 1;
        self.tags.insert(
            id,
            TagRecord {
                id,
                name: name.into(),
                position: Point2D::ORIGIN,
                anchor_count: 0,
            },
        );
        id
    }

    pub fn rename_tag(&mut self, tag_id: TagId, name: impl Into<String>) -> EstimationResult<()> {
        let tag = self
            .tags
            .get_mut(&tag_id)
            .ok_or(EstimationError::UnknownTag { tag_id })?;
        tag.name = name.into();
        Ok(())
    }

    /// Remove a tag together with its anchors
    pub fn delete_tag(&mut self, tag_id: TagId) -> EstimationResult<TagRecord> {
        let tag = self
            .tags
            .remove(&tag_id)
            .ok_or(EstimationError::UnknownTag { tag_id })?;
        self.anchors.retain(|_, anchor| anchor.tag_id != tag_id);
        Ok(tag)
    }

    /// Attach a new anchor to a tag with no distance reported yet
    pub fn add_anchor(&mut self, tag_id: TagId, position: Point2D) -> EstimationResult<AnchorId> {
        let tag = self
            .tags
            .get_mut(&tag_id)
            .ok_or(EstimationError::UnknownTag { tag_id })?;
        tag.anchor_count += 1;

        let id = self.next_anchor_id;
        self.next_anchor_id += 1;
        self.anchors.insert(
            id,
            AnchorRecord {
                id,
                tag_id,
                position,
                distance: 0.0,
            },
        );
        Ok(id)
    }

    pub fn delete_anchor(&mut self, anchor_id: AnchorId) -> EstimationResult<AnchorRecord> {
        let anchor = self
            .anchors
            .remove(&anchor_id)
            .ok_or(EstimationError::UnknownAnchor { anchor_id })?;
        if let Some(tag) = self.tags.get_mut(&anchor.tag_id) {
            tag.anchor_count = tag.anchor_count.saturating_sub(1);
        }
        Ok(anchor)
    }

    pub fn tag(&self, tag_id: TagId) -> Option<&TagRecord> {
        self.tags.get(&tag_id)
    }

    pub fn anchor(&self, anchor_id: AnchorId) -> Option<&AnchorRecord> {
        self.anchors.get(&anchor_id)
    }

    pub fn tags(&self) -> impl Iterator<Item = &TagRecord> {
        self.tags.values()
    }

    pub fn anchors(&self) -> impl Iterator<Item = &AnchorRecord> {
        self.anchors.values()
    }

    pub fn anchors_for(&self, tag_id: TagId) -> impl Iterator<Item = &AnchorRecord> {
        self.anchors.values().filter(move |a| a.tag_id == tag_id)
    }
}

impl TagStore for InMemoryTagStore {
    fn tag_position(&self, tag_id: TagId) -> EstimationResult<Point2D> {
        self.tags
            .get(&tag_id)
            .map(|tag| tag.position)
            .ok_or(EstimationError::UnknownTag { tag_id })
    }

    fn set_tag_position(&mut self, tag_id: TagId, position: Point2D) -> EstimationResult<()> {
        let stored = self.persisted(position);
        let tag = self
            .tags
            .get_mut(&tag_id)
            .ok_or(EstimationError::UnknownTag { tag_id })?;
        tag.position = stored;
        Ok(())
    }

    fn observations(&self, tag_id: TagId) -> EstimationResult<Vec<AnchorObservation>> {
        if !self.tags.contains_key(&tag_id) {
            return Err(EstimationError::UnknownTag { tag_id });
        }
        Ok(self.anchors_for(tag_id).map(AnchorRecord::observation).collect())
    }

    fn record_distance(
        &mut self,
        anchor_id: AnchorId,
        distance: f64,
        position: Option<Point2D>,
    ) -> EstimationResult<TagId> {
        let anchor = self
            .anchors
            .get_mut(&anchor_id)
            .ok_or(EstimationError::UnknownAnchor { anchor_id })?;
        anchor.distance = distance;
        if let Some(p) = position {
            anchor.position = p;
        }
        Ok(anchor.tag_id)
    }
}
