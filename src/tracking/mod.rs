//! Tag tracking around the estimator
//!
//! The store and handler stand in for the persistence layer and update
//! trigger that surround the estimator in a deployment: an anchor reports a
//! distance, the tag's stored position seeds a new estimate, and the result is
//! written back.

pub mod store;
pub mod handler;

pub use store::{AnchorId, AnchorRecord, InMemoryTagStore, TagId, TagRecord, TagStore};
pub use handler::{AnchorUpdate, AnchorUpdateHandler, UpdateOutcome};
