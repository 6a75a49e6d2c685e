//! Point-in-Polygon (PIP) and containment queries.
//!
//! Bounding boxes prune candidates through a [`BoxIndex`]; exact answers
//! come from the store's geometry engine.

mod index;
mod service;

pub use index::{BoxIndex, LinearIndex, RTreeIndex};
pub use service::{PipStrategy, QueryEngine};

pub(crate) use service::contained_in;
