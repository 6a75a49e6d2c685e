//! Bounding-box pruning index.
//!
//! Every query narrows its candidates through a [`BoxIndex`] before running
//! exact geometry tests. Answers are supersets of the true matches; an
//! index must never drop an entry whose box qualifies.

use hashbrown::HashMap;
use rstar::{Envelope, RTree, RTreeObject, AABB};
use tracing::info;

use crate::models::BBox;

/// Rectangle queries over `(id, bbox)` entries.
pub trait BoxIndex: Send + Sync {
    fn insert(&mut self, id: i64, bbox: BBox);

    /// Remove an entry; returns false when it was not present
    fn remove(&mut self, id: i64, bbox: &BBox) -> bool;

    /// Replace the whole content
    fn load(&mut self, entries: Vec<(i64, BBox)>) {
        for (id, bbox) in entries {
            self.insert(id, bbox);
        }
    }

    /// Ids whose box overlaps `rect` (closed on every edge)
    fn candidates_overlapping(&self, rect: &BBox) -> Vec<i64>;

    /// Ids whose box lies fully inside `rect`
    fn candidates_enclosed_by(&self, rect: &BBox) -> Vec<i64>;

    /// Ids whose box fully encloses `rect`
    fn candidates_enclosing(&self, rect: &BBox) -> Vec<i64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// R-tree entry
#[derive(Debug, Clone, PartialEq)]
struct IndexedBox {
    id: i64,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl IndexedBox {
    fn new(id: i64, bbox: &BBox) -> Self {
        Self {
            id,
            envelope: bbox.to_aabb(),
        }
    }
}

/// [`BoxIndex`] backed by an rstar R-tree.
#[derive(Default)]
pub struct RTreeIndex {
    tree: RTree<IndexedBox>,
}

impl RTreeIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BoxIndex for RTreeIndex {
    fn insert(&mut self, id: i64, bbox: BBox) {
        self.tree.insert(IndexedBox::new(id, &bbox));
    }

    fn remove(&mut self, id: i64, bbox: &BBox) -> bool {
        self.tree.remove(&IndexedBox::new(id, bbox)).is_some()
    }

    fn load(&mut self, entries: Vec<(i64, BBox)>) {
        info!("Bulk loading R-tree with {} boxes...", entries.len());
        let indexed: Vec<IndexedBox> = entries
            .iter()
            .map(|(id, bbox)| IndexedBox::new(*id, bbox))
            .collect();
        self.tree = RTree::bulk_load(indexed);
    }

    fn candidates_overlapping(&self, rect: &BBox) -> Vec<i64> {
        self.tree
            .locate_in_envelope_intersecting(&rect.to_aabb())
            .map(|ib| ib.id)
            .collect()
    }

    fn candidates_enclosed_by(&self, rect: &BBox) -> Vec<i64> {
        self.tree
            .locate_in_envelope(&rect.to_aabb())
            .map(|ib| ib.id)
            .collect()
    }

    fn candidates_enclosing(&self, rect: &BBox) -> Vec<i64> {
        let query = rect.to_aabb();
        // An enclosing box always intersects the query box
        self.tree
            .locate_in_envelope_intersecting(&query)
            .filter(|ib| ib.envelope.contains_envelope(&query))
            .map(|ib| ib.id)
            .collect()
    }

    fn len(&self) -> usize {
        self.tree.size()
    }
}

/// Flat scan over all boxes. Reference implementation and the cheap choice
/// for small stores.
#[derive(Debug, Default)]
pub struct LinearIndex {
    boxes: HashMap<i64, BBox>,
}

impl LinearIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&self, pred: impl Fn(&BBox) -> bool) -> Vec<i64> {
        self.boxes
            .iter()
            .filter(|(_, bbox)| pred(bbox))
            .map(|(id, _)| *id)
            .collect()
    }
}

impl BoxIndex for LinearIndex {
    fn insert(&mut self, id: i64, bbox: BBox) {
        self.boxes.insert(id, bbox);
    }

    fn remove(&mut self, id: i64, _bbox: &BBox) -> bool {
        self.boxes.remove(&id).is_some()
    }

    fn candidates_overlapping(&self, rect: &BBox) -> Vec<i64> {
        self.select(|b| b.overlaps(rect))
    }

    fn candidates_enclosed_by(&self, rect: &BBox) -> Vec<i64> {
        self.select(|b| rect.encloses(b))
    }

    fn candidates_enclosing(&self, rect: &BBox) -> Vec<i64> {
        self.select(|b| b.encloses(rect))
    }

    fn len(&self) -> usize {
        self.boxes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(i64, BBox)> {
        vec![
            (1, BBox::new(-1.0, -1.0, 1.0, 1.0)),
            (2, BBox::new(-0.5, -0.5, 0.5, 0.5)),
            (3, BBox::new(1.0, 1.0, 2.0, 2.0)),
            (4, BBox::new(10.0, 10.0, 11.0, 11.0)),
            (5, BBox::new(-5.0, -5.0, 5.0, 5.0)),
        ]
    }

    fn sorted(mut ids: Vec<i64>) -> Vec<i64> {
        ids.sort_unstable();
        ids
    }

    fn indexes() -> Vec<Box<dyn BoxIndex>> {
        let mut rtree = RTreeIndex::new();
        rtree.load(sample());
        let mut linear = LinearIndex::new();
        linear.load(sample());
        vec![Box::new(rtree), Box::new(linear)]
    }

    #[test]
    fn test_point_query() {
        for index in indexes() {
            let ids = sorted(index.candidates_overlapping(&BBox::point(0.0, 0.0)));
            assert_eq!(ids, vec![1, 2, 5]);
        }
    }

    #[test]
    fn test_touching_corner_overlaps() {
        for index in indexes() {
            let ids = sorted(index.candidates_overlapping(&BBox::point(1.0, 1.0)));
            assert_eq!(ids, vec![1, 3, 5]);
        }
    }

    #[test]
    fn test_enclosed_and_enclosing() {
        for index in indexes() {
            let rect = BBox::new(-1.0, -1.0, 1.0, 1.0);
            assert_eq!(sorted(index.candidates_enclosed_by(&rect)), vec![1, 2]);
            assert_eq!(sorted(index.candidates_enclosing(&rect)), vec![1, 5]);
        }
    }

    #[test]
    fn test_remove_and_reinsert() {
        for mut index in indexes() {
            assert_eq!(index.len(), 5);
            assert!(index.remove(4, &BBox::new(10.0, 10.0, 11.0, 11.0)));
            assert!(index
                .candidates_overlapping(&BBox::point(10.5, 10.5))
                .is_empty());

            index.insert(4, BBox::new(20.0, 20.0, 21.0, 21.0));
            assert_eq!(index.candidates_overlapping(&BBox::point(20.5, 20.5)), vec![4]);
            assert_eq!(index.len(), 5);
        }
    }
}
