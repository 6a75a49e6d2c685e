//! Outcome reports for batch operations.
//!
//! Batch operations keep going past a failing item and hand back what
//! happened. Only fatal errors (see [`PlaceError::is_fatal`]) stop them.

use serde::Serialize;

use crate::error::PlaceError;
use crate::models::TileId;

/// A single item that failed inside a batch
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    /// Place id, file path, ... whatever identifies the item
    pub item: String,
    pub error: String,
}

/// Result of a batch of place writes (ingestion, repair, simplify).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<i64>,
    pub failures: Vec<ItemFailure>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, id: i64) {
        self.succeeded.push(id);
    }

    pub fn record_failure(&mut self, item: impl ToString, error: &PlaceError) {
        self.failures.push(ItemFailure {
            item: item.to_string(),
            error: error.to_string(),
        });
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded.extend(other.succeeded);
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A tile whose build failed
#[derive(Debug, Clone, Serialize)]
pub struct TileFailure {
    pub tile: TileId,
    pub error: String,
}

/// Result of a grid build over a tile range.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GridBuildReport {
    pub tiles_built: usize,
    /// Tiles that produced at least one cell
    pub tiles_with_cells: usize,
    pub cells_written: usize,
    pub failures: Vec<TileFailure>,
}

impl GridBuildReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a region extraction.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionReport {
    pub root_id: i64,
    /// Every copied id, root included, ascending
    pub copied: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_report_merge() {
        let mut a = BatchReport::new();
        a.record_success(1);
        let mut b = BatchReport::new();
        b.record_success(2);
        b.record_failure(3, &PlaceError::DuplicateId(3));

        a.merge(b);
        assert_eq!(a.succeeded, vec![1, 2]);
        assert_eq!(a.failures.len(), 1);
        assert_eq!(a.failures[0].item, "3");
        assert!(a.failures[0].error.contains("duplicate"));
        assert!(!a.is_clean());
    }
}
