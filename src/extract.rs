//! Regional extraction into a standalone store.

use std::sync::Arc;

use tracing::info;

use crate::error::{PlaceError, Result};
use crate::models::Place;
use crate::pip::contained_in;
use crate::report::ExtractionReport;
use crate::store::PlaceStore;

/// Copies a place and everything it exactly contains into another store.
pub struct ExtractionEngine<'a> {
    source: &'a PlaceStore,
}

impl<'a> ExtractionEngine<'a> {
    pub fn new(source: &'a PlaceStore) -> Self {
        Self { source }
    }

    /// Copy `root_id` and its descendants into `target`.
    ///
    /// Descendants are places whose box lies in the root's box and whose
    /// geometry the root exactly contains. Grid cells are not copied; the
    /// target must be gridded on its own. Nothing is written when `target`
    /// already holds any of the ids.
    pub fn extract(&self, target: &PlaceStore, root_id: i64) -> Result<ExtractionReport> {
        if std::ptr::eq(self.source, target) {
            return Err(PlaceError::TargetAlreadyInitialized(vec![root_id]));
        }

        // Pruning and exact tests share one source view. It is released
        // before the target is locked, so no thread holds both stores.
        let view = self.source.read();
        let root = Arc::clone(view.require_geometry(root_id)?.0);

        let mut members: Vec<Arc<Place>> = vec![Arc::clone(&root)];
        for id in contained_in(&view, root_id)? {
            if let Some(place) = view.get(id) {
                members.push(Arc::clone(place));
            }
        }
        drop(view);

        target.import_all(&members)?;

        let mut copied: Vec<i64> = members.iter().map(|p| p.id).collect();
        copied.sort_unstable();
        info!(
            "Extracted {} places under root {} ({})",
            copied.len(),
            root_id,
            root.name
        );

        Ok(ExtractionReport { root_id, copied })
    }
}
