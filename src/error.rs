//! Error types for the place store and its query engines.

use sled::transaction::TransactionError;
use thiserror::Error;

/// Errors returned by store, grid, query and extraction operations.
#[derive(Error, Debug)]
pub enum PlaceError {
    /// A place with this id is already stored.
    #[error("duplicate place id {0}")]
    DuplicateId(i64),

    /// No place with this id is stored, or its geometry is null where a
    /// geometry is required.
    #[error("place {0} not found")]
    NotFound(i64),

    /// Geometry could not be repaired into a valid areal geometry.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// WKT / GeoJSON decoding error.
    #[error("geometry parse error: {0}")]
    GeometryParse(String),

    /// Extraction target already holds some of the ids to copy.
    #[error("target store already holds places {0:?}")]
    TargetAlreadyInitialized(Vec<i64>),

    /// Underlying sled storage failure.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Record (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PlaceError {
    /// Storage failures abort batch operations instead of being collected
    /// into a per-item report.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlaceError::Storage(_))
    }
}

impl From<TransactionError<()>> for PlaceError {
    fn from(err: TransactionError<()>) -> Self {
        match err {
            TransactionError::Storage(e) => PlaceError::Storage(e),
            TransactionError::Abort(()) => PlaceError::Storage(sled::Error::Unsupported(
                "transaction aborted".to_string(),
            )),
        }
    }
}

/// Result type for place operations.
pub type Result<T> = std::result::Result<T, PlaceError>;
