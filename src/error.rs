//! Error taxonomy shared by the connection manager, the reference data cache,
//! the aggregation API and the export assembler. Callers (the dashboard UI) are
//! expected to match on the variant to decide whether a section degrades to an
//! "unavailable" state or whether the error is their own fault.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::FilterSet;

pub type Result<T, E = DashboardError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DashboardError {
    /// The store file does not exist. Never retried.
    #[error("mortality store not found at {}", path.display())]
    StoreMissing { path: PathBuf },

    /// Another process held a write-incompatible lock for the whole retry budget.
    #[error("mortality store at {} is locked (gave up after {attempts} attempts)", path.display())]
    StoreLocked { path: PathBuf, attempts: usize },

    #[error("invalid filter {field}: {value}")]
    InvalidFilter { field: &'static str, value: String },

    #[error("unsupported age range {age_min}-{age_max}: only predefined buckets can be looked up")]
    UnsupportedAgeRange { age_min: u32, age_max: u32 },

    /// Reference tables failed to load. The cache stays unusable until restart.
    #[error("reference data {} is malformed: {detail}", file.display())]
    ReferenceDataSchema { file: PathBuf, detail: String },

    #[error("{operation} failed for filters [{filters}]: {source}")]
    Aggregation {
        operation: &'static str,
        filters: FilterSet,
        #[source]
        source: Box<DashboardError>,
    },

    #[error("store query failed: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("export failed: {0}")]
    Export(String),

    #[error("invalid configuration {name}: {detail}")]
    Config { name: &'static str, detail: String },
}

impl DashboardError {
    pub(crate) fn invalid_filter(field: &'static str, value: impl ToString) -> Self {
        Self::InvalidFilter {
            field,
            value: value.to_string(),
        }
    }

    /// Attach the operation name and filters to a store-side failure.
    pub(crate) fn in_operation(self, operation: &'static str, filters: &FilterSet) -> Self {
        match self {
            // Caller errors already carry the offending value.
            err @ (Self::InvalidFilter { .. } | Self::UnsupportedAgeRange { .. }) => err,
            err @ Self::Aggregation { .. } => err,
            other => Self::Aggregation {
                operation,
                filters: filters.clone(),
                source: Box::new(other),
            },
        }
    }

    /// The underlying error with any `Aggregation` context peeled off.
    pub fn root(&self) -> &DashboardError {
        match self {
            Self::Aggregation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_store_locked(&self) -> bool {
        matches!(self.root(), Self::StoreLocked { .. })
    }

    pub fn is_store_missing(&self) -> bool {
        matches!(self.root(), Self::StoreMissing { .. })
    }
}
