//! Core library surface for the mortality dashboard: the resilient access layer
//! between the dashboard UI and the embedded death-record store.
//!
//! The modules stay small on purpose. `db` leases read-only connections and
//! owns the lock retry budget, `population` caches the reference tables used
//! for rates, `analytics` runs the grouped aggregations, and `export` packs
//! results into a multi-sheet document.
pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod population;

/// Read-side entry points the dashboard builds on.
pub use analytics::{AgeGroupTrend, MortalityAnalytics, StoreStats, YearMedianAge};
pub use config::Settings;
pub use db::{ensure_schema, insert_records, ConnectionManager, RetryPolicy};
pub use error::{DashboardError, Result};
pub use export::{build_export, Document, Sheet};

/// Domain types passed between the layers.
pub use models::{
    AgeRange, AggregationResult, AggregationRow, BucketWidth, DeathRecord, Dimension, FilterSet,
    MonthView, Sex,
};
pub use population::{PopulationPaths, ReferenceDataCache};
