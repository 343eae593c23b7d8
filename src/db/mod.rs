//! Persistence module split across logical submodules: read-only leasing with
//! lock retries for the dashboard, and the writer-side schema/insert helpers
//! used by ingestion and fixtures.

mod connection;
mod filters;
mod records;
mod retry;
mod schema;

pub use connection::{ConnectionManager, ReadLease, ReadOnlyOpener, StoreOpener};
pub(crate) use filters::SqlFilter;
pub use records::insert_records;
pub use retry::{BackoffPolicy, RetryPolicy};
pub use schema::ensure_schema;
