use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode, OpenFlags};
use tracing::{debug, warn};

use super::retry::{BackoffPolicy, RetryPolicy};
use crate::error::{DashboardError, Result};

/// Seam between the manager and SQLite so lock contention can be simulated.
pub trait StoreOpener: Send + Sync {
    fn open(&self, path: &Path) -> rusqlite::Result<Connection>;
}

/// Opens the store read-only and touches the schema so a writer's exclusive
/// lock already held at open time surfaces before any query is prepared.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadOnlyOpener;

impl StoreOpener for ReadOnlyOpener {
    fn open(&self, path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        // The manager owns the retry budget; SQLite must not wait on its own.
        conn.busy_timeout(Duration::ZERO)?;
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })?;
        Ok(conn)
    }
}

/// Hands out short-lived read-only connections to the store file. Several
/// dashboard processes may each own a manager for the same file; nothing here
/// is shared between them.
#[derive(Clone)]
pub struct ConnectionManager {
    path: PathBuf,
    retry: RetryPolicy,
    opener: Arc<dyn StoreOpener>,
}

impl ConnectionManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            retry: RetryPolicy::default(),
            opener: Arc::new(ReadOnlyOpener),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn StoreOpener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Lease a read-only connection. A missing file fails immediately; lock
    /// contention is retried on the backoff schedule and then reported as
    /// [`DashboardError::StoreLocked`].
    pub fn acquire_read_connection(&self) -> Result<ReadLease> {
        self.retrying(|| self.open_lease())
    }

    /// Run `f` against a fresh lease that is released on every exit path.
    /// Opening and the query share one retry budget: a writer that grabs the
    /// lock after the lease was opened costs an attempt, and the query is
    /// replayed on a new lease.
    pub fn with_read<T>(&self, mut f: impl FnMut(&Connection) -> Result<T>) -> Result<T> {
        self.retrying(|| {
            let lease = self.open_lease()?;
            f(&lease)
        })
    }

    fn open_lease(&self) -> Result<ReadLease> {
        let conn = self.opener.open(&self.path)?;
        debug!(path = %self.path.display(), "read lease acquired");
        Ok(ReadLease {
            conn,
            path: self.path.clone(),
        })
    }

    fn retrying<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        if !self.path.is_file() {
            return Err(DashboardError::StoreMissing {
                path: self.path.clone(),
            });
        }

        let attempts = self.retry.total_attempts();
        for attempt in 0..attempts {
            match op() {
                Err(err) if is_lock_contention(&err) => {
                    if attempt + 1 < attempts {
                        let delay = self.retry.delay_for_attempt(attempt);
                        warn!(
                            path = %self.path.display(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "store locked, retrying"
                        );
                        thread::sleep(delay);
                    }
                }
                outcome => return outcome,
            }
        }

        warn!(path = %self.path.display(), attempts, "store still locked, giving up");
        Err(DashboardError::StoreLocked {
            path: self.path.clone(),
            attempts,
        })
    }
}

fn is_lock_contention(err: &DashboardError) -> bool {
    match err {
        DashboardError::Store(source) => matches!(
            source.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
        ),
        _ => false,
    }
}

/// A leased read-only connection. Dropping it closes the connection, so a
/// lease never outlives the query it was taken for.
pub struct ReadLease {
    conn: Connection,
    path: PathBuf,
}

impl Deref for ReadLease {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for ReadLease {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "read lease released");
    }
}
