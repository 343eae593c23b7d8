mod common;

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{fast_retry, sample_store};
use mortality_dashboard::db::{ReadOnlyOpener, StoreOpener};
use mortality_dashboard::{
    ConnectionManager, DashboardError, FilterSet, MortalityAnalytics, RetryPolicy,
};
use rusqlite::{ffi, Connection};

/// Reports `SQLITE_BUSY` for the first `failures` attempts, then opens for real.
struct FlakyOpener {
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyOpener {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StoreOpener for FlakyOpener {
    fn open(&self, path: &Path) -> rusqlite::Result<Connection> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_BUSY),
                Some("database is locked".to_string()),
            ))
        } else {
            ReadOnlyOpener.open(path)
        }
    }
}

/// Opens for real, then lets a writer take an exclusive lock before the
/// caller runs its query. The writer commits at the start of call
/// `release_on_call`, if set.
struct WriterAfterOpen {
    writer: Mutex<Option<Connection>>,
    release_on_call: Option<usize>,
    calls: AtomicUsize,
}

impl WriterAfterOpen {
    fn new(release_on_call: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            writer: Mutex::new(None),
            release_on_call,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl StoreOpener for WriterAfterOpen {
    fn open(&self, path: &Path) -> rusqlite::Result<Connection> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut writer = self.writer.lock().unwrap();
        if Some(call) == self.release_on_call {
            if let Some(conn) = writer.take() {
                conn.execute_batch("COMMIT;")?;
            }
        }

        let reader = ReadOnlyOpener.open(path)?;
        if call == 1 {
            let conn = Connection::open(path)?;
            conn.execute_batch("BEGIN EXCLUSIVE;")?;
            *writer = Some(conn);
        }
        Ok(reader)
    }
}

struct CannotOpen;

impl StoreOpener for CannotOpen {
    fn open(&self, _path: &Path) -> rusqlite::Result<Connection> {
        Err(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CANTOPEN),
            Some("unable to open database file".to_string()),
        ))
    }
}

#[test]
fn missing_store_fails_fast_without_retrying() {
    let dir = tempfile::TempDir::new().unwrap();
    let opener = FlakyOpener::new(0);
    let manager = ConnectionManager::new(dir.path().join("absent.sqlite"))
        .with_opener(opener.clone());

    let started = Instant::now();
    let err = manager.acquire_read_connection().err().unwrap();
    assert!(matches!(err, DashboardError::StoreMissing { .. }));
    assert_eq!(opener.calls(), 0);
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn short_lock_is_absorbed_by_retries() {
    let fixture = sample_store();
    let opener = FlakyOpener::new(2);
    let manager = fixture.connections().with_opener(opener.clone());

    let lease = manager.acquire_read_connection().unwrap();
    let rows: i64 = lease
        .query_row("SELECT COUNT(*) FROM death_records", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 9);
    assert_eq!(opener.calls(), 3);
}

#[test]
fn permanent_lock_exhausts_exactly_the_configured_attempts() {
    let fixture = sample_store();
    let opener = FlakyOpener::new(usize::MAX);
    let manager = fixture.connections().with_opener(opener.clone());

    match manager.acquire_read_connection() {
        Err(DashboardError::StoreLocked { attempts, .. }) => assert_eq!(attempts, 3),
        Err(other) => panic!("expected StoreLocked, got {other:?}"),
        Ok(_) => panic!("expected StoreLocked, got a lease"),
    }
    assert_eq!(opener.calls(), fast_retry().max_retries + 1);
}

#[test]
fn default_schedule_stays_within_its_budget() {
    let fixture = sample_store();
    let opener = FlakyOpener::new(usize::MAX);
    let manager = ConnectionManager::new(&fixture.db_path).with_opener(opener.clone());
    let budget = RetryPolicy::default().budget();

    let started = Instant::now();
    assert!(manager.acquire_read_connection().is_err());
    let elapsed = started.elapsed();

    assert_eq!(opener.calls(), 4);
    assert!(elapsed >= budget, "{elapsed:?} < {budget:?}");
    assert!(elapsed < budget + Duration::from_millis(500), "{elapsed:?}");
}

#[test]
fn exclusive_writer_lock_is_reported_then_released() {
    let fixture = sample_store();
    let manager = fixture.connections();

    let writer = Connection::open(&fixture.db_path).unwrap();
    writer.execute_batch("BEGIN EXCLUSIVE;").unwrap();

    let err = manager.acquire_read_connection().err().unwrap();
    assert!(err.is_store_locked(), "{err:?}");

    writer.execute_batch("COMMIT;").unwrap();
    assert!(manager.acquire_read_connection().is_ok());
}

#[test]
fn aggregation_does_not_hide_an_exhausted_lock() {
    let fixture = sample_store();
    let analytics = MortalityAnalytics::new(
        fixture.connections().with_opener(FlakyOpener::new(usize::MAX)),
    );

    let err = analytics.totals_by_year(&FilterSet::new()).unwrap_err();
    assert!(err.is_store_locked());
    assert!(matches!(err, DashboardError::Aggregation { operation: "totals_by_year", .. }));
}

#[test]
fn non_lock_failures_are_not_retried() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("garbage.sqlite");
    fs::write(&path, vec![0x42u8; 4096]).unwrap();

    let manager = ConnectionManager::new(&path).with_retry_policy(fast_retry());
    let started = Instant::now();
    let err = manager.acquire_read_connection().err().unwrap();
    assert!(matches!(err, DashboardError::Store(_)), "{err:?}");
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[test]
fn readers_do_not_block_each_other() {
    let fixture = sample_store();
    let manager = fixture.connections();

    let first = manager.acquire_read_connection().unwrap();
    let second = manager.acquire_read_connection().unwrap();
    let count = |conn: &Connection| -> i64 {
        conn.query_row("SELECT COUNT(*) FROM death_records", [], |row| row.get(0))
            .unwrap()
    };
    assert_eq!(count(&*first), count(&*second));
}

#[test]
fn lock_taken_after_open_is_retried_as_a_lock() {
    let fixture = sample_store();
    let opener = WriterAfterOpen::new(None);
    let analytics = MortalityAnalytics::new(fixture.connections().with_opener(opener.clone()));

    let err = analytics.totals_by_year(&FilterSet::new()).unwrap_err();
    assert!(err.is_store_locked(), "{err:?}");
    assert!(matches!(
        err.root(),
        DashboardError::StoreLocked { attempts: 3, .. }
    ));
    assert_eq!(opener.calls(), 3);
}

#[test]
fn query_is_replayed_once_the_writer_commits() {
    let fixture = sample_store();
    let opener = WriterAfterOpen::new(Some(2));
    let analytics = MortalityAnalytics::new(fixture.connections().with_opener(opener.clone()));

    let result = analytics.totals_by_year(&FilterSet::new()).unwrap();
    assert_eq!(result.total(), 8);
    assert_eq!(opener.calls(), 2);
}

#[test]
fn unopenable_existing_file_is_not_reported_missing() {
    let fixture = sample_store();
    let manager = fixture.connections().with_opener(Arc::new(CannotOpen));

    let err = manager.acquire_read_connection().err().unwrap();
    assert!(matches!(err, DashboardError::Store(_)), "{err:?}");
    assert!(!err.is_store_missing());
}
