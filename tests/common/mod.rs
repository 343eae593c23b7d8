#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use mortality_dashboard::{
    ensure_schema, insert_records, ConnectionManager, DeathRecord, MortalityAnalytics,
    PopulationPaths, ReferenceDataCache, RetryPolicy, Sex,
};
use tempfile::TempDir;

static NEXT_NAME: AtomicUsize = AtomicUsize::new(0);

pub struct Fixture {
    pub dir: TempDir,
    pub db_path: PathBuf,
}

impl Fixture {
    pub fn connections(&self) -> ConnectionManager {
        ConnectionManager::new(&self.db_path).with_retry_policy(fast_retry())
    }

    pub fn analytics(&self) -> MortalityAnalytics {
        MortalityAnalytics::new(self.connections())
    }

    pub fn analytics_with_population(&self) -> MortalityAnalytics {
        self.analytics().with_population(population_cache(&self.dir))
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(2, Duration::from_millis(1))
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid fixture date")
}

pub fn record(
    sex: Sex,
    birth: Option<(i32, u32, u32)>,
    death: (i32, u32, u32),
    place: &str,
) -> DeathRecord {
    let n = NEXT_NAME.fetch_add(1, Ordering::Relaxed);
    DeathRecord {
        full_name: format!("PERSON{n}*TEST/"),
        sex,
        birth_date: birth.map(|(y, m, d)| date(y, m, d)),
        birth_place: "75056".to_string(),
        death_date: date(death.0, death.1, death.2),
        death_place: place.to_string(),
    }
}

pub fn store_with(records: &[DeathRecord]) -> Fixture {
    let dir = TempDir::new().expect("temp dir");
    let db_path = dir.path().join("mortality.sqlite");
    let mut conn = ensure_schema(&db_path).expect("schema");
    insert_records(&mut conn, records).expect("insert fixtures");
    Fixture { dir, db_path }
}

/// Three records in 2024, five in 2025, plus one foreign death (no
/// department) in 2023 that no aggregation may count.
pub fn sample_records() -> Vec<DeathRecord> {
    vec![
        record(Sex::Female, Some((1940, 3, 1)), (2024, 1, 15), "75056"),
        record(Sex::Male, Some((1950, 5, 5)), (2024, 3, 10), "75056"),
        record(Sex::Female, Some((1925, 1, 1)), (2024, 3, 20), "13055"),
        record(Sex::Male, Some((1930, 2, 2)), (2025, 2, 1), "75056"),
        record(Sex::Female, Some((1935, 6, 1)), (2025, 2, 11), "75056"),
        record(Sex::Male, Some((1960, 7, 7)), (2025, 7, 1), "13055"),
        record(Sex::Female, Some((1945, 12, 12)), (2025, 12, 24), "2A004"),
        record(Sex::Male, None, (2025, 7, 14), "97411"),
        record(Sex::Female, Some((1930, 1, 1)), (2023, 5, 5), "99100"),
    ]
}

pub fn sample_store() -> Fixture {
    store_with(&sample_records())
}

/// Reference tables for source year 2024: Paris 200k, Bouches-du-Rhone 100k,
/// 10k per national 5-year bucket and 1k per Paris bucket.
pub fn population_cache(dir: &TempDir) -> Arc<ReferenceDataCache> {
    let paths = PopulationPaths::in_dir(dir.path());

    fs::write(
        &paths.department,
        "year,department_code,population\n2024,75,200000\n2024,13,100000\n",
    )
    .expect("department table");

    let mut age = String::from("year,age_min,age_max,population\n");
    let mut complete = String::from("year,department_code,age_min,age_max,population\n");
    for (min, max) in standard_buckets() {
        writeln!(age, "2024,{min},{max},10000").unwrap();
        writeln!(complete, "2024,75,{min},{max},1000").unwrap();
    }
    fs::write(&paths.age, age).expect("age table");
    fs::write(&paths.complete, complete).expect("complete table");

    Arc::new(ReferenceDataCache::new(paths))
}

fn standard_buckets() -> Vec<(u32, u32)> {
    let mut buckets: Vec<_> = (0..95).step_by(5).map(|min| (min, min + 4)).collect();
    buckets.push((95, 120));
    buckets
}
