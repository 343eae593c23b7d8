use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Create the store file if needed, run lazy migrations, and return a live
/// read-write connection. Only the ingestion path and test fixtures call this;
/// dashboard readers go through [`super::ConnectionManager`].
pub fn ensure_schema(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("failed to create data directory")?;
    }

    let conn = Connection::open(db_path).context("failed to open SQLite database")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS death_records (
            full_name TEXT NOT NULL,
            sex INTEGER,
            birth_date TEXT,
            birth_place TEXT,
            death_date TEXT NOT NULL,
            death_place TEXT,
            death_year INTEGER,
            death_month INTEGER,
            death_day INTEGER,
            age_at_death INTEGER,
            department_code TEXT,
            UNIQUE (full_name, birth_date, death_date, death_place)
        )",
        [],
    )
    .context("failed to create death_records table")?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_death_records_year ON death_records(death_year);
         CREATE INDEX IF NOT EXISTS idx_death_records_month ON death_records(death_month);
         CREATE INDEX IF NOT EXISTS idx_death_records_department ON death_records(department_code);
         CREATE INDEX IF NOT EXISTS idx_death_records_sex ON death_records(sex);
         CREATE INDEX IF NOT EXISTS idx_death_records_date ON death_records(death_date);",
    )
    .context("failed to create death_records indexes")?;

    Ok(conn)
}
