use anyhow::{Context, Result};
use chrono::Datelike;
use rusqlite::{params, Connection};

use crate::models::DeathRecord;

/// Insert death records with their derived columns. Duplicates (same name,
/// birth date, death date and place) are ignored so re-running an import is
/// idempotent. Returns the number of rows actually added.
pub fn insert_records(conn: &mut Connection, records: &[DeathRecord]) -> Result<usize> {
    let tx = conn
        .transaction()
        .context("failed to start import transaction")?;

    let mut added = 0;
    {
        let mut stmt = tx
            .prepare(
                "INSERT OR IGNORE INTO death_records (
                    full_name, sex, birth_date, birth_place, death_date, death_place,
                    death_year, death_month, death_day, age_at_death, department_code
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .context("failed to prepare death record insert")?;

        for record in records {
            added += stmt
                .execute(params![
                    record.full_name,
                    record.sex.code(),
                    record.birth_date.map(|date| date.to_string()),
                    record.birth_place,
                    record.death_date.to_string(),
                    record.death_place,
                    record.death_year(),
                    record.death_month(),
                    record.death_date.day(),
                    record.age_at_death(),
                    record.department_code(),
                ])
                .context("failed to insert death record")?;
        }
    }

    tx.commit().context("failed to commit import transaction")?;
    Ok(added)
}
