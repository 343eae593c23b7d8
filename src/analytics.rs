//! Aggregation API over the death table.
//!
//! Every breakdown is one grouped query over the filtered records: the rows the
//! query returns *are* the dimension set. Nothing here enumerates candidate
//! years, months or departments up front and probes them one by one.
//!
//! Ordering is part of the contract: years and months come most recent first,
//! departments in code order, age buckets youngest first. Time series (daily
//! counts, the month x day heatmap, medians per year) run oldest first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use rusqlite::{Connection, Row};
use serde::Serialize;
use tracing::debug;

use crate::db::{ConnectionManager, SqlFilter};
use crate::error::{DashboardError, Result};
use crate::models::{
    AgeRange, AggregationResult, AggregationRow, BucketWidth, Dimension, FilterSet, MonthView,
    Sex, YEAR_RANGE,
};
use crate::population::{mortality_rate, ReferenceDataCache};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_records: u64,
    pub first_death_date: Option<NaiveDate>,
    pub last_death_date: Option<NaiveDate>,
    pub departments: u64,
}

/// Median age at death of one year, with the number of deaths it was taken
/// over.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearMedianAge {
    pub year: i32,
    pub median_age: f64,
    pub deaths: u64,
}

/// Deaths of one age group across the requested years. `deaths_by_year`
/// holds every year that has data in any group, with zero where this group
/// has none; `evolution_pct` compares the last two requested years.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgeGroupTrend {
    pub ages: AgeRange,
    pub deaths_by_year: BTreeMap<i32, u64>,
    pub evolution_pct: Option<f64>,
}

/// Entry point used by the dashboard. Connections are leased per call; the
/// population cache is injected so several views can share one load.
#[derive(Clone)]
pub struct MortalityAnalytics {
    connections: ConnectionManager,
    population: Option<Arc<ReferenceDataCache>>,
}

impl MortalityAnalytics {
    pub fn new(connections: ConnectionManager) -> Self {
        Self {
            connections,
            population: None,
        }
    }

    /// Without a cache every rate stays `None`.
    pub fn with_population(mut self, population: Arc<ReferenceDataCache>) -> Self {
        self.population = Some(population);
        self
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Deaths per distinct death year present after filtering, newest first.
    pub fn totals_by_year(&self, filters: &FilterSet) -> Result<AggregationResult> {
        let operation = "totals_by_year";
        let sql_filter = SqlFilter::from_filters(filters);
        let counts = self.run(operation, filters, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT death_year, COUNT(*) FROM death_records {}
                     GROUP BY death_year ORDER BY death_year DESC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| Ok((row.get::<_, i32>(0)?, count_at(row, 1)?)),
            )
        })?;

        let mut result = AggregationResult::new(vec!["year"]);
        for (year, count) in counts {
            let mut row = AggregationRow::new(vec![Dimension::Year(year)], count);
            self.attach_rate(&mut row, filters, year, filters.department.as_deref(), None)
                .map_err(|err| err.in_operation(operation, filters))?;
            result.rows.push(row);
        }
        Ok(result)
    }

    /// Deaths per month. [`MonthView::Observed`] keeps only months that have
    /// records (most recent first); [`MonthView::Calendar`] is the fixed
    /// January-December view of one year with empty months at zero.
    pub fn totals_by_month(&self, filters: &FilterSet, view: MonthView) -> Result<AggregationResult> {
        let operation = "totals_by_month";
        let scoped = match view {
            MonthView::Observed => filters.clone(),
            MonthView::Calendar { year } => scope_to_year(filters, year)?,
        };
        let order = match view {
            MonthView::Observed => "DESC",
            MonthView::Calendar { .. } => "ASC",
        };

        let sql_filter = SqlFilter::from_filters(&scoped);
        let counts = self.run(operation, &scoped, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT death_month, COUNT(*) FROM death_records {}
                     GROUP BY death_month ORDER BY death_month {order}",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| Ok((row.get::<_, u32>(0)?, count_at(row, 1)?)),
            )
        })?;

        let mut result = AggregationResult::new(vec!["month"]);
        match view {
            MonthView::Observed => {
                result.rows = counts
                    .into_iter()
                    .map(|(month, count)| AggregationRow::new(vec![Dimension::Month(month)], count))
                    .collect();
            }
            MonthView::Calendar { .. } => {
                let by_month: BTreeMap<u32, u64> = counts.into_iter().collect();
                result.rows = (1..=12)
                    .map(|month| {
                        let count = by_month.get(&month).copied().unwrap_or(0);
                        AggregationRow::new(vec![Dimension::Month(month)], count)
                    })
                    .collect();
            }
        }
        Ok(result)
    }

    /// Cross-tabulation of death year x age bucket. Rates use the population of
    /// the matching bucket; widths the reference tables do not carry get `None`.
    pub fn by_year_and_age_group(
        &self,
        filters: &FilterSet,
        width: BucketWidth,
    ) -> Result<AggregationResult> {
        self.year_age_result("by_year_and_age_group", filters, None, width)
    }

    /// Same cross-tabulation restricted to a set of years, for comparing a
    /// handful of years side by side.
    pub fn by_years_and_age_group(
        &self,
        filters: &FilterSet,
        years: &[i32],
        width: BucketWidth,
    ) -> Result<AggregationResult> {
        validate_years(years)?;
        self.year_age_result("by_years_and_age_group", filters, Some(years), width)
    }

    /// Deaths per department present. Rates need a year filter, since the
    /// population tables are per year.
    pub fn by_department(&self, filters: &FilterSet) -> Result<AggregationResult> {
        let operation = "by_department";
        let sql_filter = SqlFilter::from_filters(filters);
        let counts = self.run(operation, filters, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT department_code, COUNT(*) FROM death_records {}
                     GROUP BY department_code ORDER BY department_code ASC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| Ok((row.get::<_, String>(0)?, count_at(row, 1)?)),
            )
        })?;

        let mut result = AggregationResult::new(vec!["department"]);
        for (department, count) in counts {
            let mut row = AggregationRow::new(vec![Dimension::Department(department.clone())], count);
            if let Some(year) = filters.year {
                self.attach_rate(&mut row, filters, year, Some(&department), None)
                    .map_err(|err| err.in_operation(operation, filters))?;
            }
            result.rows.push(row);
        }
        Ok(result)
    }

    /// Department x age bucket, departments in code order and buckets
    /// youngest first. Rates come from the department x age table and, like
    /// [`Self::by_department`], need a year filter.
    pub fn by_department_and_age_group(
        &self,
        filters: &FilterSet,
        width: BucketWidth,
    ) -> Result<AggregationResult> {
        let operation = "by_department_and_age_group";
        let bucket = bucket_expression(width)?;
        let sql_filter = SqlFilter::from_filters(filters).require_age();
        let cells = self.run(operation, filters, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT department_code, {bucket} AS bucket, COUNT(*) FROM death_records {}
                     GROUP BY department_code, bucket
                     ORDER BY department_code ASC, bucket ASC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, u32>(1)?,
                        count_at(row, 2)?,
                    ))
                },
            )
        })?;

        let mut result = AggregationResult::new(vec!["department", "age_group"]);
        for (department, start, count) in cells {
            let ages = width.bucket(start)?;
            let mut row = AggregationRow::new(
                vec![
                    Dimension::Department(department.clone()),
                    Dimension::AgeBucket(ages),
                ],
                count,
            );
            if let Some(year) = filters.year {
                self.attach_rate(&mut row, filters, year, Some(&department), Some(ages))
                    .map_err(|err| err.in_operation(operation, filters))?;
            }
            result.rows.push(row);
        }
        Ok(result)
    }

    /// Age x sex breakdown of one year in 5-year buckets. Male rows come
    /// before female rows inside each bucket; see
    /// [`AggregationRow::signed_count`] for the left/right split.
    pub fn age_sex_pyramid(&self, filters: &FilterSet, year: i32) -> Result<AggregationResult> {
        let operation = "age_sex_pyramid";
        let width = BucketWidth::Five;
        let scoped = scope_to_year(filters, year)?;
        let bucket = bucket_expression(width)?;
        let sql_filter = SqlFilter::from_filters(&scoped)
            .require_age()
            .require_known_sex();
        let bars = self.run(operation, &scoped, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT {bucket} AS bucket, sex, COUNT(*) FROM death_records {}
                     GROUP BY bucket, sex ORDER BY bucket ASC, sex ASC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, i64>(1)?,
                        count_at(row, 2)?,
                    ))
                },
            )
        })?;

        let mut result = AggregationResult::new(vec!["age_group", "sex"]);
        for (start, code, count) in bars {
            let Some(sex) = Sex::from_code(code) else {
                continue;
            };
            result.rows.push(AggregationRow::new(
                vec![Dimension::AgeBucket(width.bucket(start)?), Dimension::Sex(sex)],
                count,
            ));
        }
        Ok(result)
    }

    /// Deaths per calendar day of one year, oldest first, for the time series.
    pub fn daily_deaths(&self, filters: &FilterSet, year: i32) -> Result<AggregationResult> {
        let operation = "daily_deaths";
        let scoped = scope_to_year(filters, year)?;
        let sql_filter = SqlFilter::from_filters(&scoped);
        let days = self.run(operation, &scoped, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT death_date, COUNT(*) FROM death_records {}
                     GROUP BY death_date ORDER BY death_date ASC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| Ok((date_at(row, 0)?, count_at(row, 1)?)),
            )
        })?;

        let mut result = AggregationResult::new(vec!["date"]);
        result.rows = days
            .into_iter()
            .map(|(date, count)| AggregationRow::new(vec![Dimension::Date(date)], count))
            .collect();
        Ok(result)
    }

    /// Month x day-of-month counts of one year for the calendar heatmap.
    /// Only days with deaths appear.
    pub fn deaths_by_month_day(&self, filters: &FilterSet, year: i32) -> Result<AggregationResult> {
        let operation = "deaths_by_month_day";
        let scoped = scope_to_year(filters, year)?;
        let sql_filter = SqlFilter::from_filters(&scoped).require_day();
        let cells = self.run(operation, &scoped, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT death_month, death_day, COUNT(*) FROM death_records {}
                     GROUP BY death_month, death_day ORDER BY death_month ASC, death_day ASC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, u32>(1)?,
                        count_at(row, 2)?,
                    ))
                },
            )
        })?;

        let mut result = AggregationResult::new(vec!["month", "day"]);
        result.rows = cells
            .into_iter()
            .map(|(month, day, count)| {
                AggregationRow::new(vec![Dimension::Month(month), Dimension::Day(day)], count)
            })
            .collect();
        Ok(result)
    }

    /// Median age at death per year, oldest year first. An empty `years`
    /// slice means every year in the store. Even counts take the mean of the
    /// two middle ages.
    pub fn median_age_by_year(
        &self,
        filters: &FilterSet,
        years: &[i32],
    ) -> Result<Vec<YearMedianAge>> {
        if !years.is_empty() {
            validate_years(years)?;
        }
        let mut sql_filter = SqlFilter::from_filters(filters).require_age();
        if !years.is_empty() {
            sql_filter = sql_filter.years_in(years);
        }
        let histogram = self.run("median_age_by_year", filters, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT death_year, age_at_death, COUNT(*) FROM death_records {}
                     GROUP BY death_year, age_at_death
                     ORDER BY death_year ASC, age_at_death ASC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| {
                    Ok((
                        row.get::<_, i32>(0)?,
                        row.get::<_, u32>(1)?,
                        count_at(row, 2)?,
                    ))
                },
            )
        })?;

        let mut per_year: BTreeMap<i32, Vec<(u32, u64)>> = BTreeMap::new();
        for (year, age, count) in histogram {
            per_year.entry(year).or_default().push((age, count));
        }
        Ok(per_year
            .into_iter()
            .filter_map(|(year, ages)| {
                let median_age = median_from_histogram(&ages)?;
                Some(YearMedianAge {
                    year,
                    median_age,
                    deaths: ages.iter().map(|(_, count)| count).sum(),
                })
            })
            .collect())
    }

    /// The age bucket with the most deaths in `year`, with its count. Ties go
    /// to the youngest bucket.
    pub fn most_affected_age_group(
        &self,
        filters: &FilterSet,
        year: i32,
        width: BucketWidth,
    ) -> Result<Option<(AgeRange, u64)>> {
        let scoped = scope_to_year(filters, year)?;
        let cells = self.year_age_cells("most_affected_age_group", &scoped, None, width)?;

        let mut busiest: Option<(AgeRange, u64)> = None;
        for (_, ages, count) in cells {
            if busiest.map_or(true, |(_, best)| count > best) {
                busiest = Some((ages, count));
            }
        }
        Ok(busiest)
    }

    /// Per-bucket deaths across `years`, youngest bucket first, with the
    /// percentage change between the last two requested years.
    pub fn age_trends_summary(
        &self,
        filters: &FilterSet,
        years: &[i32],
        width: BucketWidth,
    ) -> Result<Vec<AgeGroupTrend>> {
        validate_years(years)?;
        let cells = self.year_age_cells("age_trends_summary", filters, Some(years), width)?;

        let years_with_data: BTreeSet<i32> = cells.iter().map(|(year, _, _)| *year).collect();
        let mut by_bucket: BTreeMap<AgeRange, BTreeMap<i32, u64>> = BTreeMap::new();
        for (year, ages, count) in cells {
            by_bucket.entry(ages).or_default().insert(year, count);
        }

        let mut requested: Vec<i32> = years.to_vec();
        requested.sort_unstable();
        requested.dedup();
        let compared = match requested.as_slice() {
            [.., previous, last] => Some((*previous, *last)),
            _ => None,
        };

        Ok(by_bucket
            .into_iter()
            .map(|(ages, counts)| {
                let deaths_by_year: BTreeMap<i32, u64> = years_with_data
                    .iter()
                    .map(|year| (*year, counts.get(year).copied().unwrap_or(0)))
                    .collect();
                let evolution_pct = compared.and_then(|(previous, last)| {
                    let previous = *deaths_by_year.get(&previous)?;
                    let last = *deaths_by_year.get(&last)?;
                    percent_change(last, previous)
                });
                AgeGroupTrend {
                    ages,
                    deaths_by_year,
                    evolution_pct,
                }
            })
            .collect())
    }

    /// Years with at least one aggregatable record, newest first.
    pub fn available_years(&self) -> Result<Vec<i32>> {
        let totals = self.totals_by_year(&FilterSet::new())?;
        Ok(totals
            .rows
            .iter()
            .filter_map(|row| match row.dimensions.first() {
                Some(Dimension::Year(year)) => Some(*year),
                _ => None,
            })
            .collect())
    }

    pub fn available_departments(&self) -> Result<Vec<String>> {
        let totals = self.by_department(&FilterSet::new())?;
        Ok(totals
            .rows
            .into_iter()
            .filter_map(|row| match row.dimensions.into_iter().next() {
                Some(Dimension::Department(code)) => Some(code),
                _ => None,
            })
            .collect())
    }

    pub fn total_deaths(&self, filters: &FilterSet) -> Result<u64> {
        let sql_filter = SqlFilter::from_filters(filters);
        self.run("total_deaths", filters, |conn| {
            let total = conn.query_row(
                &format!("SELECT COUNT(*) FROM death_records {}", sql_filter.where_clause()),
                sql_filter.params(),
                |row| count_at(row, 0),
            )?;
            Ok(total)
        })
    }

    /// Mean age at death rounded to one decimal, `None` when nothing matches.
    pub fn average_age(&self, filters: &FilterSet) -> Result<Option<f64>> {
        let sql_filter = SqlFilter::from_filters(filters).require_age();
        self.run("average_age", filters, |conn| {
            let average: Option<f64> = conn.query_row(
                &format!(
                    "SELECT AVG(age_at_death) FROM death_records {}",
                    sql_filter.where_clause()
                ),
                sql_filter.params(),
                |row| row.get(0),
            )?;
            Ok(average.map(|value| (value * 10.0).round() / 10.0))
        })
    }

    /// Percentage change of the filtered year against the previous year.
    /// `None` without a year filter or when the previous year has no records.
    pub fn year_over_year(&self, filters: &FilterSet) -> Result<Option<f64>> {
        filters.validate()?;
        let Some(year) = filters.year else {
            return Ok(None);
        };

        let unscoped = FilterSet {
            year: None,
            ..filters.clone()
        };
        let sql_filter = SqlFilter::from_filters(&unscoped).years_in(&[year - 1, year]);
        let counts = self.run("year_over_year", filters, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT death_year, COUNT(*) FROM death_records {}
                     GROUP BY death_year",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| Ok((row.get::<_, i32>(0)?, count_at(row, 1)?)),
            )
        })?;

        let counts: BTreeMap<i32, u64> = counts.into_iter().collect();
        let current = counts.get(&year).copied().unwrap_or(0);
        Ok(counts
            .get(&(year - 1))
            .and_then(|previous| percent_change(current, *previous)))
    }

    pub fn store_stats(&self) -> Result<StoreStats> {
        self.run("store_stats", &FilterSet::new(), |conn| {
            let stats = conn.query_row(
                "SELECT COUNT(*), MIN(death_date), MAX(death_date), COUNT(DISTINCT department_code)
                 FROM death_records",
                [],
                |row| {
                    Ok(StoreStats {
                        total_records: count_at(row, 0)?,
                        first_death_date: parse_date(row.get(1)?),
                        last_death_date: parse_date(row.get(2)?),
                        departments: count_at(row, 3)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }

    /// Validate, lease a connection for exactly one query, and tag failures
    /// with the operation and filters.
    fn run<T>(
        &self,
        operation: &'static str,
        filters: &FilterSet,
        query: impl FnMut(&Connection) -> Result<T>,
    ) -> Result<T> {
        filters.validate()?;
        debug!(operation, filters = %filters, "running aggregation");
        self.connections
            .with_read(query)
            .map_err(|err| err.in_operation(operation, filters))
    }

    fn year_age_result(
        &self,
        operation: &'static str,
        filters: &FilterSet,
        years: Option<&[i32]>,
        width: BucketWidth,
    ) -> Result<AggregationResult> {
        let cells = self.year_age_cells(operation, filters, years, width)?;

        let mut result = AggregationResult::new(vec!["year", "age_group"]);
        for (year, ages, count) in cells {
            let mut row =
                AggregationRow::new(vec![Dimension::Year(year), Dimension::AgeBucket(ages)], count);
            self.attach_rate(&mut row, filters, year, filters.department.as_deref(), Some(ages))
                .map_err(|err| err.in_operation(operation, filters))?;
            result.rows.push(row);
        }
        Ok(result)
    }

    /// Grouped year x bucket counts, years newest first and buckets youngest
    /// first, optionally restricted to a set of years.
    fn year_age_cells(
        &self,
        operation: &'static str,
        filters: &FilterSet,
        years: Option<&[i32]>,
        width: BucketWidth,
    ) -> Result<Vec<(i32, AgeRange, u64)>> {
        let bucket = bucket_expression(width)?;
        let mut sql_filter = SqlFilter::from_filters(filters).require_age();
        if let Some(years) = years {
            sql_filter = sql_filter.years_in(years);
        }
        let cells = self.run(operation, filters, |conn| {
            grouped(
                conn,
                &format!(
                    "SELECT death_year, {bucket} AS bucket, COUNT(*) FROM death_records {}
                     GROUP BY death_year, bucket ORDER BY death_year DESC, bucket ASC",
                    sql_filter.where_clause()
                ),
                &sql_filter,
                |row| {
                    Ok((
                        row.get::<_, i32>(0)?,
                        row.get::<_, u32>(1)?,
                        count_at(row, 2)?,
                    ))
                },
            )
        })?;

        cells
            .into_iter()
            .map(|(year, start, count)| {
                Ok::<_, DashboardError>((year, width.bucket(start)?, count))
            })
            .collect()
    }

    /// Fill population and rate from the cache. Sex-filtered slices keep
    /// `None`: the reference tables have no sex split.
    fn attach_rate(
        &self,
        row: &mut AggregationRow,
        filters: &FilterSet,
        year: i32,
        department: Option<&str>,
        ages: Option<AgeRange>,
    ) -> Result<()> {
        let Some(cache) = &self.population else {
            return Ok(());
        };
        if filters.sex.is_some() {
            return Ok(());
        }
        match cache.get_population(year, department, ages) {
            Ok(population) => {
                row.population = Some(population);
                row.rate = mortality_rate(row.count, population);
                Ok(())
            }
            Err(DashboardError::UnsupportedAgeRange { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Apply a mandatory single year on top of the caller's filters, refusing a
/// contradictory `filters.year`.
fn scope_to_year(filters: &FilterSet, year: i32) -> Result<FilterSet> {
    match filters.year {
        Some(requested) if requested != year => Err(DashboardError::invalid_filter(
            "year",
            format!("{requested} conflicts with requested year {year}"),
        )),
        _ => Ok(filters.clone().with_year(year)),
    }
}

/// A year set must be non-empty and inside the accepted year range.
fn validate_years(years: &[i32]) -> Result<()> {
    if years.is_empty() {
        return Err(DashboardError::invalid_filter("years", "empty set"));
    }
    match years.iter().find(|year| !YEAR_RANGE.contains(year)) {
        Some(year) => Err(DashboardError::invalid_filter("years", year)),
        None => Ok(()),
    }
}

/// Change from `previous` to `current` in percent, one decimal. `None` when
/// there is nothing to compare against.
fn percent_change(current: u64, previous: u64) -> Option<f64> {
    if previous == 0 {
        return None;
    }
    let (current, previous) = (current as f64, previous as f64);
    Some(((current - previous) / previous * 1000.0).round() / 10.0)
}

/// Median of an `(age, count)` histogram sorted by age.
fn median_from_histogram(histogram: &[(u32, u64)]) -> Option<f64> {
    let total: u64 = histogram.iter().map(|(_, count)| count).sum();
    if total == 0 {
        return None;
    }
    let nth = |index: u64| {
        let mut seen = 0;
        histogram.iter().find_map(|(age, count)| {
            seen += count;
            (index < seen).then_some(*age)
        })
    };
    let upper = nth(total / 2)?;
    if total % 2 == 1 {
        Some(upper.into())
    } else {
        let lower = nth(total / 2 - 1)?;
        Some((f64::from(lower) + f64::from(upper)) / 2.0)
    }
}

/// SQL expression mapping `age_at_death` to the lower bound of its bucket.
/// Width and open bucket start are validated integers, never caller text.
fn bucket_expression(width: BucketWidth) -> Result<String> {
    let years = width.years()?;
    let open_from = width.open_from()?;
    Ok(format!(
        "CASE WHEN age_at_death >= {open_from} THEN {open_from} \
         ELSE (age_at_death / {years}) * {years} END"
    ))
}

fn grouped<T>(
    conn: &Connection,
    sql: &str,
    filter: &SqlFilter,
    map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(filter.params(), map)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count_at(row: &Row<'_>, index: usize) -> rusqlite::Result<u64> {
    let count: i64 = row.get(index)?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn date_at(row: &Row<'_>, index: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(index)?;
    raw.parse().map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn parse_date(raw: Option<String>) -> Option<NaiveDate> {
    raw.and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_and_even_histograms() {
        assert_eq!(median_from_histogram(&[(73, 1), (83, 1), (99, 1)]), Some(83.0));
        assert_eq!(
            median_from_histogram(&[(64, 1), (80, 1), (89, 1), (94, 1)]),
            Some(84.5)
        );
        assert_eq!(median_from_histogram(&[(70, 3), (90, 1)]), Some(70.0));
        assert_eq!(median_from_histogram(&[]), None);
    }

    #[test]
    fn percent_change_needs_a_previous_value() {
        assert_eq!(percent_change(5, 3), Some(66.7));
        assert_eq!(percent_change(0, 1), Some(-100.0));
        assert_eq!(percent_change(4, 0), None);
    }

    #[test]
    fn year_sets_are_checked() {
        assert!(validate_years(&[2024, 2025]).is_ok());
        assert!(matches!(
            validate_years(&[]),
            Err(DashboardError::InvalidFilter { field: "years", .. })
        ));
        assert!(matches!(
            validate_years(&[2024, 3000]),
            Err(DashboardError::InvalidFilter { field: "years", .. })
        ));
    }
}
