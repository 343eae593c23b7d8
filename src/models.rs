//! Domain models passed between the store, the aggregation API and the export
//! assembler. Like the rest of the crate these stay light-weight data holders;
//! the only logic living here is validation and the derivations every layer
//! must agree on (department extraction, age at death, age bucketing).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::error::{DashboardError, Result};

/// Upper bound of the open-ended last age bucket ("95+" is stored as 95-120).
pub const MAX_AGE: u32 = 120;
/// Ages from the largest multiple of the bucket width at or below this value
/// collapse into the open-ended bucket.
pub const OPEN_BUCKET_CEILING: u32 = 95;
/// Death years accepted by filters. Matches the range the ingestion path keeps.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1800..=2100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
}

impl Sex {
    /// INSEE coding used in the store: 1 for men, 2 for women.
    pub fn code(self) -> i64 {
        match self {
            Sex::Male => 1,
            Sex::Female => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Sex> {
        match code {
            1 => Some(Sex::Male),
            2 => Some(Sex::Female),
            _ => None,
        }
    }

    pub fn letter(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }
}

impl FromStr for Sex {
    type Err = DashboardError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "M" | "1" | "MALE" => Ok(Sex::Male),
            "F" | "2" | "FEMALE" => Ok(Sex::Female),
            _ => Err(DashboardError::invalid_filter("sex", raw)),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

/// Whether `code` names a French department: metropolitan `01`-`95` (with
/// Corsica as `2A`/`2B` instead of `20`) or an overseas three-digit code.
pub fn is_known_department(code: &str) -> bool {
    match code {
        "2A" | "2B" => true,
        _ if code.len() == 2 && code.bytes().all(|b| b.is_ascii_digit()) => {
            matches!(code.parse::<u32>(), Ok(n) if (1..=95).contains(&n) && n != 20)
        }
        _ if code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()) => {
            matches!(code.parse::<u32>(), Ok(n) if (971..=978).contains(&n) || (986..=988).contains(&n))
        }
        _ => false,
    }
}

/// Derive the department code from an INSEE place code (commune code of the
/// death place). Overseas codes keep three characters; anything that does not
/// resolve to a known department (foreign deaths, blanks) yields `None`.
pub fn department_from_place(place: &str) -> Option<String> {
    let place = place.trim();
    if place.len() < 2 || !place.is_char_boundary(2) {
        return None;
    }

    let candidate = if (place.starts_with("97") || place.starts_with("98")) && place.len() >= 3 {
        &place[..3]
    } else {
        &place[..2]
    };

    is_known_department(candidate).then(|| candidate.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One row of the immutable death table. Only the identity fields come from
/// the source file; everything used for aggregation is derived here so the
/// writer and the readers agree on the rules.
pub struct DeathRecord {
    /// Kept for deduplication only; never aggregated.
    pub full_name: String,
    pub sex: Sex,
    pub birth_date: Option<NaiveDate>,
    pub birth_place: String,
    pub death_date: NaiveDate,
    /// INSEE commune code of the death place.
    pub death_place: String,
}

impl DeathRecord {
    pub fn death_year(&self) -> i32 {
        self.death_date.year()
    }

    pub fn death_month(&self) -> u32 {
        self.death_date.month()
    }

    pub fn department_code(&self) -> Option<String> {
        department_from_place(&self.death_place)
    }

    /// Completed years between birth and death, `None` when the birth date is
    /// unknown or after the death date.
    pub fn age_at_death(&self) -> Option<u32> {
        let birth = self.birth_date?;
        let mut age = self.death_date.year() - birth.year();
        if (self.death_date.month(), self.death_date.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        u32::try_from(age).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Caller-supplied constraints. Every field is either unset or a single value.
pub struct FilterSet {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub department: Option<String>,
    pub sex: Option<Sex>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_month(mut self, month: u32) -> Self {
        self.month = Some(month);
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn with_sex(mut self, sex: Sex) -> Self {
        self.sex = Some(sex);
        self
    }

    /// Reject out-of-range values instead of silently ignoring them.
    pub fn validate(&self) -> Result<()> {
        if let Some(year) = self.year {
            if !YEAR_RANGE.contains(&year) {
                return Err(DashboardError::invalid_filter("year", year));
            }
        }
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(DashboardError::invalid_filter("month", month));
            }
        }
        if let Some(department) = &self.department {
            if !is_known_department(department) {
                return Err(DashboardError::invalid_filter("department", department));
            }
        }
        Ok(())
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(year) = self.year {
            parts.push(format!("year={year}"));
        }
        if let Some(month) = self.month {
            parts.push(format!("month={month}"));
        }
        if let Some(department) = &self.department {
            parts.push(format!("department={department}"));
        }
        if let Some(sex) = self.sex {
            parts.push(format!("sex={sex}"));
        }
        if parts.is_empty() {
            f.write_str("no filters")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
/// Inclusive age interval. The last bucket of a table is open-ended and uses
/// [`MAX_AGE`] as its upper bound.
pub struct AgeRange {
    pub min: u32,
    pub max: u32,
}

impl AgeRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn is_open_ended(&self) -> bool {
        self.max >= MAX_AGE
    }

    pub fn label(&self) -> String {
        if self.is_open_ended() {
            format!("{}+", self.min)
        } else {
            format!("{}-{}", self.min, self.max)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketWidth {
    Five,
    Ten,
    Custom(u32),
}

impl BucketWidth {
    pub fn years(self) -> Result<u32> {
        match self {
            BucketWidth::Five => Ok(5),
            BucketWidth::Ten => Ok(10),
            BucketWidth::Custom(0) => Err(DashboardError::invalid_filter("bucket_width", 0)),
            BucketWidth::Custom(width) => Ok(width),
        }
    }

    /// First age of the open-ended bucket.
    pub fn open_from(self) -> Result<u32> {
        let width = self.years()?;
        Ok((OPEN_BUCKET_CEILING / width) * width)
    }

    /// Bucket whose lower bound is `start` (as produced by the grouped query).
    pub fn bucket(self, start: u32) -> Result<AgeRange> {
        let width = self.years()?;
        let open_from = self.open_from()?;
        if start >= open_from {
            Ok(AgeRange::new(open_from, MAX_AGE))
        } else {
            Ok(AgeRange::new(start, start + width - 1))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How `totals_by_month` shapes its month dimension.
pub enum MonthView {
    /// Only months with at least one matching record, most recent first.
    Observed,
    /// Exactly twelve rows January to December for one year, zero-filled.
    Calendar { year: i32 },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum Dimension {
    Year(i32),
    Month(u32),
    Day(u32),
    Date(NaiveDate),
    Department(String),
    AgeBucket(AgeRange),
    Sex(Sex),
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Year(year) => write!(f, "{year}"),
            Dimension::Month(month) => write!(f, "{month}"),
            Dimension::Day(day) => write!(f, "{day}"),
            Dimension::Date(date) => write!(f, "{date}"),
            Dimension::Department(code) => f.write_str(code),
            Dimension::AgeBucket(range) => f.write_str(&range.label()),
            Dimension::Sex(sex) => write!(f, "{sex}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRow {
    pub dimensions: Vec<Dimension>,
    pub count: u64,
    pub population: Option<u64>,
    /// Deaths per 100,000 inhabitants; `None` when the population is unknown.
    pub rate: Option<f64>,
}

impl AggregationRow {
    pub fn new(dimensions: Vec<Dimension>, count: u64) -> Self {
        Self {
            dimensions,
            count,
            population: None,
            rate: None,
        }
    }

    /// Count signed for pyramid charts: male bars go left (negative).
    pub fn signed_count(&self) -> i64 {
        let count = i64::try_from(self.count).unwrap_or(i64::MAX);
        if self.dimensions.contains(&Dimension::Sex(Sex::Male)) {
            -count
        } else {
            count
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Ordered dimension -> count table. The dimension values are exactly the ones
/// present in the filtered record set (the calendar month view excepted).
pub struct AggregationResult {
    pub dimension_names: Vec<&'static str>,
    pub rows: Vec<AggregationRow>,
}

impl AggregationResult {
    pub fn new(dimension_names: Vec<&'static str>) -> Self {
        Self {
            dimension_names,
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total(&self) -> u64 {
        self.rows.iter().map(|row| row.count).sum()
    }

    /// Values of one dimension column in row order.
    pub fn column(&self, index: usize) -> Vec<&Dimension> {
        self.rows
            .iter()
            .filter_map(|row| row.dimensions.get(index))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn department_extraction_handles_corsica_and_overseas() {
        assert_eq!(department_from_place("75056").as_deref(), Some("75"));
        assert_eq!(department_from_place("2A004").as_deref(), Some("2A"));
        assert_eq!(department_from_place("97411").as_deref(), Some("974"));
        assert_eq!(department_from_place("99100"), None);
        assert_eq!(department_from_place("20004"), None);
        assert_eq!(department_from_place(""), None);
    }

    #[test]
    fn age_counts_completed_years() {
        let record = DeathRecord {
            full_name: "DUPONT*JEAN/".into(),
            sex: Sex::Male,
            birth_date: Some(date(1950, 6, 15)),
            birth_place: "75056".into(),
            death_date: date(2024, 6, 14),
            death_place: "75056".into(),
        };
        assert_eq!(record.age_at_death(), Some(73));

        let later = DeathRecord {
            death_date: date(2024, 6, 15),
            ..record.clone()
        };
        assert_eq!(later.age_at_death(), Some(74));

        let unknown = DeathRecord {
            birth_date: None,
            ..record
        };
        assert_eq!(unknown.age_at_death(), None);
    }

    #[test]
    fn filters_reject_out_of_range_values() {
        assert!(FilterSet::new().with_month(12).validate().is_ok());
        assert!(matches!(
            FilterSet::new().with_month(13).validate(),
            Err(DashboardError::InvalidFilter { field: "month", ref value }) if value == "13"
        ));
        assert!(matches!(
            FilterSet::new().with_department("20").validate(),
            Err(DashboardError::InvalidFilter { field: "department", .. })
        ));
        assert!(FilterSet::new().with_department("2B").validate().is_ok());
        assert!(FilterSet::new().with_department("976").validate().is_ok());
        assert!("X".parse::<Sex>().is_err());
    }

    #[test]
    fn buckets_collapse_into_open_ended_tail() {
        assert_eq!(BucketWidth::Five.bucket(80).unwrap(), AgeRange::new(80, 84));
        assert_eq!(BucketWidth::Five.bucket(95).unwrap(), AgeRange::new(95, MAX_AGE));
        assert_eq!(BucketWidth::Ten.open_from().unwrap(), 90);
        assert_eq!(BucketWidth::Ten.bucket(90).unwrap().label(), "90+");
        assert!(BucketWidth::Custom(0).years().is_err());
    }

    #[test]
    fn male_rows_are_signed_negative() {
        let male = AggregationRow::new(
            vec![Dimension::AgeBucket(AgeRange::new(80, 84)), Dimension::Sex(Sex::Male)],
            7,
        );
        let female = AggregationRow::new(
            vec![Dimension::AgeBucket(AgeRange::new(80, 84)), Dimension::Sex(Sex::Female)],
            9,
        );
        assert_eq!(male.signed_count(), -7);
        assert_eq!(female.signed_count(), 9);
    }
}
