//! Packs named aggregation results into one multi-sheet document, plus a
//! metadata sheet recording the filters so a reader can reproduce the numbers.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{DashboardError, Result};
use crate::models::{AggregationResult, AggregationRow, Dimension, FilterSet};

/// Headers appended after the dimension columns of every data sheet.
pub const VALUE_HEADERS: [&str; 3] = ["deaths", "population", "rate_per_100k"];
pub const METADATA_SHEET: &str = "metadata";
pub const NO_DATA: &str = "no data";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Integer(i64),
    Number(f64),
    Text(String),
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub generated_at: DateTime<Utc>,
    pub sheets: Vec<Sheet>,
    pub metadata: Sheet,
}

impl Document {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| DashboardError::Export(err.to_string()))
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json_pretty()?;
        fs::write(path, json)
            .map_err(|err| DashboardError::Export(format!("{}: {err}", path.display())))
    }
}

/// One sheet per named result (in the given order) plus the metadata sheet.
/// Empty results stay in the document as a sheet noted "no data".
pub fn build_export<N: AsRef<str>>(
    result_set: &[(N, AggregationResult)],
    filters: &FilterSet,
) -> Document {
    build_export_at(result_set, filters, Utc::now())
}

pub fn build_export_at<N: AsRef<str>>(
    result_set: &[(N, AggregationResult)],
    filters: &FilterSet,
    generated_at: DateTime<Utc>,
) -> Document {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let sheets = result_set
        .iter()
        .map(|(name, result)| {
            let name = unique_name(&mut seen, name.as_ref());
            data_sheet(name, result)
        })
        .collect::<Vec<_>>();

    let metadata = metadata_sheet(filters, generated_at, sheets.len());
    Document {
        generated_at,
        sheets,
        metadata,
    }
}

fn unique_name(seen: &mut HashMap<String, usize>, name: &str) -> String {
    let occurrences = seen.entry(name.to_string()).or_insert(0);
    *occurrences += 1;
    if *occurrences == 1 {
        name.to_string()
    } else {
        format!("{name} ({occurrences})")
    }
}

fn data_sheet(name: String, result: &AggregationResult) -> Sheet {
    let headers = result
        .dimension_names
        .iter()
        .copied()
        .chain(VALUE_HEADERS)
        .map(str::to_string)
        .collect();

    Sheet {
        name,
        headers,
        rows: result.rows.iter().map(row_cells).collect(),
        note: result.is_empty().then(|| NO_DATA.to_string()),
    }
}

fn row_cells(row: &AggregationRow) -> Vec<Cell> {
    let mut cells: Vec<Cell> = row.dimensions.iter().map(dimension_cell).collect();
    cells.push(Cell::Integer(i64::try_from(row.count).unwrap_or(i64::MAX)));
    cells.push(match row.population {
        Some(population) => Cell::Integer(i64::try_from(population).unwrap_or(i64::MAX)),
        None => Cell::Empty,
    });
    cells.push(match row.rate {
        Some(rate) => Cell::Number((rate * 100.0).round() / 100.0),
        None => Cell::Empty,
    });
    cells
}

fn dimension_cell(dimension: &Dimension) -> Cell {
    match dimension {
        Dimension::Year(year) => Cell::Integer((*year).into()),
        Dimension::Month(value) | Dimension::Day(value) => Cell::Integer((*value).into()),
        other => Cell::Text(other.to_string()),
    }
}

/// Which population the rates in the document were divided by.
fn rate_denominator(filters: &FilterSet) -> &'static str {
    if filters.sex.is_some() {
        "none: population tables have no sex split, so sex-filtered rows carry no rate"
    } else if filters.month.is_some() {
        "annual population: deaths of the selected month over the whole-year figure"
    } else {
        "annual population of the row's department (national when unset) and age group"
    }
}

fn metadata_sheet(filters: &FilterSet, generated_at: DateTime<Utc>, sections: usize) -> Sheet {
    fn or_all<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "all".to_string(), |v| v.to_string())
    }

    let entries = [
        ("year", or_all(filters.year)),
        ("month", or_all(filters.month)),
        ("department", or_all(filters.department.as_deref())),
        ("sex", or_all(filters.sex)),
        ("rate_basis", "deaths per 100000 inhabitants".to_string()),
        ("rate_denominator", rate_denominator(filters).to_string()),
        (
            "population_note",
            "single reference year applied to every death year; rates are estimates".to_string(),
        ),
        ("sections", sections.to_string()),
        ("generated_at", generated_at.to_rfc3339()),
    ];

    Sheet {
        name: METADATA_SHEET.to_string(),
        headers: vec!["key".to_string(), "value".to_string()],
        rows: entries
            .into_iter()
            .map(|(key, value)| vec![Cell::Text(key.to_string()), Cell::Text(value)])
            .collect(),
        note: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgeRange, Sex};

    #[test]
    fn duplicate_sheet_names_get_suffixes() {
        let mut seen = HashMap::new();
        assert_eq!(unique_name(&mut seen, "years"), "years");
        assert_eq!(unique_name(&mut seen, "years"), "years (2)");
        assert_eq!(unique_name(&mut seen, "years"), "years (3)");
    }

    #[test]
    fn rows_render_dimensions_counts_and_missing_rates() {
        let mut row = AggregationRow::new(
            vec![Dimension::AgeBucket(AgeRange::new(95, 120)), Dimension::Sex(Sex::Female)],
            12,
        );
        assert_eq!(
            row_cells(&row),
            vec![
                Cell::Text("95+".into()),
                Cell::Text("F".into()),
                Cell::Integer(12),
                Cell::Empty,
                Cell::Empty,
            ]
        );

        row.population = Some(30_000);
        row.rate = Some(40.0);
        assert_eq!(row_cells(&row)[3..], [Cell::Integer(30_000), Cell::Number(40.0)]);
    }
}
