//! Reference population tables used to turn death counts into rates.
//!
//! The three CSV files (department totals, age-group totals and the full
//! department x age-group cross product) are read once, on first lookup, and
//! kept for the life of the process. The source data covers a single census
//! year that is broadcast to every death year, so rates built on it are
//! estimates rather than exact demographic rates.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{error, info};

use crate::error::{DashboardError, Result};
use crate::models::AgeRange;

/// Rates are expressed per this many inhabitants.
pub const RATE_BASIS: f64 = 100_000.0;

/// Deaths per 100,000 inhabitants, or `None` when the population is zero.
pub fn mortality_rate(deaths: u64, population: u64) -> Option<f64> {
    if population == 0 {
        None
    } else {
        Some(deaths as f64 * RATE_BASIS / population as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopulationPaths {
    pub department: PathBuf,
    pub age: PathBuf,
    pub complete: PathBuf,
}

impl PopulationPaths {
    /// Standard file names inside a data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            department: dir.join("population_dept.csv"),
            age: dir.join("population_age.csv"),
            complete: dir.join("population_complete.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DepartmentYear {
    year: i32,
    department: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AgeYear {
    year: i32,
    ages: AgeRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DepartmentAgeYear {
    year: i32,
    department: String,
    ages: AgeRange,
}

#[derive(Debug, Deserialize)]
struct DepartmentRow {
    #[serde(alias = "annee")]
    year: i32,
    #[serde(alias = "departement")]
    department_code: String,
    population: u64,
}

#[derive(Debug, Deserialize)]
struct AgeRow {
    #[serde(alias = "annee")]
    year: i32,
    age_min: u32,
    age_max: u32,
    population: u64,
}

#[derive(Debug, Deserialize)]
struct CompleteRow {
    #[serde(alias = "annee")]
    year: i32,
    #[serde(alias = "departement")]
    department_code: String,
    age_min: u32,
    age_max: u32,
    population: u64,
}

const YEAR: (&str, &[&str]) = ("year", &["year", "annee"]);
const DEPARTMENT: (&str, &[&str]) = ("department_code", &["department_code", "departement"]);
const AGE_MIN: (&str, &[&str]) = ("age_min", &["age_min"]);
const AGE_MAX: (&str, &[&str]) = ("age_max", &["age_max"]);
const POPULATION: (&str, &[&str]) = ("population", &["population"]);

/// Load failure kept inside the cache so every later lookup reports it again.
#[derive(Debug, Clone)]
struct LoadFault {
    file: PathBuf,
    detail: String,
}

impl LoadFault {
    fn new(file: &Path, detail: impl ToString) -> Self {
        Self {
            file: file.to_path_buf(),
            detail: detail.to_string(),
        }
    }
}

impl From<LoadFault> for DashboardError {
    fn from(fault: LoadFault) -> Self {
        DashboardError::ReferenceDataSchema {
            file: fault.file,
            detail: fault.detail,
        }
    }
}

#[derive(Debug, Default)]
struct PopulationTables {
    national: BTreeMap<i32, u64>,
    by_department: HashMap<DepartmentYear, u64>,
    by_age: HashMap<AgeYear, u64>,
    age_buckets: BTreeSet<AgeRange>,
    by_department_age: HashMap<DepartmentAgeYear, u64>,
    department_age_buckets: BTreeSet<AgeRange>,
    source_years: BTreeSet<i32>,
}

impl PopulationTables {
    fn load(paths: &PopulationPaths) -> std::result::Result<Self, LoadFault> {
        let mut tables = PopulationTables::default();

        for row in read_table::<DepartmentRow>(&paths.department, &[YEAR, DEPARTMENT, POPULATION])? {
            let key = DepartmentYear {
                year: row.year,
                department: normalize_department(&row.department_code),
            };
            if tables.by_department.insert(key.clone(), row.population).is_some() {
                return Err(LoadFault::new(
                    &paths.department,
                    format!("duplicate row for {} in {}", key.department, key.year),
                ));
            }
            *tables.national.entry(row.year).or_default() += row.population;
            tables.source_years.insert(row.year);
        }

        let mut national_from_ages: BTreeMap<i32, u64> = BTreeMap::new();
        for row in read_table::<AgeRow>(&paths.age, &[YEAR, AGE_MIN, AGE_MAX, POPULATION])? {
            let ages = age_range(&paths.age, row.age_min, row.age_max)?;
            let key = AgeYear {
                year: row.year,
                ages,
            };
            if tables.by_age.insert(key, row.population).is_some() {
                return Err(LoadFault::new(
                    &paths.age,
                    format!("duplicate row for ages {} in {}", ages.label(), row.year),
                ));
            }
            *national_from_ages.entry(row.year).or_default() += row.population;
            tables.age_buckets.insert(ages);
            tables.source_years.insert(row.year);
        }
        // Department totals win; age totals only fill years they do not cover.
        for (year, total) in national_from_ages {
            tables.national.entry(year).or_insert(total);
        }

        for row in read_table::<CompleteRow>(
            &paths.complete,
            &[YEAR, DEPARTMENT, AGE_MIN, AGE_MAX, POPULATION],
        )? {
            let ages = age_range(&paths.complete, row.age_min, row.age_max)?;
            let key = DepartmentAgeYear {
                year: row.year,
                department: normalize_department(&row.department_code),
                ages,
            };
            if tables.by_department_age.insert(key, row.population).is_some() {
                return Err(LoadFault::new(
                    &paths.complete,
                    format!(
                        "duplicate row for {} ages {} in {}",
                        row.department_code,
                        ages.label(),
                        row.year
                    ),
                ));
            }
            tables.department_age_buckets.insert(ages);
            tables.source_years.insert(row.year);
        }

        Ok(tables)
    }

    /// Exact source year when present, otherwise the most recent one.
    fn resolve_year(&self, year: i32) -> i32 {
        if self.source_years.contains(&year) {
            year
        } else {
            self.source_years.last().copied().unwrap_or(year)
        }
    }
}

fn normalize_department(raw: &str) -> String {
    let code = raw.trim().to_ascii_uppercase();
    if code.len() == 1 && code.bytes().all(|b| b.is_ascii_digit()) {
        format!("0{code}")
    } else {
        code
    }
}

fn age_range(file: &Path, age_min: u32, age_max: u32) -> std::result::Result<AgeRange, LoadFault> {
    if age_max < age_min {
        return Err(LoadFault::new(
            file,
            format!("age_max {age_max} is below age_min {age_min}"),
        ));
    }
    Ok(AgeRange::new(age_min, age_max))
}

/// Read a CSV table after checking its header carries every required column.
fn read_table<T: DeserializeOwned>(
    path: &Path,
    columns: &[(&str, &[&str])],
) -> std::result::Result<Vec<T>, LoadFault> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|err| LoadFault::new(path, err))?;

    let headers = reader
        .headers()
        .map_err(|err| LoadFault::new(path, err))?
        .clone();
    for (column, accepted) in columns {
        if !headers.iter().any(|header| accepted.contains(&header)) {
            return Err(LoadFault::new(path, format!("missing column `{column}`")));
        }
    }

    reader
        .deserialize()
        .collect::<std::result::Result<Vec<T>, _>>()
        .map_err(|err| LoadFault::new(path, err))
}

/// Process-lifetime cache of the population tables. Loading happens once, on
/// first use; a failed load is remembered and reported on every lookup.
#[derive(Debug)]
pub struct ReferenceDataCache {
    paths: PopulationPaths,
    tables: OnceLock<std::result::Result<PopulationTables, LoadFault>>,
}

impl ReferenceDataCache {
    pub fn new(paths: PopulationPaths) -> Self {
        Self {
            paths,
            tables: OnceLock::new(),
        }
    }

    pub fn paths(&self) -> &PopulationPaths {
        &self.paths
    }

    /// Force the load now, e.g. at startup, so schema errors surface early.
    pub fn preload(&self) -> Result<()> {
        self.tables().map(|_| ())
    }

    /// Population for `year`, optionally narrowed to a department and/or a
    /// predefined age bucket. Unknown (year, department) pairs count as zero;
    /// an age range that is not one of the table's buckets is rejected.
    pub fn get_population(
        &self,
        year: i32,
        department: Option<&str>,
        ages: Option<AgeRange>,
    ) -> Result<u64> {
        let tables = self.tables()?;
        let year = tables.resolve_year(year);

        let population = match (department, ages) {
            (None, None) => tables.national.get(&year).copied(),
            (Some(department), None) => tables
                .by_department
                .get(&DepartmentYear {
                    year,
                    department: department.to_string(),
                })
                .copied(),
            (None, Some(ages)) => {
                ensure_bucket(&tables.age_buckets, ages)?;
                tables.by_age.get(&AgeYear { year, ages }).copied()
            }
            (Some(department), Some(ages)) => {
                ensure_bucket(&tables.department_age_buckets, ages)?;
                tables
                    .by_department_age
                    .get(&DepartmentAgeYear {
                        year,
                        department: department.to_string(),
                        ages,
                    })
                    .copied()
            }
        };

        Ok(population.unwrap_or(0))
    }

    /// Predefined age buckets of the national age table, youngest first.
    pub fn age_buckets(&self) -> Result<Vec<AgeRange>> {
        Ok(self.tables()?.age_buckets.iter().copied().collect())
    }

    pub fn source_years(&self) -> Result<Vec<i32>> {
        Ok(self.tables()?.source_years.iter().copied().collect())
    }

    fn tables(&self) -> Result<&PopulationTables> {
        self.tables
            .get_or_init(|| {
                let loaded = PopulationTables::load(&self.paths);
                match &loaded {
                    Ok(tables) => info!(
                        departments = tables.by_department.len(),
                        age_groups = tables.by_age.len(),
                        cross_product = tables.by_department_age.len(),
                        "population reference data loaded"
                    ),
                    Err(fault) => error!(
                        file = %fault.file.display(),
                        detail = %fault.detail,
                        "population reference data rejected"
                    ),
                }
                loaded
            })
            .as_ref()
            .map_err(|fault| fault.clone().into())
    }
}

fn ensure_bucket(buckets: &BTreeSet<AgeRange>, ages: AgeRange) -> Result<()> {
    if buckets.contains(&ages) {
        Ok(())
    } else {
        Err(DashboardError::UnsupportedAgeRange {
            age_min: ages.min,
            age_max: ages.max,
        })
    }
}
