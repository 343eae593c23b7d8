use rusqlite::types::Value;
use rusqlite::ParamsFromIter;

use crate::models::FilterSet;

/// Columns a record must carry to take part in any aggregation. Rows missing
/// one of them are excluded here, once, for every query.
const REQUIRED_COLUMNS: &[&str] = &["death_year", "death_month", "department_code"];

/// WHERE clause plus positional parameters shared by every aggregation.
#[derive(Debug, Clone)]
pub(crate) struct SqlFilter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl SqlFilter {
    pub(crate) fn from_filters(filters: &FilterSet) -> Self {
        let mut filter = Self {
            clauses: REQUIRED_COLUMNS
                .iter()
                .map(|column| format!("{column} IS NOT NULL"))
                .collect(),
            params: Vec::new(),
        };

        if let Some(year) = filters.year {
            filter.push("death_year = ?", Value::Integer(year.into()));
        }
        if let Some(month) = filters.month {
            filter.push("death_month = ?", Value::Integer(month.into()));
        }
        if let Some(department) = &filters.department {
            filter.push("department_code = ?", Value::Text(department.clone()));
        }
        if let Some(sex) = filters.sex {
            filter.push("sex = ?", Value::Integer(sex.code()));
        }
        filter
    }

    /// Age-based breakdowns only see records whose age could be derived.
    pub(crate) fn require_age(mut self) -> Self {
        self.clauses.push("age_at_death IS NOT NULL".to_string());
        self
    }

    pub(crate) fn require_day(mut self) -> Self {
        self.clauses.push("death_day IS NOT NULL".to_string());
        self
    }

    pub(crate) fn require_known_sex(mut self) -> Self {
        self.clauses.push("sex IN (1, 2)".to_string());
        self
    }

    pub(crate) fn years_in(mut self, years: &[i32]) -> Self {
        let placeholders = vec!["?"; years.len()].join(", ");
        self.clauses.push(format!("death_year IN ({placeholders})"));
        self.params
            .extend(years.iter().map(|year| Value::Integer((*year).into())));
        self
    }

    pub(crate) fn where_clause(&self) -> String {
        format!("WHERE {}", self.clauses.join(" AND "))
    }

    pub(crate) fn params(&self) -> ParamsFromIter<std::slice::Iter<'_, Value>> {
        rusqlite::params_from_iter(self.params.iter())
    }

    fn push(&mut self, clause: &str, value: Value) {
        self.clauses.push(clause.to_string());
        self.params.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sex;

    #[test]
    fn unset_filters_only_require_mandatory_columns() {
        let filter = SqlFilter::from_filters(&FilterSet::new());
        assert_eq!(
            filter.where_clause(),
            "WHERE death_year IS NOT NULL AND death_month IS NOT NULL AND department_code IS NOT NULL"
        );
        assert!(filter.params.is_empty());
    }

    #[test]
    fn set_filters_add_bound_parameters_in_order() {
        let filters = FilterSet::new()
            .with_year(2024)
            .with_department("2A")
            .with_sex(Sex::Female);
        let filter = SqlFilter::from_filters(&filters).years_in(&[2023, 2024]);

        assert!(filter.where_clause().ends_with(
            "death_year = ? AND department_code = ? AND sex = ? AND death_year IN (?, ?)"
        ));
        assert_eq!(
            filter.params,
            vec![
                Value::Integer(2024),
                Value::Text("2A".into()),
                Value::Integer(2),
                Value::Integer(2023),
                Value::Integer(2024),
            ]
        );
    }
}
