//! Request types for the query and year-over-year operations.

use crate::config::QueryLimits;
use crate::error::{QueryError, Result};
use crate::filter::{parse_filters, ColumnFilter};
use crate::sql::aggregate::AggFunc;
use crate::validation::Ident;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// `order_by` accepts `"col"`, `"col DESC"`, `"-col"`, a comma-separated
/// string of those, or a list of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OrderBySpec {
    #[default]
    None,
    One(String),
    Many(Vec<String>),
}

impl OrderBySpec {
    fn terms(&self) -> Vec<&str> {
        match self {
            OrderBySpec::None => Vec::new(),
            OrderBySpec::One(s) => s.split(',').map(str::trim).filter(|t| !t.is_empty()).collect(),
            OrderBySpec::Many(items) => items.iter().map(|s| s.trim()).filter(|t| !t.is_empty()).collect(),
        }
    }

    pub fn parse(&self) -> Result<Vec<OrderTerm>> {
        self.terms().into_iter().map(OrderTerm::parse).collect()
    }
}

/// One raw `order_by` entry before identifier validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub descending: bool,
}

impl OrderTerm {
    fn parse(term: &str) -> Result<Self> {
        let parts: Vec<&str> = term.split_whitespace().collect();
        let (column, descending) = match parts.as_slice() {
            [col] => match col.strip_prefix('-') {
                Some(rest) => (rest, true),
                None => (*col, false),
            },
            [col, dir] if dir.eq_ignore_ascii_case("desc") => (*col, true),
            [col, dir] if dir.eq_ignore_ascii_case("asc") => (*col, false),
            _ => {
                return Err(QueryError::validation_with_hint(
                    format!("Invalid order_by term '{}'", term),
                    "Use 'column', 'column ASC', 'column DESC' or '-column'",
                ))
            }
        };
        Ok(Self {
            column: column.to_string(),
            descending,
        })
    }
}

/// `POST /query` body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    pub file_id: String,
    #[serde(default)]
    pub select: Vec<String>,
    #[serde(default, rename = "where")]
    pub filters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: OrderBySpec,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub aggregations: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub having: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    pub column: Ident,
    pub descending: bool,
}

/// A request that passed every pre-SQL check.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    pub select: Vec<Ident>,
    pub filters: Vec<ColumnFilter>,
    pub group_by: Vec<Ident>,
    pub order_by: Vec<OrderKey>,
    pub limit: u64,
    pub offset: u64,
    pub aggregations: Vec<(Ident, AggFunc)>,
    pub having: Vec<ColumnFilter>,
}

impl QueryRequest {
    /// Run the complexity guard, then parse every part into validated form.
    pub fn parse(&self, limits: &QueryLimits) -> Result<ParsedQuery> {
        let order_terms = self.order_by.parse()?;
        let offset = self.offset.unwrap_or(0);
        if offset > i64::MAX as u64 {
            return Err(QueryError::validation_with_hint(
                format!("offset {} is out of range", offset),
                format!("offset must be at most {}", i64::MAX),
            ));
        }

        let filter_keys: Vec<String> = self.filters.keys().cloned().collect();
        let extra_refs: Vec<String> = order_terms
            .iter()
            .map(|t| t.column.clone())
            .chain(self.aggregations.keys().cloned())
            .chain(self.having.keys().cloned())
            .collect();
        limits
            .complexity
            .validate(&self.select, &filter_keys, &self.group_by, &extra_refs)?;

        let select = unique_idents(&self.select)?;
        let group_by = unique_idents(&self.group_by)?;
        let filters = parse_filters(&self.filters)?;
        let having = parse_filters(&self.having)?;

        let aggregations = self
            .aggregations
            .iter()
            .map(|(column, func)| {
                let func = func.as_str().ok_or_else(|| {
                    QueryError::validation(format!(
                        "Aggregation for '{}' must be a function name string",
                        column
                    ))
                })?;
                Ok((Ident::column(column)?, AggFunc::parse(func)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let order_by = order_terms
            .into_iter()
            .map(|t| {
                Ok(OrderKey {
                    column: Ident::column(&t.column)?,
                    descending: t.descending,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ParsedQuery {
            select,
            filters,
            group_by,
            order_by,
            limit: limits.effective_limit(self.limit),
            offset,
            aggregations,
            having,
        })
    }
}

/// Ranking direction for year-over-year deltas.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Largest decrease first (`delta = base - compare` descending).
    #[default]
    Drop,
    /// Largest increase first.
    Rise,
}

fn default_year_col() -> String {
    "year".to_string()
}

/// `POST /metrics/yoy` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YoyRequest {
    pub file_id: String,
    #[serde(default, rename = "where")]
    pub filters: serde_json::Map<String, serde_json::Value>,
    pub key_col: String,
    pub value_col: String,
    #[serde(default = "default_year_col")]
    pub year_col: String,
    pub base_year: i64,
    pub compare_year: i64,
    #[serde(default)]
    pub top_n: Option<u64>,
    #[serde(default)]
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedYoy {
    pub key_col: Ident,
    pub value_col: Ident,
    pub year_col: Ident,
    pub base_year: i64,
    pub compare_year: i64,
    pub filters: Vec<ColumnFilter>,
    pub top_n: u64,
    pub direction: Direction,
}

pub const DEFAULT_TOP_N: u64 = 10;

impl YoyRequest {
    pub fn parse(&self, limits: &QueryLimits) -> Result<ParsedYoy> {
        let filter_keys: Vec<String> = self.filters.keys().cloned().collect();
        let columns = vec![self.key_col.clone(), self.value_col.clone(), self.year_col.clone()];
        limits.complexity.validate(&columns, &filter_keys, &[], &[])?;

        if self.base_year == self.compare_year {
            return Err(QueryError::validation(
                "base_year and compare_year must differ",
            ));
        }

        Ok(ParsedYoy {
            key_col: Ident::column(&self.key_col)?,
            value_col: Ident::column(&self.value_col)?,
            year_col: Ident::column(&self.year_col)?,
            base_year: self.base_year,
            compare_year: self.compare_year,
            filters: parse_filters(&self.filters)?,
            top_n: self.top_n.unwrap_or(DEFAULT_TOP_N).clamp(1, limits.max_limit),
            direction: self.direction,
        })
    }
}

fn unique_idents(names: &[String]) -> Result<Vec<Ident>> {
    names.iter().unique().map(|n| Ident::column(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    #[test]
    fn test_order_by_forms() {
        let spec: OrderBySpec = serde_json::from_value(json!("emissions_tonnes DESC, year")).unwrap();
        let terms = spec.parse().unwrap();
        assert_eq!(terms.len(), 2);
        assert!(terms[0].descending);
        assert!(!terms[1].descending);

        let spec: OrderBySpec = serde_json::from_value(json!(["-year"])).unwrap();
        assert!(spec.parse().unwrap()[0].descending);

        let spec: OrderBySpec = serde_json::from_value(json!("year sideways")).unwrap();
        assert!(spec.parse().is_err());
    }

    #[test]
    fn test_parse_query_request() {
        let request: QueryRequest = serde_json::from_value(json!({
            "file_id": "power-country-year",
            "select": ["country_name", "year", "country_name"],
            "where": {"year": {"gte": 2015}},
            "group_by": ["country_name"],
            "aggregations": {"emissions_tonnes": "sum"},
            "order_by": "emissions_tonnes desc",
            "limit": 50000
        }))
        .unwrap();

        let parsed = request.parse(&QueryLimits::default()).unwrap();
        assert_eq!(parsed.select.len(), 2);
        assert_eq!(parsed.limit, 10_000);
        assert_eq!(parsed.offset, 0);
        assert_eq!(parsed.aggregations[0].1, AggFunc::Sum);
        assert!(parsed.order_by[0].descending);
    }

    #[test]
    fn test_parse_rejects_out_of_range_offset() {
        let request: QueryRequest = serde_json::from_value(json!({
            "file_id": "power-country-year",
            "offset": u64::MAX
        }))
        .unwrap();
        let err = request.parse(&QueryLimits::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let request: QueryRequest = serde_json::from_value(json!({
            "file_id": "power-country-year",
            "limit": u64::MAX,
            "offset": i64::MAX
        }))
        .unwrap();
        let parsed = request.parse(&QueryLimits::default()).unwrap();
        assert_eq!(parsed.limit, 10_000);
        assert_eq!(parsed.offset, i64::MAX as u64);
    }

    #[test]
    fn test_parse_rejects_bad_aggregation() {
        let request: QueryRequest = serde_json::from_value(json!({
            "file_id": "power-country-year",
            "aggregations": {"emissions_tonnes": "median"}
        }))
        .unwrap();
        assert!(request.parse(&QueryLimits::default()).is_err());
    }

    #[test]
    fn test_parse_yoy_defaults() {
        let request: YoyRequest = serde_json::from_value(json!({
            "file_id": "power-country-year",
            "key_col": "country_name",
            "value_col": "emissions_tonnes",
            "base_year": 2019,
            "compare_year": 2020
        }))
        .unwrap();
        let parsed = request.parse(&QueryLimits::default()).unwrap();
        assert_eq!(parsed.top_n, DEFAULT_TOP_N);
        assert_eq!(parsed.direction, Direction::Drop);
        assert_eq!(parsed.year_col.as_str(), "year");
    }

    #[test]
    fn test_parse_yoy_same_year_rejected() {
        let request: YoyRequest = serde_json::from_value(json!({
            "file_id": "power-country-year",
            "key_col": "country_name",
            "value_col": "emissions_tonnes",
            "base_year": 2020,
            "compare_year": 2020
        }))
        .unwrap();
        assert!(request.parse(&QueryLimits::default()).is_err());
    }
}
