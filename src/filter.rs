//! Filter model
//!
//! The JSON `where`/`having` objects are parsed once, at the API boundary,
//! into a closed set of filter shapes. Builders downstream match on the enum
//! and never sniff JSON shapes again.

use crate::error::{QueryError, Result};
use crate::validation::{validate_filter_value, validate_text_value, Ident};
use serde::Serialize;
use std::fmt;

/// A literal bound through the parameter path; never spliced into SQL text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Literal {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl Literal {
    fn from_json(column: &Ident, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Literal::Text(s.clone())),
            serde_json::Value::Bool(b) => Ok(Literal::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Literal::Integer(i))
                } else {
                    n.as_f64().map(Literal::Float).ok_or_else(|| {
                        QueryError::validation(format!("Unsupported number for '{}': {}", column, n))
                    })
                }
            }
            other => Err(QueryError::validation(format!(
                "Filter on '{}' expects a scalar, got {}",
                column,
                json_kind(other)
            ))),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Literal::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Text(s) => write!(f, "{}", s),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gte,
    Lte,
    Gt,
    Lt,
}

impl CompareOp {
    pub fn sql(&self) -> &'static str {
        match self {
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
        }
    }
}

/// One condition on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Scalar(Literal),
    IsNull,
    InSet(Vec<Literal>),
    Between(Literal, Literal),
    Compare(CompareOp, Literal),
    Contains(String),
}

pub const OPERATOR_KEYS: [&str; 8] = ["eq", "in", "between", "gte", "lte", "gt", "lt", "contains"];

/// All conditions on a column; conditions AND together.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub column: Ident,
    pub conditions: Vec<Filter>,
}

impl ColumnFilter {
    /// Parse one `column: scalar-or-operator` entry.
    pub fn parse(column: &str, value: &serde_json::Value) -> Result<Self> {
        let column = Ident::column(column)?;
        validate_filter_value(value)?;

        let conditions = match value {
            serde_json::Value::Null => vec![Filter::IsNull],
            serde_json::Value::Array(items) => vec![Filter::InSet(parse_list(&column, items)?)],
            serde_json::Value::Object(ops) => {
                if ops.is_empty() {
                    return Err(QueryError::validation(format!(
                        "Empty operator object for '{}'",
                        column
                    )));
                }
                ops.iter()
                    .map(|(op, operand)| {
                        validate_filter_value(operand)?;
                        parse_operator(&column, op, operand)
                    })
                    .collect::<Result<Vec<_>>>()?
            }
            scalar => vec![Filter::Scalar(Literal::from_json(&column, scalar)?)],
        };

        Ok(Self { column, conditions })
    }

    /// Textual values carried by this filter, in order.
    pub fn text_values(&self) -> Vec<&str> {
        self.conditions
            .iter()
            .flat_map(|c| match c {
                Filter::Scalar(l) => l.as_text().into_iter().collect::<Vec<_>>(),
                Filter::InSet(items) => items.iter().filter_map(Literal::as_text).collect(),
                _ => Vec::new(),
            })
            .collect()
    }

    /// Rewrite textual equality/set values, e.g. after entity resolution.
    pub fn map_text_values<F>(&mut self, mut f: F)
    where
        F: FnMut(&str) -> String,
    {
        for condition in &mut self.conditions {
            match condition {
                Filter::Scalar(Literal::Text(s)) => *s = f(s),
                Filter::InSet(items) => {
                    for item in items.iter_mut() {
                        if let Literal::Text(s) = item {
                            *s = f(s);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Parse a whole `where`/`having` object, preserving key order.
pub fn parse_filters(filters: &serde_json::Map<String, serde_json::Value>) -> Result<Vec<ColumnFilter>> {
    filters
        .iter()
        .map(|(column, value)| ColumnFilter::parse(column, value))
        .collect()
}

fn parse_operator(column: &Ident, op: &str, operand: &serde_json::Value) -> Result<Filter> {
    match op.to_lowercase().as_str() {
        "eq" => Ok(Filter::Scalar(Literal::from_json(column, operand)?)),
        "in" => match operand {
            serde_json::Value::Array(items) => Ok(Filter::InSet(parse_list(column, items)?)),
            other => Err(QueryError::validation(format!(
                "'in' on '{}' expects a list, got {}",
                column,
                json_kind(other)
            ))),
        },
        "between" => match operand {
            serde_json::Value::Array(bounds) if bounds.len() == 2 => Ok(Filter::Between(
                Literal::from_json(column, &bounds[0])?,
                Literal::from_json(column, &bounds[1])?,
            )),
            _ => Err(QueryError::validation(format!(
                "'between' on '{}' expects exactly two values [low, high]",
                column
            ))),
        },
        "gte" => Ok(Filter::Compare(CompareOp::Gte, Literal::from_json(column, operand)?)),
        "lte" => Ok(Filter::Compare(CompareOp::Lte, Literal::from_json(column, operand)?)),
        "gt" => Ok(Filter::Compare(CompareOp::Gt, Literal::from_json(column, operand)?)),
        "lt" => Ok(Filter::Compare(CompareOp::Lt, Literal::from_json(column, operand)?)),
        "contains" => match operand {
            serde_json::Value::String(s) => {
                validate_text_value(s)?;
                Ok(Filter::Contains(s.clone()))
            }
            other => Ok(Filter::Contains(Literal::from_json(column, other)?.to_string())),
        },
        _ => Err(QueryError::validation_with_hint(
            format!("Unsupported operator '{}' on '{}'", op, column),
            format!("Allowed operators: {}", OPERATOR_KEYS.join(", ")),
        )),
    }
}

fn parse_list(column: &Ident, items: &[serde_json::Value]) -> Result<Vec<Literal>> {
    if items.is_empty() {
        return Err(QueryError::validation(format!("Empty 'in' list for '{}'", column)));
    }
    items.iter().map(|v| Literal::from_json(column, v)).collect()
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> Result<Vec<ColumnFilter>> {
        parse_filters(value.as_object().unwrap())
    }

    #[test]
    fn test_parse_shapes() {
        let filters = parse(json!({
            "country_name": "Germany",
            "year": {"between": [2015, 2020]},
            "sector": {"in": ["power", "transport"]},
            "emissions_tonnes": {"gte": 10.5, "lt": 1000},
            "city_name": {"contains": "burg"}
        }))
        .unwrap();

        assert_eq!(filters.len(), 5);
        assert_eq!(filters[0].conditions, vec![Filter::Scalar(Literal::Text("Germany".into()))]);
        assert_eq!(
            filters[1].conditions,
            vec![Filter::Between(Literal::Integer(2015), Literal::Integer(2020))]
        );
        assert_eq!(filters[3].conditions.len(), 2);
        assert_eq!(filters[4].conditions, vec![Filter::Contains("burg".into())]);
    }

    #[test]
    fn test_unknown_operator_lists_allowed_set() {
        let err = parse(json!({"year": {"like": "20%"}})).unwrap_err();
        match err {
            QueryError::Validation { hint, .. } => assert!(hint.unwrap().contains("between")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rejects_malformed_operands() {
        assert!(parse(json!({"year": {"between": [2015]}})).is_err());
        assert!(parse(json!({"year": {"in": 2015}})).is_err());
        assert!(parse(json!({"year": {"in": []}})).is_err());
        assert!(parse(json!({"year": {}})).is_err());
        assert!(parse(json!({"year": {"gte": [1, 2]}})).is_err());
        assert!(parse(json!({"bad name": 1})).is_err());
        assert!(parse(json!({"country_name": "x' OR 1=1"})).is_err());
    }

    #[test]
    fn test_bare_list_is_set_membership() {
        let filters = parse(json!({"year": [2019, 2020]})).unwrap();
        assert_eq!(
            filters[0].conditions,
            vec![Filter::InSet(vec![Literal::Integer(2019), Literal::Integer(2020)])]
        );
    }

    #[test]
    fn test_map_text_values() {
        let mut filters = parse(json!({"country_name": {"in": ["USA", "UK", 3]}})).unwrap();
        filters[0].map_text_values(|s| s.to_lowercase());
        assert_eq!(filters[0].text_values(), vec!["usa", "uk"]);
    }
}
