//! WHERE / HAVING clause builder.
//!
//! Column positions only ever receive an [`Ident`]; every literal goes to the
//! ordered parameter list.

use crate::error::Result;
use crate::filter::{ColumnFilter, Filter, Literal};
use crate::validation::Ident;

/// A SQL fragment plus the parameters its placeholders bind, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<Literal>,
}

impl SqlFragment {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

/// Build the body of a WHERE clause (without the keyword).
pub fn build_where(filters: &[ColumnFilter]) -> Result<SqlFragment> {
    build_conditions(filters, |column| column.quoted())
}

/// Build the body of a HAVING clause. `expr_for` maps a referenced column or
/// alias onto the expression it stands for.
pub fn build_having<F>(filters: &[ColumnFilter], expr_for: F) -> Result<SqlFragment>
where
    F: Fn(&Ident) -> String,
{
    build_conditions(filters, expr_for)
}

fn build_conditions<F>(filters: &[ColumnFilter], expr_for: F) -> Result<SqlFragment>
where
    F: Fn(&Ident) -> String,
{
    let mut parts = Vec::new();
    let mut params = Vec::new();

    for filter in filters {
        // Re-validated here as well as at parse time.
        let column = Ident::column(filter.column.as_str())?;
        let target = expr_for(&column);

        for condition in &filter.conditions {
            let sql = match condition {
                Filter::Scalar(value) => {
                    params.push(value.clone());
                    format!("{} = ?", target)
                }
                Filter::IsNull => format!("{} IS NULL", target),
                Filter::InSet(values) => {
                    params.extend(values.iter().cloned());
                    format!("{} IN ({})", target, placeholders(values.len()))
                }
                Filter::Between(low, high) => {
                    params.push(low.clone());
                    params.push(high.clone());
                    format!("{} BETWEEN ? AND ?", target)
                }
                Filter::Compare(op, value) => {
                    params.push(value.clone());
                    format!("{} {} ?", target, op.sql())
                }
                Filter::Contains(text) => {
                    params.push(Literal::Text(format!("%{}%", text)));
                    format!("CAST({} AS VARCHAR) LIKE ?", target)
                }
            };
            parts.push(sql);
        }
    }

    Ok(SqlFragment {
        sql: parts.join(" AND "),
        params,
    })
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse_filters;
    use serde_json::json;

    fn filters(value: serde_json::Value) -> Vec<ColumnFilter> {
        parse_filters(value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_operator_shapes() {
        let fragment = build_where(&filters(json!({
            "country_name": "Germany",
            "sector": {"in": ["power", "transport", "waste"]},
            "year": {"between": [2015, 2020]},
            "emissions_tonnes": {"gt": 5},
            "city_name": {"contains": "burg"}
        })))
        .unwrap();

        assert_eq!(
            fragment.sql,
            "\"country_name\" = ? AND \"sector\" IN (?, ?, ?) AND \"year\" BETWEEN ? AND ? \
             AND \"emissions_tonnes\" > ? AND CAST(\"city_name\" AS VARCHAR) LIKE ?"
        );
        assert_eq!(fragment.params.len(), 8);
        assert_eq!(fragment.params[7], Literal::Text("%burg%".into()));
    }

    #[test]
    fn test_placeholder_count_matches_params() {
        let fragment = build_where(&filters(json!({
            "a": {"in": [1, 2, 3, 4]},
            "b": {"gte": 1, "lte": 9},
            "c": null
        })))
        .unwrap();
        assert_eq!(fragment.sql.matches('?').count(), fragment.params.len());
        assert!(fragment.sql.contains("\"c\" IS NULL"));
    }

    #[test]
    fn test_empty_filters() {
        assert!(build_where(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_having_uses_expression_mapping() {
        let fragment = build_having(&filters(json!({"emissions_tonnes_sum": {"gte": 100}})), |c| {
            format!("SUM({})", c.quoted())
        })
        .unwrap();
        assert_eq!(fragment.sql, "SUM(\"emissions_tonnes_sum\") >= ?");
    }
}
