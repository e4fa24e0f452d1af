//! Aggregation builder.
//!
//! Turns `{column: function}` into aliased aggregate expressions and remaps
//! later `order_by`/`having` references from the source column onto the
//! generated alias.

use crate::error::{QueryError, Result};
use crate::filter::ColumnFilter;
use crate::request::OrderKey;
use crate::validation::Ident;
use itertools::Itertools;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Avg,
    Count,
    Distinct,
    Min,
    Max,
    Std,
    Variance,
}

pub const ALLOWED_FUNCTIONS: [&str; 10] = [
    "sum", "avg", "mean", "count", "distinct", "min", "max", "std", "stddev", "variance",
];

impl AggFunc {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "sum" => Ok(AggFunc::Sum),
            "avg" | "mean" => Ok(AggFunc::Avg),
            "count" => Ok(AggFunc::Count),
            "distinct" => Ok(AggFunc::Distinct),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            "std" | "stddev" => Ok(AggFunc::Std),
            "variance" => Ok(AggFunc::Variance),
            other => Err(QueryError::validation_with_hint(
                format!("Unknown aggregation function '{}'", other),
                format!("Allowed functions: {}", ALLOWED_FUNCTIONS.join(", ")),
            )),
        }
    }

    /// Alias suffix: the output column is `<col>_<suffix>`.
    pub fn suffix(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Count => "count",
            AggFunc::Distinct => "distinct",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Std => "std",
            AggFunc::Variance => "variance",
        }
    }

    fn apply(&self, column: &Ident) -> String {
        let c = column.quoted();
        match self {
            AggFunc::Sum => format!("SUM({})", c),
            AggFunc::Avg => format!("AVG({})", c),
            AggFunc::Count => format!("COUNT({})", c),
            AggFunc::Distinct => format!("COUNT(DISTINCT {})", c),
            AggFunc::Min => format!("MIN({})", c),
            AggFunc::Max => format!("MAX({})", c),
            AggFunc::Std => format!("STDDEV_SAMP({})", c),
            AggFunc::Variance => format!("VAR_SAMP({})", c),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub source: Ident,
    pub func: AggFunc,
    pub alias: Ident,
}

impl AggregateExpr {
    pub fn expression(&self) -> String {
        self.func.apply(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationPlan {
    /// Non-aggregated select and group-by columns, de-duplicated, in order.
    pub plain_columns: Vec<Ident>,
    pub aggregates: Vec<AggregateExpr>,
    group_by: Vec<Ident>,
}

/// Build the projection for an aggregated query.
pub fn build_aggregation(
    aggregations: &[(Ident, AggFunc)],
    select: &[Ident],
    group_by: &[Ident],
) -> Result<AggregationPlan> {
    let aggregates = aggregations
        .iter()
        .map(|(source, func)| {
            Ok(AggregateExpr {
                source: source.clone(),
                func: *func,
                alias: source.with_suffix(func.suffix())?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let is_aggregated = |c: &Ident| aggregations.iter().any(|(source, _)| source == c);

    let ungrouped: Vec<&Ident> = select
        .iter()
        .filter(|c| !is_aggregated(c) && !group_by.contains(c))
        .collect();
    if !ungrouped.is_empty() {
        return Err(QueryError::validation_with_hint(
            format!(
                "Columns must be aggregated or listed in group_by: {}",
                ungrouped.iter().join(", ")
            ),
            "Add them to group_by or give them an aggregation function",
        ));
    }

    let plain_columns = select
        .iter()
        .filter(|c| !is_aggregated(c))
        .chain(group_by.iter())
        .unique()
        .cloned()
        .collect();

    Ok(AggregationPlan {
        plain_columns,
        aggregates,
        group_by: group_by.to_vec(),
    })
}

impl AggregationPlan {
    /// SELECT-list items in output order.
    pub fn projection(&self) -> Vec<String> {
        self.plain_columns
            .iter()
            .map(Ident::quoted)
            .chain(
                self.aggregates
                    .iter()
                    .map(|a| format!("{} AS {}", a.expression(), a.alias.quoted())),
            )
            .collect()
    }

    pub fn output_columns(&self) -> Vec<Ident> {
        self.plain_columns
            .iter()
            .cloned()
            .chain(self.aggregates.iter().map(|a| a.alias.clone()))
            .collect()
    }

    /// Map a reference to an aggregated source column onto its alias.
    /// Group-by columns keep their own name.
    pub fn remap(&self, column: &Ident) -> Ident {
        if self.group_by.contains(column) {
            return column.clone();
        }
        self.aggregates
            .iter()
            .find(|a| &a.source == column)
            .map(|a| a.alias.clone())
            .unwrap_or_else(|| column.clone())
    }

    /// Expression an output name stands for, for use in HAVING.
    pub fn expression_for(&self, column: &Ident) -> String {
        self.aggregates
            .iter()
            .find(|a| &a.alias == column)
            .map(AggregateExpr::expression)
            .unwrap_or_else(|| column.quoted())
    }

    pub fn remap_order_by(&self, order_by: &[OrderKey]) -> Vec<OrderKey> {
        order_by
            .iter()
            .map(|k| OrderKey {
                column: self.remap(&k.column),
                descending: k.descending,
            })
            .collect()
    }

    /// Remap HAVING references and enforce that each one names a group-by
    /// column or an aggregate alias.
    pub fn remap_having(&self, having: &[ColumnFilter]) -> Result<Vec<ColumnFilter>> {
        let aliases: Vec<&Ident> = self.aggregates.iter().map(|a| &a.alias).collect();
        having
            .iter()
            .map(|f| {
                let column = self.remap(&f.column);
                if !self.group_by.contains(&column) && !aliases.contains(&&column) {
                    return Err(QueryError::validation_with_hint(
                        format!("having references '{}', which is neither grouped nor aggregated", f.column),
                        format!(
                            "having may use: {}",
                            self.group_by.iter().chain(aliases.iter().copied()).join(", ")
                        ),
                    ));
                }
                Ok(ColumnFilter {
                    column,
                    conditions: f.conditions.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse_filters;
    use serde_json::json;

    fn ids(names: &[&str]) -> Vec<Ident> {
        names.iter().map(|n| Ident::column(n).unwrap()).collect()
    }

    #[test]
    fn test_function_aliases() {
        assert_eq!(AggFunc::parse("MEAN").unwrap(), AggFunc::Avg);
        assert_eq!(AggFunc::parse("stddev").unwrap(), AggFunc::Std);
        let err = AggFunc::parse("median").unwrap_err();
        match err {
            QueryError::Validation { hint, .. } => assert!(hint.unwrap().contains("variance")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_projection_merges_and_dedupes() {
        let aggs = vec![(Ident::column("emissions_tonnes").unwrap(), AggFunc::Sum)];
        let plan = build_aggregation(
            &aggs,
            &ids(&["country_name", "emissions_tonnes"]),
            &ids(&["country_name", "year", "country_name"]),
        )
        .unwrap();

        assert_eq!(
            plan.projection(),
            vec![
                "\"country_name\"".to_string(),
                "\"year\"".to_string(),
                "SUM(\"emissions_tonnes\") AS \"emissions_tonnes_sum\"".to_string(),
            ]
        );
        assert_eq!(
            plan.output_columns(),
            ids(&["country_name", "year", "emissions_tonnes_sum"])
        );
    }

    #[test]
    fn test_ungrouped_select_rejected() {
        let aggs = vec![(Ident::column("emissions_tonnes").unwrap(), AggFunc::Max)];
        assert!(build_aggregation(&aggs, &ids(&["city_name"]), &ids(&["country_name"])).is_err());
    }

    #[test]
    fn test_remaps_order_and_having() {
        let aggs = vec![(Ident::column("emissions_tonnes").unwrap(), AggFunc::Sum)];
        let plan = build_aggregation(&aggs, &[], &ids(&["country_name"])).unwrap();

        let order = plan.remap_order_by(&[OrderKey {
            column: Ident::column("emissions_tonnes").unwrap(),
            descending: true,
        }]);
        assert_eq!(order[0].column.as_str(), "emissions_tonnes_sum");

        let having = parse_filters(json!({"emissions_tonnes": {"gt": 10}}).as_object().unwrap()).unwrap();
        let remapped = plan.remap_having(&having).unwrap();
        assert_eq!(remapped[0].column.as_str(), "emissions_tonnes_sum");
        assert_eq!(
            plan.expression_for(&remapped[0].column),
            "SUM(\"emissions_tonnes\")"
        );
    }

    #[test]
    fn test_having_on_unknown_column_rejected() {
        let aggs = vec![(Ident::column("emissions_tonnes").unwrap(), AggFunc::Sum)];
        let plan = build_aggregation(&aggs, &[], &ids(&["country_name"])).unwrap();
        let having = parse_filters(json!({"year": 2020}).as_object().unwrap()).unwrap();
        assert!(plan.remap_having(&having).is_err());
    }
}
