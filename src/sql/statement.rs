//! Statement assembly
//!
//! Clauses are assembled in the fixed order
//! `SELECT … FROM … WHERE … GROUP BY … HAVING … ORDER BY … LIMIT … OFFSET`.
//! The finished text is checked to be exactly one `SELECT` with one
//! placeholder per bound parameter before it is handed to an engine.

use crate::error::{QueryError, Result};
use crate::filter::Literal;
use crate::request::{OrderKey, ParsedQuery};
use crate::sql::aggregate::build_aggregation;
use crate::sql::clause::{build_having, build_where};
use crate::validation::Ident;
use serde::Serialize;
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use tracing::debug;

/// A parameterized statement ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Literal>,
}

impl Statement {
    /// Fail closed unless the text is a single query whose placeholder count
    /// equals the parameter count.
    pub fn verified(sql: String, params: Vec<Literal>) -> Result<Self> {
        let placeholders = sql.matches('?').count();
        if placeholders != params.len() {
            return Err(QueryError::Execution(format!(
                "Statement has {} placeholders but {} parameters",
                placeholders,
                params.len()
            )));
        }

        let parsed = Parser::parse_sql(&DuckDbDialect {}, &sql)
            .map_err(|e| QueryError::Execution(format!("Generated SQL failed to parse: {}", e)))?;
        match parsed.as_slice() {
            [sqlparser::ast::Statement::Query(_)] => {}
            _ => {
                return Err(QueryError::Execution(format!(
                    "Generated SQL must be exactly one SELECT, got {} statement(s)",
                    parsed.len()
                )))
            }
        }

        debug!(sql = %sql, params = params.len(), "Built statement");
        Ok(Self { sql, params })
    }
}

/// Physical table reference. Dotted names are quoted per segment
/// (`main.emissions` → `"main"."emissions"`).
pub fn table_ref(table: &Ident) -> String {
    table
        .as_str()
        .split('.')
        .map(|part| format!("\"{}\"", part))
        .collect::<Vec<_>>()
        .join(".")
}

/// Build the pushdown statement for a parsed request.
pub fn build_select(table: &Ident, query: &ParsedQuery) -> Result<Statement> {
    let where_fragment = build_where(&query.filters)?;
    let mut params = where_fragment.params;

    let (projection, group_by, having, order_by) = if query.aggregations.is_empty() {
        if !query.having.is_empty() {
            return Err(QueryError::validation_with_hint(
                "having requires at least one aggregation",
                "Use where for row-level filters",
            ));
        }
        let projection = if query.select.is_empty() {
            "*".to_string()
        } else {
            query.select.iter().map(Ident::quoted).collect::<Vec<_>>().join(", ")
        };
        (projection, query.group_by.clone(), None, query.order_by.clone())
    } else {
        let plan = build_aggregation(&query.aggregations, &query.select, &query.group_by)?;
        let having = plan.remap_having(&query.having)?;
        let having_fragment = build_having(&having, |c| plan.expression_for(c))?;
        (
            plan.projection().join(", "),
            query.group_by.clone(),
            Some(having_fragment),
            plan.remap_order_by(&query.order_by),
        )
    };

    let mut sql = format!("SELECT {} FROM {}", projection, table_ref(table));
    if !where_fragment.sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_fragment.sql);
    }
    if !group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&group_by.iter().map(Ident::quoted).collect::<Vec<_>>().join(", "));
    }
    if let Some(having) = having.filter(|h| !h.is_empty()) {
        sql.push_str(" HAVING ");
        sql.push_str(&having.sql);
        params.extend(having.params);
    }
    if !order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_clause(&order_by));
    }
    sql.push_str(&format!(" LIMIT {}", query.limit));
    if query.offset > 0 {
        sql.push_str(&format!(" OFFSET {}", query.offset));
    }

    Statement::verified(sql, params)
}

/// `SELECT DISTINCT "col" FROM table WHERE "col" IS NOT NULL ORDER BY "col"`.
pub fn build_distinct(table: &Ident, column: &Ident) -> Result<Statement> {
    let c = column.quoted();
    Statement::verified(
        format!(
            "SELECT DISTINCT {c} FROM {} WHERE {c} IS NOT NULL ORDER BY {c}",
            table_ref(table)
        ),
        Vec::new(),
    )
}

fn order_clause(order_by: &[OrderKey]) -> String {
    order_by
        .iter()
        .map(|k| {
            if k.descending {
                format!("{} DESC", k.column.quoted())
            } else {
                format!("{} ASC", k.column.quoted())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}
