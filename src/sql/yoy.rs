//! Year-over-year statement.
//!
//! A two-year pivot-join: aggregate the value per `(key, year)` for the two
//! years, pair base-year rows with compare-year rows on the key, then rank by
//! `delta = base - compare`. It does not fit the generic SELECT template, so
//! it is built here on its own.

use crate::error::Result;
use crate::filter::Literal;
use crate::request::{Direction, ParsedYoy};
use crate::sql::clause::build_where;
use crate::sql::statement::{table_ref, Statement};
use crate::validation::Ident;

/// Output columns, in order.
pub const YOY_COLUMNS: [&str; 5] = ["key", "base", "compare", "delta", "pct"];

pub fn build_yoy(table: &Ident, request: &ParsedYoy) -> Result<Statement> {
    let where_fragment = build_where(&request.filters)?;
    let mut params = where_fragment.params;

    let year = request.year_col.quoted();
    let mut predicates = Vec::new();
    if !where_fragment.sql.is_empty() {
        predicates.push(where_fragment.sql);
    }
    predicates.push(format!("{} IN (?, ?)", year));
    params.push(Literal::Integer(request.base_year));
    params.push(Literal::Integer(request.compare_year));

    let order = match request.direction {
        Direction::Drop => "DESC",
        Direction::Rise => "ASC",
    };

    let sql = format!(
        "WITH yearly AS (\
           SELECT {key} AS entity_key, {year} AS period, SUM({value}) AS amount \
           FROM {table} WHERE {predicates} GROUP BY {key}, {year}\
         ) \
         SELECT b.entity_key AS \"key\", b.amount AS \"base\", c.amount AS \"compare\", \
           b.amount - c.amount AS \"delta\", \
           CAST(b.amount - c.amount AS DOUBLE) / NULLIF(b.amount, 0) * 100 AS \"pct\" \
         FROM yearly b JOIN yearly c ON b.entity_key = c.entity_key \
         WHERE b.period = ? AND c.period = ? \
         ORDER BY \"delta\" {order} NULLS LAST, \"key\" ASC \
         LIMIT {limit}",
        key = request.key_col.quoted(),
        value = request.value_col.quoted(),
        year = year,
        table = table_ref(table),
        predicates = predicates.join(" AND "),
        order = order,
        limit = request.top_n,
    );
    params.push(Literal::Integer(request.base_year));
    params.push(Literal::Integer(request.compare_year));

    Statement::verified(sql, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryLimits;
    use crate::request::YoyRequest;
    use serde_json::json;

    fn parsed(direction: &str) -> ParsedYoy {
        serde_json::from_value::<YoyRequest>(json!({
            "file_id": "power-country-year",
            "where": {"sector": "power"},
            "key_col": "country_name",
            "value_col": "emissions_tonnes",
            "base_year": 2019,
            "compare_year": 2020,
            "top_n": 5,
            "direction": direction
        }))
        .unwrap()
        .parse(&QueryLimits::default())
        .unwrap()
    }

    #[test]
    fn test_params_follow_placeholder_order() {
        let stmt = build_yoy(&Ident::table("emissions").unwrap(), &parsed("drop")).unwrap();
        assert_eq!(
            stmt.params,
            vec![
                Literal::Text("power".into()),
                Literal::Integer(2019),
                Literal::Integer(2020),
                Literal::Integer(2019),
                Literal::Integer(2020),
            ]
        );
        assert!(stmt.sql.contains("ORDER BY \"delta\" DESC"));
        assert!(stmt.sql.ends_with("LIMIT 5"));
    }

    #[test]
    fn test_rise_orders_ascending() {
        let stmt = build_yoy(&Ident::table("emissions").unwrap(), &parsed("rise")).unwrap();
        assert!(stmt.sql.contains("ORDER BY \"delta\" ASC"));
    }
}
