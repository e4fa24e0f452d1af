//! SQL construction: clause builders, aggregation, statement assembly and
//! the year-over-year statement.

pub mod aggregate;
pub mod clause;
pub mod statement;
pub mod yoy;

pub use clause::{build_having, build_where, SqlFragment};
pub use statement::{build_distinct, build_select, Statement};
pub use yoy::build_yoy;
