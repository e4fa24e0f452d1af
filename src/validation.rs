//! Identifier & value validation, plus the query complexity guard.
//!
//! Nothing reaches SQL text unless it has been turned into an [`Ident`] here.

use crate::error::{QueryError, Result};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

pub const MAX_COLUMN_LEN: usize = 100;
pub const MAX_FILE_ID_LEN: usize = 200;
pub const MAX_STRING_VALUE_LEN: usize = 500;
pub const MAX_LIST_ITEMS: usize = 100;

lazy_static! {
    static ref IDENT_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap();
    static ref RESERVED_KEYWORDS: HashSet<&'static str> = [
        "select", "from", "where", "insert", "update", "delete", "drop", "create", "alter",
        "exec", "execute", "union",
    ]
    .into_iter()
    .collect();
}

const FORBIDDEN_VALUE_CHARS: [char; 4] = [';', '\'', '"', '\\'];

/// What an identifier names; decides the length ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentKind {
    Column,
    Table,
    FileId,
}

impl IdentKind {
    fn max_len(&self) -> usize {
        match self {
            IdentKind::Column | IdentKind::Table => MAX_COLUMN_LEN,
            IdentKind::FileId => MAX_FILE_ID_LEN,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            IdentKind::Column => "column",
            IdentKind::Table => "table",
            IdentKind::FileId => "file_id",
        }
    }
}

/// A name that passed [`validate_identifier`].
///
/// The SQL builders only accept `Ident` in table and column positions, so an
/// unvalidated string cannot end up in statement text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ident(String);

impl Ident {
    pub fn column(name: &str) -> Result<Self> {
        validate_identifier(name, IdentKind::Column)
    }

    pub fn table(name: &str) -> Result<Self> {
        validate_identifier(name, IdentKind::Table)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL text. Safe because `"` never passes validation.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Derived alias such as `emissions_tonnes_sum`; re-validated so the
    /// suffix cannot smuggle anything in.
    pub fn with_suffix(&self, suffix: &str) -> Result<Ident> {
        Ident::column(&format!("{}_{}", self.0, suffix))
    }
}

impl TryFrom<String> for Ident {
    type Error = QueryError;

    fn try_from(name: String) -> Result<Self> {
        Ident::column(&name)
    }
}

impl From<Ident> for String {
    fn from(ident: Ident) -> Self {
        ident.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a column/table/file identifier.
pub fn validate_identifier(name: &str, kind: IdentKind) -> Result<Ident> {
    identifier_violation(name, kind)
        .map_or_else(|| Ok(Ident(name.to_string())), |v| Err(QueryError::validation(v)))
}

fn identifier_violation(name: &str, kind: IdentKind) -> Option<String> {
    let label = kind.label();
    if name.is_empty() {
        return Some(format!("Empty {} name", label));
    }
    if name.len() > kind.max_len() {
        return Some(format!(
            "{} name too long ({} chars, max {})",
            label,
            name.len(),
            kind.max_len()
        ));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Some(format!("Path traversal sequence in {} name '{}'", label, name));
    }
    if !IDENT_PATTERN.is_match(name) {
        return Some(format!(
            "Invalid {} name '{}': only letters, digits, '_', '.' and '-' are allowed",
            label, name
        ));
    }
    if RESERVED_KEYWORDS.contains(name.to_lowercase().as_str()) {
        return Some(format!("Reserved SQL keyword used as {} name: '{}'", label, name));
    }
    None
}

/// Reject oversized strings and lists, and strings carrying SQL metacharacters.
pub fn validate_filter_value(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::String(s) => validate_text_value(s),
        serde_json::Value::Array(items) => {
            if items.len() > MAX_LIST_ITEMS {
                return Err(QueryError::validation(format!(
                    "Filter list too long ({} items, max {})",
                    items.len(),
                    MAX_LIST_ITEMS
                )));
            }
            items.iter().try_for_each(validate_filter_value)
        }
        _ => Ok(()),
    }
}

pub fn validate_text_value(s: &str) -> Result<()> {
    if s.chars().count() > MAX_STRING_VALUE_LEN {
        return Err(QueryError::validation(format!(
            "Filter value too long ({} chars, max {})",
            s.chars().count(),
            MAX_STRING_VALUE_LEN
        )));
    }
    if let Some(c) = s.chars().find(|c| FORBIDDEN_VALUE_CHARS.contains(c)) {
        return Err(QueryError::validation_with_hint(
            format!("Filter value contains forbidden character '{}'", c),
            "Remove quotes, semicolons and backslashes from filter values",
        ));
    }
    Ok(())
}

/// Ceilings enforced before any SQL is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComplexityLimits {
    pub max_select_columns: usize,
    pub max_group_by_columns: usize,
    pub max_filter_keys: usize,
}

impl Default for ComplexityLimits {
    fn default() -> Self {
        Self {
            max_select_columns: 50,
            max_group_by_columns: 50,
            max_filter_keys: 20,
        }
    }
}

impl ComplexityLimits {
    /// Check counts and validate every referenced column in one pass,
    /// reporting all violations together.
    pub fn validate<'a>(
        &self,
        select: &'a [String],
        filter_keys: &'a [String],
        group_by: &'a [String],
        order_by: &'a [String],
    ) -> Result<()> {
        let mut violations = Vec::new();

        if select.len() > self.max_select_columns {
            violations.push(format!(
                "Too many select columns: {} (max: {})",
                select.len(),
                self.max_select_columns
            ));
        }
        if group_by.len() > self.max_group_by_columns {
            violations.push(format!(
                "Too many group_by columns: {} (max: {})",
                group_by.len(),
                self.max_group_by_columns
            ));
        }
        if filter_keys.len() > self.max_filter_keys {
            violations.push(format!(
                "Too many filter keys: {} (max: {})",
                filter_keys.len(),
                self.max_filter_keys
            ));
        }

        let referenced = select
            .iter()
            .chain(filter_keys)
            .chain(group_by)
            .chain(order_by)
            .unique();
        for name in referenced {
            if let Some(v) = identifier_violation(name, IdentKind::Column) {
                violations.push(v);
            }
        }

        match violations.len() {
            0 => Ok(()),
            1 => Err(QueryError::validation(violations.remove(0))),
            n => Err(QueryError::Validation {
                detail: format!("{} validation problems: {}", n, violations.join("; ")),
                hint: Some(format!(
                    "Limits: {} select columns, {} group_by columns, {} filter keys",
                    self.max_select_columns, self.max_group_by_columns, self.max_filter_keys
                )),
                violations,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_whitelisted_identifiers() {
        for name in ["country_name", "emissions_tonnes", "co2.total", "power-country-year", "A1"] {
            assert!(Ident::column(name).is_ok(), "{} should pass", name);
        }
    }

    #[test]
    fn test_rejects_keywords_case_insensitive() {
        for name in ["select", "DROP", "Union", "exec"] {
            assert!(Ident::column(name).is_err(), "{} should fail", name);
        }
        // Keywords only match whole names.
        assert!(Ident::column("updated_at").is_ok());
    }

    #[test]
    fn test_rejects_bad_characters_and_traversal() {
        for name in ["a b", "col;drop", "x\"y", "../etc", "a/b", "a\\b", "", "naïve"] {
            assert!(Ident::column(name).is_err(), "{:?} should fail", name);
        }
    }

    #[test]
    fn test_length_bounds_by_kind() {
        let long = "a".repeat(150);
        assert!(validate_identifier(&long, IdentKind::Column).is_err());
        assert!(validate_identifier(&long, IdentKind::FileId).is_ok());
        assert!(validate_identifier(&"a".repeat(201), IdentKind::FileId).is_err());
        assert!(validate_identifier(&"a".repeat(100), IdentKind::Column).is_ok());
    }

    #[test]
    fn test_filter_values() {
        assert!(validate_filter_value(&json!("Germany")).is_ok());
        assert!(validate_filter_value(&json!(2020)).is_ok());
        assert!(validate_filter_value(&json!("x'; DROP TABLE t")).is_err());
        assert!(validate_filter_value(&json!("a\\b")).is_err());
        assert!(validate_filter_value(&json!("a".repeat(501))).is_err());
        let many: Vec<i64> = (0..101).collect();
        assert!(validate_filter_value(&json!(many)).is_err());
        assert!(validate_filter_value(&json!(["ok", "bad\""])).is_err());
    }

    #[test]
    fn test_complexity_reports_all_violations() {
        let limits = ComplexityLimits {
            max_select_columns: 2,
            max_group_by_columns: 50,
            max_filter_keys: 1,
        };
        let select = vec!["a".to_string(), "b".to_string(), "drop".to_string()];
        let filters = vec!["x".to_string(), "y y".to_string()];
        let err = limits.validate(&select, &filters, &[], &[]).unwrap_err();
        match err {
            QueryError::Validation { violations, .. } => assert_eq!(violations.len(), 4),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_complexity_passes_within_limits() {
        let select = vec!["country_name".to_string(), "year".to_string()];
        assert!(ComplexityLimits::default()
            .validate(&select, &["year".to_string()], &select, &["year".to_string()])
            .is_ok());
    }
}
