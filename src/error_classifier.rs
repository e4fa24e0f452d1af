//! Error Classifier
//!
//! Classifies raw engine failures and translates them into structured
//! [`QueryError`]s. Missing-column and missing-table messages carry the
//! engine's own candidate names, which are surfaced as suggestions.

use crate::circuit_breaker::TripsBreaker;
use crate::error::QueryError;
use crate::execution::EngineError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

lazy_static! {
    static ref MISSING_COLUMN: Regex =
        Regex::new(r#"(?i)(?:referenced )?column "?([^"\s]+)"? (?:not found|does not exist)"#).unwrap();
    static ref MISSING_TABLE: Regex =
        Regex::new(r#"(?i)table with name "?([^"\s!]+)"? does not exist"#).unwrap();
    static ref CANDIDATE_BINDINGS: Regex = Regex::new(r"(?i)candidate bindings:\s*(.+)").unwrap();
    static ref CANDIDATE_LIST: Regex = Regex::new(r"(?i)candidates:\s*\[([^\]]*)\]").unwrap();
    static ref DID_YOU_MEAN: Regex = Regex::new(r#"(?i)did you mean "([^"]+)""#).unwrap();
    static ref QUOTED: Regex = Regex::new(r#""([^"]+)""#).unwrap();
    static ref GROUP_BY_REQUIRED: Regex =
        Regex::new(r"(?i)must appear in the group by clause|must be part of an aggregate function").unwrap();
    static ref CONVERSION: Regex = Regex::new(r"(?i)conversion error|could not convert").unwrap();
}

/// Engine error classification taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ErrorClass {
    ColumnNotFound { column: String, candidates: Vec<String> },
    TableNotFound { table: String, candidates: Vec<String> },
    InvalidAggregation,
    TypeMismatch,
    Timeout,
    PoolExhausted,
    Connection,
    Execution,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::ColumnNotFound { column, .. } => write!(f, "ColumnNotFound({})", column),
            ErrorClass::TableNotFound { table, .. } => write!(f, "TableNotFound({})", table),
            ErrorClass::InvalidAggregation => write!(f, "InvalidAggregation"),
            ErrorClass::TypeMismatch => write!(f, "TypeMismatch"),
            ErrorClass::Timeout => write!(f, "Timeout"),
            ErrorClass::PoolExhausted => write!(f, "PoolExhausted"),
            ErrorClass::Connection => write!(f, "Connection"),
            ErrorClass::Execution => write!(f, "Execution"),
        }
    }
}

impl ErrorClass {
    /// Request defects say nothing about engine health and leave the
    /// breaker alone.
    pub fn counts_as_failure(&self) -> bool {
        !matches!(
            self,
            ErrorClass::ColumnNotFound { .. }
                | ErrorClass::TableNotFound { .. }
                | ErrorClass::InvalidAggregation
                | ErrorClass::TypeMismatch
        )
    }
}

/// Error classifier
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify an engine error into the taxonomy
    pub fn classify(&self, error: &EngineError) -> ErrorClass {
        let message = match error {
            EngineError::Timeout(_) => return ErrorClass::Timeout,
            EngineError::PoolExhausted(_) => return ErrorClass::PoolExhausted,
            EngineError::Connection(_) => return ErrorClass::Connection,
            EngineError::Engine(message) => message,
        };

        if let Some(caps) = MISSING_COLUMN.captures(message) {
            return ErrorClass::ColumnNotFound {
                column: caps[1].to_string(),
                candidates: candidates(message),
            };
        }
        if let Some(caps) = MISSING_TABLE.captures(message) {
            return ErrorClass::TableNotFound {
                table: caps[1].to_string(),
                candidates: candidates(message),
            };
        }
        if GROUP_BY_REQUIRED.is_match(message) {
            return ErrorClass::InvalidAggregation;
        }
        if CONVERSION.is_match(message) {
            return ErrorClass::TypeMismatch;
        }
        ErrorClass::Execution
    }

    /// Translate into the wire-level error taxonomy.
    pub fn translate(&self, error: &EngineError) -> QueryError {
        match self.classify(error) {
            ErrorClass::ColumnNotFound { column, candidates } => QueryError::NotFound {
                detail: format!("Column '{}' not found", column),
                suggestions: candidates,
            },
            ErrorClass::TableNotFound { table, candidates } => QueryError::NotFound {
                detail: format!("Table '{}' not found", table),
                suggestions: candidates,
            },
            ErrorClass::InvalidAggregation => QueryError::validation_with_hint(
                first_line(error),
                "Every selected column must be in group_by or carry an aggregation",
            ),
            ErrorClass::TypeMismatch => QueryError::validation_with_hint(
                first_line(error),
                "A filter value does not match the column type",
            ),
            ErrorClass::Timeout => QueryError::Timeout(error.to_string()),
            ErrorClass::PoolExhausted => match error {
                EngineError::PoolExhausted(waited) => QueryError::Unavailable {
                    detail: error.to_string(),
                    retry_after_secs: waited.as_secs_f64().max(1.0),
                },
                _ => QueryError::Execution(error.to_string()),
            },
            ErrorClass::Connection | ErrorClass::Execution => QueryError::Execution(error.to_string()),
        }
    }
}

impl TripsBreaker for EngineError {
    fn trips_breaker(&self) -> bool {
        ErrorClassifier::new().classify(self).counts_as_failure()
    }
}

fn first_line(error: &EngineError) -> String {
    error.to_string().lines().next().unwrap_or_default().to_string()
}

/// Candidate names from any of the engine's suggestion formats, with table
/// qualifiers stripped.
fn candidates(message: &str) -> Vec<String> {
    let raw: Vec<String> = if let Some(caps) = CANDIDATE_BINDINGS.captures(message) {
        QUOTED.captures_iter(&caps[1]).map(|c| c[1].to_string()).collect()
    } else if let Some(caps) = CANDIDATE_LIST.captures(message) {
        caps[1]
            .split(',')
            .map(|s| s.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|s| !s.is_empty())
            .collect()
    } else {
        DID_YOU_MEAN
            .captures_iter(message)
            .map(|c| c[1].to_string())
            .collect()
    };

    let mut names: Vec<String> = Vec::new();
    for name in raw {
        let bare = name.rsplit('.').next().unwrap_or(&name).to_string();
        if !names.contains(&bare) {
            names.push(bare);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn engine(msg: &str) -> EngineError {
        EngineError::Engine(msg.to_string())
    }

    #[test]
    fn test_column_not_found_with_candidate_bindings() {
        let classifier = ErrorClassifier::new();
        let err = engine(
            "Binder Error: Referenced column \"emisions\" not found in FROM clause!\n\
             Candidate bindings: \"country_year.emissions_tonnes\", \"country_year.year\"",
        );
        assert_eq!(
            classifier.classify(&err),
            ErrorClass::ColumnNotFound {
                column: "emisions".to_string(),
                candidates: vec!["emissions_tonnes".to_string(), "year".to_string()],
            }
        );
        let translated = classifier.translate(&err).to_response();
        assert_eq!(translated.error, crate::error::ErrorCode::NotFound);
        assert_eq!(translated.suggestions.unwrap()[0], "emissions_tonnes");
    }

    #[test]
    fn test_generic_candidate_list() {
        let err = engine("column sectr does not exist, candidates: [sector, subsector]");
        match ErrorClassifier::new().classify(&err) {
            ErrorClass::ColumnNotFound { candidates, .. } => {
                assert_eq!(candidates, vec!["sector".to_string(), "subsector".to_string()])
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_table_not_found_did_you_mean() {
        let err = engine("Catalog Error: Table with name contry_year does not exist!\nDid you mean \"country_year\"?");
        match ErrorClassifier::new().classify(&err) {
            ErrorClass::TableNotFound { table, candidates } => {
                assert_eq!(table, "contry_year");
                assert_eq!(candidates, vec!["country_year".to_string()]);
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_timeout_and_pool_codes() {
        let classifier = ErrorClassifier::new();
        let timeout = classifier.translate(&EngineError::Timeout(Duration::from_secs(30)));
        assert_eq!(timeout.code(), crate::error::ErrorCode::Timeout);

        let exhausted = classifier.translate(&EngineError::PoolExhausted(Duration::from_secs(5)));
        assert_eq!(exhausted.to_response().retry_after, Some(5.0));

        let other = classifier.translate(&engine("Out of Memory Error: failed to allocate"));
        assert_eq!(other.code(), crate::error::ErrorCode::ExecutionError);
    }

    #[test]
    fn test_request_defects_do_not_trip_breaker() {
        assert!(!engine("Referenced column \"x\" not found").trips_breaker());
        assert!(!engine("Conversion Error: Could not convert string 'a' to INT32").trips_breaker());
        assert!(EngineError::Timeout(Duration::from_secs(1)).trips_breaker());
        assert!(engine("IO Error: disk read failed").trips_breaker());
    }
}
