//! Dataset catalog
//!
//! Dataset descriptors come from one JSON manifest read at startup:
//!
//! ```json
//! {"datasets": [{"file_id": "power-country-year",
//!                "storage": {"engine": "duckdb", "path": "power.duckdb", "table": "country_year"},
//!                "columns": [{"name": "country_name", "type": "VARCHAR"}],
//!                "semantics": {"units": "tonnes CO2e", "source": "..."}}]}
//! ```
//!
//! Descriptors are immutable once loaded.

use crate::error::{QueryError, Result};
use crate::validation::{validate_identifier, Ident, IdentKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Duckdb,
}

/// Where the rows of one dataset physically live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageLocator {
    pub engine: EngineKind,
    pub path: PathBuf,
    pub table: Ident,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnInfo {
    pub name: Ident,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct YearRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Semantics {
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub spatial_resolution: Option<String>,
    #[serde(default)]
    pub temporal_resolution: Option<String>,
    #[serde(default)]
    pub coverage: Option<YearRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetDescriptor {
    pub file_id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub storage: StorageLocator,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub semantics: Semantics,
}

/// `GET /list_files` entry. Leaves out the physical storage path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetSummary {
    pub file_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<String>,
    pub semantics: Semantics,
}

/// `GET /get_schema/{file_id}` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetSchema {
    pub file_id: String,
    pub table_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub semantics: Semantics,
}

/// `meta` block attached to every row response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseMeta {
    pub units: Option<String>,
    pub source: Option<String>,
    pub spatial_resolution: Option<String>,
    pub temporal_resolution: Option<String>,
    pub table_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resolution: Vec<serde_json::Value>,
}

impl DatasetDescriptor {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.as_str() == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.to_string()).collect()
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            file_id: self.file_id.clone(),
            description: self.description.clone(),
            columns: self.column_names(),
            semantics: self.semantics.clone(),
        }
    }

    pub fn schema(&self) -> DatasetSchema {
        DatasetSchema {
            file_id: self.file_id.clone(),
            table_id: self.storage.table.to_string(),
            description: self.description.clone(),
            columns: self.columns.clone(),
            semantics: self.semantics.clone(),
        }
    }

    pub fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            units: self.semantics.units.clone(),
            source: self.semantics.source.clone(),
            spatial_resolution: self.semantics.spatial_resolution.clone(),
            temporal_resolution: self.semantics.temporal_resolution.clone(),
            table_id: self.storage.table.to_string(),
            resolution: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    datasets: Vec<DatasetDescriptor>,
}

/// All registered datasets, indexed by `file_id`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    datasets: Vec<DatasetDescriptor>,
    by_id: HashMap<String, usize>,
}

impl Catalog {
    /// Load and validate a manifest. Relative storage paths resolve against
    /// the manifest's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| QueryError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|e| QueryError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let datasets = manifest
            .datasets
            .into_iter()
            .map(|mut d| {
                if d.storage.path.is_relative() {
                    d.storage.path = base.join(&d.storage.path);
                }
                d
            })
            .collect();

        let catalog = Self::from_descriptors(datasets)?;
        info!(path = %path.display(), datasets = catalog.len(), "Loaded dataset manifest");
        Ok(catalog)
    }

    pub fn from_descriptors(datasets: Vec<DatasetDescriptor>) -> Result<Self> {
        let mut by_id = HashMap::new();
        for (idx, dataset) in datasets.iter().enumerate() {
            validate_file_id(&dataset.file_id).map_err(|e| QueryError::Config(e.to_string()))?;
            if dataset.columns.is_empty() {
                return Err(QueryError::Config(format!(
                    "Dataset '{}' declares no columns",
                    dataset.file_id
                )));
            }
            if by_id.insert(dataset.file_id.clone(), idx).is_some() {
                return Err(QueryError::Config(format!(
                    "Duplicate file_id '{}' in manifest",
                    dataset.file_id
                )));
            }
        }
        Ok(Self { datasets, by_id })
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.datasets.iter()
    }

    pub fn list(&self) -> Vec<DatasetSummary> {
        self.datasets.iter().map(DatasetDescriptor::summary).collect()
    }

    /// Look up a dataset. Malformed ids are a validation error; unknown ones
    /// are `not_found` with the closest registered ids as suggestions.
    pub fn get(&self, file_id: &str) -> Result<&DatasetDescriptor> {
        validate_identifier(file_id, IdentKind::FileId)?;
        match self.by_id.get(file_id) {
            Some(idx) => Ok(&self.datasets[*idx]),
            None => Err(QueryError::NotFound {
                detail: format!("Unknown file_id '{}'", file_id),
                suggestions: self.closest_ids(file_id),
            }),
        }
    }

    fn closest_ids(&self, file_id: &str) -> Vec<String> {
        let mut scored: Vec<(f64, &String)> = self
            .by_id
            .keys()
            .map(|id| (strsim::normalized_levenshtein(file_id, id), id))
            .filter(|(score, _)| *score >= 0.5)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored.into_iter().take(3).map(|(_, id)| id.clone()).collect()
    }
}

/// `sector-level-grain`: three non-empty `-`-separated segments.
pub fn validate_file_id(file_id: &str) -> Result<()> {
    validate_identifier(file_id, IdentKind::FileId)?;
    let segments: Vec<&str> = file_id.split('-').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(QueryError::validation_with_hint(
            format!("file_id '{}' is not of the form sector-level-grain", file_id),
            "Example: power-country-year",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(file_id: &str) -> DatasetDescriptor {
        serde_json::from_value(json!({
            "file_id": file_id,
            "storage": {"engine": "duckdb", "path": "data/power.duckdb", "table": "country_year"},
            "columns": [
                {"name": "country_name", "type": "VARCHAR"},
                {"name": "year", "type": "INTEGER"},
                {"name": "emissions_tonnes", "type": "DOUBLE", "unit": "tonnes"}
            ],
            "semantics": {"units": "tonnes CO2e", "source": "Climate TRACE"}
        }))
        .unwrap()
    }

    #[test]
    fn test_rejects_unsupported_engine_and_bad_columns() {
        let bad_engine = json!({
            "file_id": "power-country-year",
            "storage": {"engine": "postgres", "path": "x", "table": "t"},
            "columns": [{"name": "year", "type": "INTEGER"}]
        });
        assert!(serde_json::from_value::<DatasetDescriptor>(bad_engine).is_err());

        let bad_column = json!({
            "file_id": "power-country-year",
            "storage": {"engine": "duckdb", "path": "x", "table": "t"},
            "columns": [{"name": "drop", "type": "INTEGER"}]
        });
        assert!(serde_json::from_value::<DatasetDescriptor>(bad_column).is_err());
    }

    #[test]
    fn test_file_id_shape_and_duplicates() {
        assert!(validate_file_id("power-country-year").is_ok());
        assert!(validate_file_id("power-country").is_err());
        assert!(validate_file_id("power--year").is_err());

        let err = Catalog::from_descriptors(vec![
            descriptor("power-country-year"),
            descriptor("power-country-year"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigError);
    }

    #[test]
    fn test_lookup_suggests_close_ids() {
        let catalog = Catalog::from_descriptors(vec![
            descriptor("power-country-year"),
            descriptor("transport-city-month"),
        ])
        .unwrap();

        assert!(catalog.get("power-country-year").is_ok());
        match catalog.get("power-countri-year").unwrap_err() {
            QueryError::NotFound { suggestions, .. } => {
                assert_eq!(suggestions, vec!["power-country-year".to_string()])
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            catalog.get("../etc").unwrap_err().code(),
            crate::error::ErrorCode::ValidationError
        );
    }

    #[test]
    fn test_summary_hides_storage() {
        let summary = serde_json::to_value(descriptor("power-country-year").summary()).unwrap();
        assert!(summary.get("storage").is_none());
        assert_eq!(summary["columns"][2], "emissions_tonnes");
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = std::env::temp_dir().join(format!("eq-manifest-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let manifest = dir.join("manifest.json");
        std::fs::write(
            &manifest,
            serde_json::to_string(&json!({"datasets": [descriptor("power-country-year")]})).unwrap(),
        )
        .unwrap();

        let catalog = Catalog::load(&manifest).unwrap();
        let dataset = catalog.get("power-country-year").unwrap();
        assert_eq!(dataset.storage.path, dir.join("data/power.duckdb"));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
