//! Coverage Index
//!
//! Every distinct place name present across the registered datasets, per
//! geographic level. Built once on first use and kept for the life of the
//! process; a refreshed dataset is only picked up after a restart. A build
//! in which every query failed is not kept, so the next request retries.

use crate::execution::PushdownExecutor;
use crate::metadata::Catalog;
use crate::sql::build_distinct;
use crate::validation::Ident;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoLevel {
    Country,
    Admin1,
    City,
}

impl GeoLevel {
    /// Detection order: the most specific level wins a cross-level collision.
    pub const PRIORITY: [GeoLevel; 3] = [GeoLevel::City, GeoLevel::Admin1, GeoLevel::Country];

    pub fn column(&self) -> &'static str {
        match self {
            GeoLevel::Country => "country_name",
            GeoLevel::Admin1 => "admin1_name",
            GeoLevel::City => "city_name",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::PRIORITY.into_iter().find(|level| level.column() == column)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeoLevel::Country => "country",
            GeoLevel::Admin1 => "admin1",
            GeoLevel::City => "city",
        }
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
struct LevelNames {
    sorted: Vec<String>,
    by_lowercase: HashMap<String, usize>,
}

impl LevelNames {
    fn new(names: BTreeSet<String>) -> Self {
        let sorted: Vec<String> = names.into_iter().collect();
        let mut by_lowercase = HashMap::new();
        for (idx, name) in sorted.iter().enumerate() {
            by_lowercase.entry(name.to_lowercase()).or_insert(idx);
        }
        Self { sorted, by_lowercase }
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        if let Ok(idx) = self.sorted.binary_search_by(|n| n.as_str().cmp(name)) {
            return Some(&self.sorted[idx]);
        }
        self.by_lowercase
            .get(&name.to_lowercase())
            .map(|idx| self.sorted[*idx].as_str())
    }
}

/// Sorted name sets keyed by level.
#[derive(Debug, Clone, Default)]
pub struct CoverageIndex {
    levels: HashMap<GeoLevel, LevelNames>,
}

impl CoverageIndex {
    pub fn from_names<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (GeoLevel, S)>,
        S: Into<String>,
    {
        let mut sets: HashMap<GeoLevel, BTreeSet<String>> = HashMap::new();
        for (level, name) in entries {
            let name = name.into();
            if !name.trim().is_empty() {
                sets.entry(level).or_default().insert(name);
            }
        }
        Self {
            levels: sets.into_iter().map(|(l, names)| (l, LevelNames::new(names))).collect(),
        }
    }

    pub fn names(&self, level: GeoLevel) -> &[String] {
        self.levels.get(&level).map(|l| l.sorted.as_slice()).unwrap_or(&[])
    }

    /// Exact, then case-insensitive, match at `level`.
    pub fn lookup(&self, level: GeoLevel, name: &str) -> Option<&str> {
        self.levels.get(&level).and_then(|l| l.lookup(name))
    }

    pub fn len(&self) -> usize {
        self.levels.values().map(|l| l.sorted.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every coverage query failed; nothing worth memoizing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("coverage unavailable: all {skipped} coverage queries failed")]
pub struct CoverageUnavailable {
    pub skipped: usize,
}

/// Builds the [`CoverageIndex`] on first request and memoizes it.
#[derive(Debug, Default)]
pub struct CoverageProvider {
    cell: OnceCell<CoverageIndex>,
    empty: CoverageIndex,
}

impl CoverageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that never queries the engine.
    pub fn prebuilt(index: CoverageIndex) -> Self {
        Self {
            cell: OnceCell::new_with(Some(index)),
            empty: CoverageIndex::default(),
        }
    }

    pub fn is_built(&self) -> bool {
        self.cell.initialized()
    }

    /// The memoized index, building it if needed. A failed build resolves
    /// against an empty index for this request only.
    pub async fn get(&self, catalog: &Catalog, executor: &PushdownExecutor) -> &CoverageIndex {
        match self.cell.get_or_try_init(|| build(catalog, executor)).await {
            Ok(index) => index,
            Err(e) => {
                warn!("{}; will retry on next request", e);
                &self.empty
            }
        }
    }
}

/// One DISTINCT query per (dataset, geographic column) pair. A dataset that
/// fails to load is logged and skipped; if all of them fail the build fails.
async fn build(catalog: &Catalog, executor: &PushdownExecutor) -> Result<CoverageIndex, CoverageUnavailable> {
    let start_time = Instant::now();
    let mut entries: Vec<(GeoLevel, String)> = Vec::new();
    let mut loaded = 0usize;
    let mut skipped = 0usize;

    for dataset in catalog.iter() {
        for level in GeoLevel::PRIORITY {
            if !dataset.has_column(level.column()) {
                continue;
            }
            let statement = match Ident::column(level.column())
                .and_then(|column| build_distinct(&dataset.storage.table, &column))
            {
                Ok(statement) => statement,
                Err(e) => {
                    warn!(file_id = %dataset.file_id, level = %level, "Skipping coverage: {}", e);
                    skipped += 1;
                    continue;
                }
            };

            match executor.run(dataset, &statement).await {
                Ok(rows) => {
                    loaded += 1;
                    let before = entries.len();
                    entries.extend(
                        rows.rows
                            .into_iter()
                            .filter_map(|row| row.into_iter().next())
                            .filter_map(|value| value.as_str().map(str::to_string))
                            .map(|name| (level, name)),
                    );
                    debug!(file_id = %dataset.file_id, level = %level, names = entries.len() - before, "Coverage loaded");
                }
                Err(e) => {
                    warn!(file_id = %dataset.file_id, level = %level, "Skipping coverage: {}", e);
                    skipped += 1;
                }
            }
        }
    }

    if loaded == 0 && skipped > 0 {
        return Err(CoverageUnavailable { skipped });
    }

    let index = CoverageIndex::from_names(entries);
    info!(
        countries = index.names(GeoLevel::Country).len(),
        admin1 = index.names(GeoLevel::Admin1).len(),
        cities = index.names(GeoLevel::City).len(),
        skipped,
        elapsed_ms = start_time.elapsed().as_millis() as u64,
        "Coverage index built"
    );
    Ok(index)
}
