//! Entity resolution for free-text place names.
//!
//! Resolution order: alias table, then exact / case-insensitive lookup in
//! the coverage index (most specific level first), then fuzzy scoring at the
//! target level, then fuzzy scoring across every level. An alias whose
//! canonical name is absent from coverage yields to a stored raw spelling.
//! Resolution never fails; the worst case hands the input back with no
//! suggestions.

pub mod aliases;
pub mod coverage;
pub mod similarity;

pub use coverage::{CoverageIndex, CoverageProvider, GeoLevel};
pub use similarity::{HeuristicScorer, JaroWinklerScorer, SimilarityScorer};

use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

pub const DEFAULT_THRESHOLD: f64 = 0.75;
pub const MAX_SUGGESTIONS: usize = 5;

/// How the canonical name was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Alias,
    Exact,
    Fuzzy,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub name: String,
    pub level: GeoLevel,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub input: String,
    pub canonical: String,
    pub level: GeoLevel,
    #[serde(rename = "match")]
    pub matched: MatchKind,
    pub suggestions: Vec<Suggestion>,
}

impl Resolution {
    /// Alias and exact matches may replace the input; fuzzy ones only suggest.
    pub fn is_confident(&self) -> bool {
        matches!(self.matched, MatchKind::Alias | MatchKind::Exact)
    }
}

pub struct EntityResolver {
    scorer: Box<dyn SimilarityScorer>,
    threshold: f64,
    max_suggestions: usize,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new(Box::new(HeuristicScorer))
    }
}

impl EntityResolver {
    pub fn new(scorer: Box<dyn SimilarityScorer>) -> Self {
        Self {
            scorer,
            threshold: DEFAULT_THRESHOLD,
            max_suggestions: MAX_SUGGESTIONS,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn resolve(&self, coverage: &CoverageIndex, name: &str, level: Option<GeoLevel>) -> Resolution {
        let input = name.trim();
        // An alias implying a different level than requested is ignored.
        let (candidate, alias_level) = match aliases::lookup(input) {
            Some((canonical, implied)) if level.is_none() || implied.is_none() || implied == level => {
                (canonical, implied)
            }
            _ => (input, None),
        };
        let aliased = candidate != input;
        let search = level.or(alias_level);

        if let Some((found, found_level)) = exact_lookup(coverage, candidate, search) {
            return Resolution {
                input: name.to_string(),
                canonical: found.to_string(),
                level: found_level,
                matched: if aliased { MatchKind::Alias } else { MatchKind::Exact },
                suggestions: Vec::new(),
            };
        }

        if aliased {
            // Datasets that store the raw spelling keep it.
            if let Some((found, found_level)) = exact_lookup(coverage, input, search) {
                return Resolution {
                    input: name.to_string(),
                    canonical: found.to_string(),
                    level: found_level,
                    matched: MatchKind::Exact,
                    suggestions: Vec::new(),
                };
            }
            return Resolution {
                input: name.to_string(),
                canonical: candidate.to_string(),
                level: search.unwrap_or(GeoLevel::Country),
                matched: MatchKind::Alias,
                suggestions: Vec::new(),
            };
        }

        let target = level.unwrap_or(GeoLevel::Country);
        let mut suggestions = match level {
            Some(l) => self.suggest(coverage, candidate, &[l]),
            None => Vec::new(),
        };
        if suggestions.is_empty() {
            suggestions = self.suggest(coverage, candidate, &GeoLevel::PRIORITY);
        }
        debug!(input, suggestions = suggestions.len(), "Fuzzy resolution");

        Resolution {
            input: name.to_string(),
            canonical: name.to_string(),
            level: target,
            matched: if suggestions.is_empty() { MatchKind::None } else { MatchKind::Fuzzy },
            suggestions,
        }
    }

    fn suggest(&self, coverage: &CoverageIndex, name: &str, levels: &[GeoLevel]) -> Vec<Suggestion> {
        let mut scored: Vec<Suggestion> = levels
            .iter()
            .flat_map(|level| {
                coverage.names(*level).iter().map(move |candidate| (level, candidate))
            })
            .map(|(level, candidate)| Suggestion {
                name: candidate.clone(),
                level: *level,
                score: self.scorer.score(name, candidate),
            })
            .filter(|s| s.score >= self.threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        scored.truncate(self.max_suggestions);
        scored
    }
}

/// Exact / case-insensitive hit at `level`, or at the most specific level
/// holding the name when no level is given.
fn exact_lookup<'a>(coverage: &'a CoverageIndex, name: &str, level: Option<GeoLevel>) -> Option<(&'a str, GeoLevel)> {
    match level {
        Some(l) => coverage.lookup(l, name).map(|found| (found, l)),
        None => GeoLevel::PRIORITY
            .into_iter()
            .find_map(|l| coverage.lookup(l, name).map(|found| (found, l))),
    }
}
