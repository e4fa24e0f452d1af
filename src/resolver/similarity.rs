//! Pluggable similarity scoring for fuzzy place-name matching.

use strsim::{jaro_winkler, normalized_levenshtein};

/// Scores how alike two names are, in `[0.0, 1.0]`.
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> f64;
}

/// Default scorer: 1.0 on a case-insensitive exact match, 0.9 when either
/// name contains the other, otherwise the normalized Levenshtein ratio
/// `1 - distance / max_len`. This stands in for a matching-blocks sequence
/// ratio: both are 1.0 for equal strings and fall with each edit. It runs
/// slightly stricter ("Calfornia" vs "California" is 0.90 here and about
/// 0.95 as a blocks ratio), so the 0.75 threshold stays conservative.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

impl SimilarityScorer for HeuristicScorer {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a = a.trim().to_lowercase();
        let b = b.trim().to_lowercase();
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        if a.contains(&b) || b.contains(&a) {
            return 0.9;
        }
        normalized_levenshtein(&a, &b)
    }
}

/// Jaro-Winkler with punctuation and whitespace normalized away, plus a
/// small bonus for substring matches. Favors shared prefixes, which suits
/// truncated or abbreviated names.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinklerScorer;

impl JaroWinklerScorer {
    fn normalize(s: &str) -> String {
        s.to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl SimilarityScorer for JaroWinklerScorer {
    fn score(&self, a: &str, b: &str) -> f64 {
        let a = Self::normalize(a);
        let b = Self::normalize(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }

        let jw_score = jaro_winkler(&a, &b);
        let substring_bonus = if a.contains(&b) || b.contains(&a) {
            let len_diff = (a.len() as f64 - b.len() as f64).abs();
            let max_len = a.len().max(b.len()) as f64;
            (1.0 - len_diff / max_len) * 0.1
        } else {
            0.0
        };
        (jw_score + substring_bonus).min(1.0)
    }
}
