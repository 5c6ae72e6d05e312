// SPDX-License-Identifier: MIT

//! Relevance scoring for findings
//!
//! No ranking formula is baked into the research step; it asks a
//! `RelevanceScorer` and only requires the answer to land in [0, 1].

use std::collections::HashSet;
use std::sync::Arc;

use super::search::SearchHit;

/// Score assigned when the provider gives none
pub const DEFAULT_RELEVANCE: f64 = 0.8;

pub trait RelevanceScorer: Send + Sync {
    fn name(&self) -> &str;

    /// Relevance of `hit` for `query`, in [0, 1]
    fn score(&self, query: &str, hit: &SearchHit) -> f64;
}

/// Trust the provider score, clamped
#[derive(Debug, Default)]
pub struct ProviderScore;

impl RelevanceScorer for ProviderScore {
    fn name(&self) -> &str {
        "provider"
    }

    fn score(&self, _query: &str, hit: &SearchHit) -> f64 {
        clamp_unit(hit.score.unwrap_or(DEFAULT_RELEVANCE))
    }
}

/// Share of query terms that appear in the hit content
#[derive(Debug, Default)]
pub struct TermOverlap;

impl RelevanceScorer for TermOverlap {
    fn name(&self) -> &str {
        "term_overlap"
    }

    fn score(&self, query: &str, hit: &SearchHit) -> f64 {
        let terms: HashSet<String> = tokens(query).collect();
        if terms.is_empty() {
            return 0.0;
        }
        let content: HashSet<String> = tokens(&hit.content).collect();
        let matched = terms.iter().filter(|t| content.contains(*t)).count();
        clamp_unit(matched as f64 / terms.len() as f64)
    }
}

/// Scorer registered under `name` (`provider` or `term_overlap`)
pub fn from_name(name: &str) -> Option<Arc<dyn RelevanceScorer>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "provider" => Some(Arc::new(ProviderScore)),
        "term_overlap" => Some(Arc::new(TermOverlap)),
        _ => None,
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(content: &str, score: Option<f64>) -> SearchHit {
        SearchHit {
            content: content.to_string(),
            source: "https://example.com".to_string(),
            score,
        }
    }

    #[test]
    fn test_provider_score_clamps() {
        let scorer = ProviderScore;
        assert_eq!(scorer.score("q", &hit("x", Some(1.7))), 1.0);
        assert_eq!(scorer.score("q", &hit("x", Some(-0.2))), 0.0);
        assert_eq!(scorer.score("q", &hit("x", Some(f64::NAN))), 0.0);
        assert_eq!(scorer.score("q", &hit("x", None)), DEFAULT_RELEVANCE);
    }

    #[test]
    fn test_term_overlap() {
        let scorer = TermOverlap;
        let h = hit("Steel tariffs raised prices for manufacturers", None);
        assert_eq!(scorer.score("steel tariffs", &h), 1.0);
        assert_eq!(scorer.score("steel jobs", &h), 0.5);
        assert_eq!(scorer.score("of a", &h), 0.0);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(from_name("provider").unwrap().name(), "provider");
        assert_eq!(from_name(" Term_Overlap ").unwrap().name(), "term_overlap");
        assert!(from_name("bm25").is_none());
    }
}
