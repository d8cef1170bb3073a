//! Local token-overlap matcher.

use tracing::debug;

use super::{finalize_candidates, CandidateMatcher, MatchError, MatchQuery};
use crate::index::{tokenize, CatalogIndex};
use crate::models::MatchCandidate;

/// Scores every indexed label by shared tokens.
pub struct TokenOverlapMatcher<'a> {
    index: &'a CatalogIndex,
}

impl<'a> TokenOverlapMatcher<'a> {
    pub fn new(index: &'a CatalogIndex) -> Self {
        Self { index }
    }
}

/// `|common| / max(|query|, |label|, 1)`, where tokens are common when one is
/// a prefix of the other.
pub fn overlap_score(query_tokens: &[String], label_tokens: &[String]) -> f64 {
    let common = query_tokens
        .iter()
        .filter(|q| {
            label_tokens
                .iter()
                .any(|l| l.starts_with(q.as_str()) || q.starts_with(l.as_str()))
        })
        .count();
    let denominator = query_tokens.len().max(label_tokens.len()).max(1);
    common as f64 / denominator as f64
}

impl CandidateMatcher for TokenOverlapMatcher<'_> {
    fn candidates(&self, query: &MatchQuery<'_>, limit: usize) -> Result<Vec<MatchCandidate>, MatchError> {
        if query.key.is_empty() {
            return Err(MatchError::EmptyQuery);
        }
        let query_tokens = tokenize(query.key);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let scored: Vec<MatchCandidate> = self
            .index
            .entries()
            .iter()
            .filter(|e| query.allows_code(&e.entry.code) && query.allows_label(&e.key))
            .filter_map(|e| {
                let score = overlap_score(&query_tokens, &e.tokens);
                (score > 0.0).then(|| MatchCandidate::new(&e.entry.code, &e.entry.label, score))
            })
            .collect();

        debug!(key = query.key, scored = scored.len(), "token overlap");
        Ok(finalize_candidates(scored, limit))
    }

    fn name(&self) -> &'static str {
        "token_overlap"
    }
}
