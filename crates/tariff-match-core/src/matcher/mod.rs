//! Candidate matchers.
//!
//! Three interchangeable strategies produce ranked [`MatchCandidate`]s:
//! - [`TokenOverlapMatcher`]: in-process scoring against a loaded [`CatalogIndex`](crate::index::CatalogIndex)
//! - [`RemoteMatcher`]: server-side fuzzy search
//! - [`EmbeddingMatcher`]: cosine similarity over precomputed catalog embeddings

mod token_overlap;
mod remote;
mod embedding;

pub use embedding::*;
pub use remote::*;
pub use token_overlap::*;

use std::collections::HashMap;

use thiserror::Error;

use crate::models::{rank_candidates, MatchCandidate};
use crate::resolver::CategoryFilter;
use crate::services::ServiceError;

/// Matcher errors.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("External service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("Empty query")]
    EmptyQuery,
}

/// A normalized query with its lexicon constraints.
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'q> {
    /// Normalized key
    pub key: &'q str,
    /// Category gate on candidate codes
    pub filter: Option<&'q CategoryFilter>,
    /// Candidate labels must contain one of these stems (ignored when empty)
    pub include_tokens: &'q [String],
}

impl<'q> MatchQuery<'q> {
    /// Query without lexicon constraints.
    pub fn plain(key: &'q str) -> Self {
        Self {
            key,
            filter: None,
            include_tokens: &[],
        }
    }

    /// Whether a code passes the category gate.
    pub fn allows_code(&self, code: &str) -> bool {
        self.filter.map_or(true, |f| f.allows(code))
    }

    /// Whether a normalized label satisfies the include-token constraint.
    pub fn allows_label(&self, label_key: &str) -> bool {
        self.include_tokens.is_empty()
            || self
                .include_tokens
                .iter()
                .any(|t| label_key.contains(t.as_str()))
    }
}

/// A strategy producing ranked candidates.
pub trait CandidateMatcher {
    /// Up to `limit` candidates, best first.
    fn candidates(&self, query: &MatchQuery<'_>, limit: usize) -> Result<Vec<MatchCandidate>, MatchError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Keep the best-scoring candidate per code, rank, and truncate.
pub fn finalize_candidates(candidates: Vec<MatchCandidate>, limit: usize) -> Vec<MatchCandidate> {
    let mut best: Vec<MatchCandidate> = Vec::with_capacity(candidates.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for candidate in candidates {
        match position.get(&candidate.code) {
            Some(&i) => {
                if candidate.score > best[i].score {
                    best[i] = candidate;
                }
            }
            None => {
                position.insert(candidate.code.clone(), best.len());
                best.push(candidate);
            }
        }
    }

    rank_candidates(&mut best);
    best.truncate(limit);
    best
}
