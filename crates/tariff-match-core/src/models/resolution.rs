//! Resolution models for the tariff code resolver.

use serde::{Deserialize, Serialize};

/// A candidate catalog match produced by one of the matchers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchCandidate {
    /// Tariff code
    pub code: String,
    /// Catalog label for the code
    pub label: String,
    /// Similarity score (0.0 - 1.0)
    pub score: f64,
}

impl MatchCandidate {
    /// Create a candidate, clamping the score into `[0, 1]`.
    pub fn new(code: impl Into<String>, label: impl Into<String>, score: f64) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self {
            code: code.into(),
            label: label.into(),
            score,
        }
    }
}

/// Sort candidates by descending score, keeping input order on ties.
pub fn rank_candidates(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Three-tier outcome of a resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Accepted without human review
    Auto,
    /// Plausible match, a human must confirm one of the options
    Review,
    /// Nothing usable; blocks export until a code is entered manually
    Error,
}

/// Which step of the cascade produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// Human-confirmed keyword override
    KeywordOverride,
    /// Override Store hit on the normalized name
    Override,
    /// Lexicon keyword rule
    KeywordRule,
    /// Exact normalized label match in the local index
    ExactMatch,
    /// Remote fuzzy search
    RemoteFuzzy,
    /// Local token overlap
    TokenOverlap,
    /// Embedding cosine similarity
    Embedding,
    /// Classification assistant suggestion
    Assistant,
    /// No step produced a usable candidate
    Unresolved,
}

/// Result of resolving one product name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolutionResult {
    /// Product name as supplied by the caller
    pub product_name: String,
    /// Resolved code; empty for `Error`
    pub code: String,
    /// Catalog label of the resolved code, when known
    pub label: Option<String>,
    /// Resolution tier
    pub status: ResolutionStatus,
    /// Ranked alternative codes offered for review
    pub options: Vec<String>,
    /// Score of the selected candidate (0.0 - 1.0)
    pub score: f64,
    /// Cascade step that produced the result
    pub source: ResolutionSource,
}

impl ResolutionResult {
    /// Auto-accepted result with a perfect score.
    pub fn certain(
        product_name: impl Into<String>,
        code: impl Into<String>,
        label: Option<String>,
        source: ResolutionSource,
    ) -> Self {
        Self {
            product_name: product_name.into(),
            code: code.into(),
            label,
            status: ResolutionStatus::Auto,
            options: Vec::new(),
            score: 1.0,
            source,
        }
    }

    /// Unresolved result; `code` is always empty.
    pub fn unresolved(product_name: impl Into<String>, score: f64) -> Self {
        Self {
            product_name: product_name.into(),
            code: String::new(),
            label: None,
            status: ResolutionStatus::Error,
            options: Vec::new(),
            score,
            source: ResolutionSource::Unresolved,
        }
    }

    /// Check if a human has to act on this result.
    pub fn needs_attention(&self) -> bool {
        !matches!(self.status, ResolutionStatus::Auto)
    }

    /// Code usable for export, if any.
    pub fn final_code(&self) -> Option<&str> {
        match self.status {
            ResolutionStatus::Auto => Some(&self.code),
            ResolutionStatus::Review | ResolutionStatus::Error => None,
        }
    }
}

/// Namespace of an override key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverrideScope {
    /// Key is a normalized product name
    Name,
    /// Key is a lexicon keyword
    Keyword,
}

impl OverrideScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideScope::Name => "name",
            OverrideScope::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(OverrideScope::Name),
            "keyword" => Some(OverrideScope::Keyword),
            _ => None,
        }
    }
}

/// Who created an override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverrideSource {
    /// Written by the resolver on auto-accept
    Auto,
    /// Picked or typed by a human
    Manual,
    /// Assistant suggestion accepted by a human
    Assistant,
    /// Merged from the shared remote cache
    Remote,
}

impl OverrideSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideSource::Auto => "auto",
            OverrideSource::Manual => "manual",
            OverrideSource::Assistant => "assistant",
            OverrideSource::Remote => "remote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(OverrideSource::Auto),
            "manual" => Some(OverrideSource::Manual),
            "assistant" => Some(OverrideSource::Assistant),
            "remote" => Some(OverrideSource::Remote),
            _ => None,
        }
    }
}

/// A confirmed key → code mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverrideMapping {
    pub scope: OverrideScope,
    /// Normalized product name or keyword
    pub key: String,
    pub code: String,
    pub source: OverrideSource,
}

impl OverrideMapping {
    pub fn name(key: impl Into<String>, code: impl Into<String>, source: OverrideSource) -> Self {
        Self {
            scope: OverrideScope::Name,
            key: key.into(),
            code: code.into(),
            source,
        }
    }

    pub fn keyword(key: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            scope: OverrideScope::Keyword,
            key: key.into(),
            code: code.into(),
            source: OverrideSource::Manual,
        }
    }
}

/// Counts over a resolved batch.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub auto: usize,
    pub review: usize,
    pub error: usize,
}

impl BatchSummary {
    /// Tally a list of results.
    pub fn from_results(results: &[ResolutionResult]) -> Self {
        let mut summary = Self::default();
        for r in results {
            summary.record(r.status);
        }
        summary
    }

    pub fn record(&mut self, status: ResolutionStatus) {
        self.total += 1;
        match status {
            ResolutionStatus::Auto => self.auto += 1,
            ResolutionStatus::Review => self.review += 1,
            ResolutionStatus::Error => self.error += 1,
        }
    }

    /// Whether every item resolved automatically.
    pub fn is_clean(&self) -> bool {
        self.review == 0 && self.error == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_score_is_clamped() {
        assert_eq!(MatchCandidate::new("1", "a", 1.7).score, 1.0);
        assert_eq!(MatchCandidate::new("1", "a", -0.2).score, 0.0);
        assert_eq!(MatchCandidate::new("1", "a", f64::NAN).score, 0.0);
    }

    #[test]
    fn test_rank_candidates_is_stable() {
        let mut candidates = vec![
            MatchCandidate::new("A", "a", 0.5),
            MatchCandidate::new("B", "b", 0.9),
            MatchCandidate::new("C", "c", 0.5),
        ];
        rank_candidates(&mut candidates);
        let codes: Vec<_> = candidates.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["B", "A", "C"]);
    }

    #[test]
    fn test_final_code() {
        let mut result =
            ResolutionResult::certain("ladder", "7616999008", None, ResolutionSource::Override);
        assert_eq!(result.final_code(), Some("7616999008"));
        assert!(!result.needs_attention());

        result.status = ResolutionStatus::Review;
        assert_eq!(result.final_code(), None);
        assert!(result.needs_attention());

        let unresolved = ResolutionResult::unresolved("???", 0.1);
        assert_eq!(unresolved.code, "");
        assert_eq!(unresolved.final_code(), None);
    }

    #[test]
    fn test_batch_summary() {
        let results = vec![
            ResolutionResult::certain("a", "7616999008", None, ResolutionSource::ExactMatch),
            ResolutionResult::unresolved("b", 0.0),
            ResolutionResult::unresolved("c", 0.2),
        ];
        let summary = BatchSummary::from_results(&results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.auto, 1);
        assert_eq!(summary.error, 2);
        assert!(!summary.is_clean());
    }

    #[test]
    fn test_scope_round_trip_strings() {
        for scope in [OverrideScope::Name, OverrideScope::Keyword] {
            assert_eq!(OverrideScope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(OverrideSource::parse("bogus"), None);
    }
}
