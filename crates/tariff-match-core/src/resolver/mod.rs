//! Tariff code resolver.
//!
//! Pipeline: Normalization → Keyword override → Name override → Keyword rule
//! → Exact index match → Candidate matching → Three-tier policy

mod normalizer;
mod lexicon;
mod overrides;

pub use lexicon::*;
pub use normalizer::*;
pub use overrides::*;

use std::collections::HashMap;
use std::ops::ControlFlow;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{Limits, Thresholds};
use crate::index::CatalogIndex;
use crate::matcher::{
    finalize_candidates, CandidateMatcher, EmbeddingMatcher, EmbeddingSet, MatchQuery,
    RemoteMatcher, TokenOverlapMatcher,
};
use crate::models::{
    is_valid_code, BatchSummary, MatchCandidate, OverrideMapping, OverrideSource,
    ResolutionResult, ResolutionSource, ResolutionStatus,
};
use crate::services::{CatalogQueryService, ClassificationAssistant, EmbeddingService};
use tariff_match_llm::{extract_code, ClassifyItem};

/// Resolver errors.
#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Database error: {0}")]
    Database(#[from] crate::db::DbError),

    #[error("Not a tariff code: {0:?}")]
    InvalidCode(String),

    #[error("Product name is empty after normalization")]
    EmptyName,
}

pub type ResolverResult<T> = Result<T, ResolverError>;

/// Progress of a running batch, reported after each item.
#[derive(Debug)]
pub struct BatchProgress<'p> {
    /// Zero-based position of the finished item
    pub index: usize,
    pub total: usize,
    pub result: &'p ResolutionResult,
}

/// Outcome of a batch resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// One result per processed item, in input order
    pub results: Vec<ResolutionResult>,
    pub summary: BatchSummary,
    /// The progress callback stopped the batch early
    pub interrupted: bool,
    /// No catalog was available; load one instead of fixing items by hand
    pub catalog_missing: bool,
}

/// Outcome of an assistant pass over unresolved items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssistReport {
    /// Items that received a suggestion
    pub suggested: usize,
    /// Chunks whose assistant call failed
    pub failed_chunks: usize,
}

/// Resolver coordinating the cascade for one tenant.
pub struct Resolver<'a> {
    normalizer: &'a Normalizer,
    lexicon: &'a Lexicon,
    store: &'a OverrideStore,
    index: Option<&'a CatalogIndex>,
    remote: Option<&'a dyn CatalogQueryService>,
    embeddings: Option<(&'a EmbeddingSet, &'a dyn EmbeddingService)>,
    thresholds: Thresholds,
    limits: Limits,
}

impl<'a> Resolver<'a> {
    /// Create a resolver with default thresholds and no catalog.
    pub fn new(normalizer: &'a Normalizer, lexicon: &'a Lexicon, store: &'a OverrideStore) -> Self {
        Self {
            normalizer,
            lexicon,
            store,
            index: None,
            remote: None,
            embeddings: None,
            thresholds: Thresholds::default(),
            limits: Limits::default(),
        }
    }

    /// Use a loaded local catalog (exact tier and token-overlap fallback).
    pub fn with_index(mut self, index: &'a CatalogIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// Prefer server-side fuzzy search for candidates.
    pub fn with_remote(mut self, remote: &'a dyn CatalogQueryService) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Consult embeddings when the primary matcher finds nothing reviewable.
    pub fn with_embeddings(mut self, set: &'a EmbeddingSet, service: &'a dyn EmbeddingService) -> Self {
        self.embeddings = Some((set, service));
        self
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Whether any catalog source is available.
    pub fn has_catalog(&self) -> bool {
        self.remote.is_some() || self.index.map_or(false, |i| !i.is_empty())
    }

    /// Resolve a product name. Never fails: problems surface as `Error` results.
    pub fn resolve(&self, product_name: &str) -> ResolutionResult {
        let key = self.normalizer.normalize(product_name);
        if key.is_empty() {
            debug!(product_name, "empty key");
            return ResolutionResult::unresolved(product_name, 0.0);
        }
        self.resolve_key(product_name, &key)
    }

    fn resolve_key(&self, product_name: &str, key: &str) -> ResolutionResult {
        // Step 1: keyword confirmed by a human
        if let Some((keyword, code)) = self.store.keyword_match(key) {
            debug!(key, keyword = %keyword, code = %code, "keyword override");
            return ResolutionResult::certain(
                product_name,
                code.clone(),
                self.label_for(&code),
                ResolutionSource::KeywordOverride,
            );
        }

        // Step 2: confirmed name
        if let Some(code) = self.store.get(key) {
            debug!(key, code = %code, "override hit");
            return ResolutionResult::certain(
                product_name,
                code.clone(),
                self.label_for(&code),
                ResolutionSource::Override,
            );
        }

        // Step 3: lexicon rule
        if let Some(code) = self.lexicon.match_keyword_rule(key) {
            debug!(key, code, "keyword rule");
            return ResolutionResult::certain(
                product_name,
                code,
                self.label_for(code),
                ResolutionSource::KeywordRule,
            );
        }

        if !self.has_catalog() {
            debug!(key, "no catalog loaded");
            return ResolutionResult::unresolved(product_name, 0.0);
        }

        // Step 4: exact label
        if let Some(entry) = self.index.and_then(|i| i.exact(key)) {
            debug!(key, code = %entry.code, "exact match");
            self.remember(key, &entry.code);
            return ResolutionResult::certain(
                product_name,
                entry.code.clone(),
                Some(entry.label.clone()),
                ResolutionSource::ExactMatch,
            );
        }

        // Step 5: candidates
        let filter = self.lexicon.category_filter(key);
        let mut include_tokens: Vec<String> = Vec::new();
        for hit in self.lexicon.extract_keyword_hits(key) {
            for token in hit.include_tokens {
                if !include_tokens.contains(&token) {
                    include_tokens.push(token);
                }
            }
        }
        let query = MatchQuery {
            key,
            filter: filter.as_ref(),
            include_tokens: &include_tokens,
        };

        let (candidates, source) = self.candidates(&query);
        self.decide(product_name, key, candidates, source)
    }

    /// Primary candidates (remote, else local), topped up by embeddings.
    fn candidates(&self, query: &MatchQuery<'_>) -> (Vec<MatchCandidate>, ResolutionSource) {
        let limit = self.limits.candidate_limit;
        let mut source = ResolutionSource::Unresolved;
        let mut candidates = Vec::new();

        if let Some(remote) = self.remote {
            let matcher = RemoteMatcher::new(remote);
            match matcher.candidates(query, limit) {
                Ok(found) => {
                    debug!(matcher = matcher.name(), key = query.key, found = found.len(), "candidates");
                    candidates = found;
                    source = ResolutionSource::RemoteFuzzy;
                }
                Err(e) => warn!(matcher = matcher.name(), error = %e, key = query.key, "search failed, using local index"),
            }
        }

        if candidates.is_empty() {
            if let Some(index) = self.index.filter(|i| !i.is_empty()) {
                let matcher = TokenOverlapMatcher::new(index);
                match matcher.candidates(query, limit) {
                    Ok(found) => {
                        debug!(matcher = matcher.name(), key = query.key, found = found.len(), "candidates");
                        candidates = found;
                        source = ResolutionSource::TokenOverlap;
                    }
                    Err(e) => warn!(matcher = matcher.name(), error = %e, key = query.key, "search failed"),
                }
            }
        }

        let top = candidates.first().map_or(0.0, |c| c.score);
        if top < self.thresholds.review {
            if let Some((set, service)) = self.embeddings {
                let mut matcher = EmbeddingMatcher::new(set, service);
                if let Some(index) = self.index {
                    matcher = matcher.with_labels(index);
                }
                match matcher.candidates(query, limit) {
                    Ok(semantic) => {
                        debug!(matcher = matcher.name(), key = query.key, found = semantic.len(), "candidates");
                        let semantic_top = semantic.first().map(|c| (c.code.clone(), c.score));
                        let mut merged = candidates;
                        merged.extend(semantic);
                        candidates = finalize_candidates(merged, limit);
                        if let (Some((code, score)), Some(best)) = (semantic_top, candidates.first()) {
                            if best.code == code && best.score == score && score > top {
                                source = ResolutionSource::Embedding;
                            }
                        }
                    }
                    Err(e) => warn!(matcher = matcher.name(), error = %e, key = query.key, "search failed"),
                }
            }
        }

        (candidates, source)
    }

    /// Apply the three-tier policy to ranked candidates.
    fn decide(
        &self,
        product_name: &str,
        key: &str,
        candidates: Vec<MatchCandidate>,
        source: ResolutionSource,
    ) -> ResolutionResult {
        let top = match candidates.first() {
            Some(top) => top.clone(),
            None => {
                debug!(key, "no candidates");
                return ResolutionResult::unresolved(product_name, 0.0);
            }
        };

        let status = if top.score >= self.thresholds.auto_accept {
            ResolutionStatus::Auto
        } else if top.score >= self.thresholds.review {
            ResolutionStatus::Review
        } else {
            debug!(key, score = top.score, "best candidate below review threshold");
            return ResolutionResult::unresolved(product_name, top.score);
        };

        if status == ResolutionStatus::Auto {
            self.remember(key, &top.code);
        }

        debug!(key, code = %top.code, score = top.score, ?status, ?source, "resolved");
        ResolutionResult {
            product_name: product_name.to_string(),
            code: top.code,
            label: Some(top.label),
            status,
            options: candidates
                .iter()
                .take(self.limits.review_options)
                .map(|c| c.code.clone())
                .collect(),
            score: top.score,
            source,
        }
    }

    /// Store an auto-accepted mapping; failures are only logged.
    fn remember(&self, key: &str, code: &str) {
        let mapping = OverrideMapping::name(key, code, OverrideSource::Auto);
        if let Err(e) = self.store.put(mapping) {
            warn!(error = %e, key, "failed to store auto-accepted override");
        }
    }

    fn label_for(&self, code: &str) -> Option<String> {
        self.index
            .and_then(|i| i.label_for(code))
            .map(str::to_string)
    }

    /// Record a human pick for a product name.
    ///
    /// `raw_code` may carry surrounding text; the first 8-12 digit run is used.
    pub fn confirm(&self, product_name: &str, raw_code: &str, source: OverrideSource) -> ResolverResult<OverrideMapping> {
        let key = self.normalizer.normalize(product_name);
        if key.is_empty() {
            return Err(ResolverError::EmptyName);
        }
        let code = parse_code(raw_code)?;

        let mapping = OverrideMapping::name(key, code, source);
        self.store.put(mapping.clone())?;
        info!(key = %mapping.key, code = %mapping.code, "override confirmed");
        Ok(mapping)
    }

    /// Record a human-confirmed keyword → code mapping.
    pub fn confirm_keyword(&self, keyword: &str, raw_code: &str) -> ResolverResult<OverrideMapping> {
        let keyword = Normalizer::without_abbreviations().normalize(keyword);
        if keyword.is_empty() {
            return Err(ResolverError::EmptyName);
        }
        let code = parse_code(raw_code)?;

        let mapping = OverrideMapping::keyword(keyword, code);
        self.store.put(mapping.clone())?;
        info!(keyword = %mapping.key, code = %mapping.code, "keyword override confirmed");
        Ok(mapping)
    }

    /// Resolve names one at a time.
    ///
    /// `on_progress` runs after each item and may stop the batch with
    /// `ControlFlow::Break`. A key repeated within the batch is matched once.
    pub fn resolve_batch<F>(&self, names: &[String], mut on_progress: F) -> BatchReport
    where
        F: FnMut(&BatchProgress<'_>) -> ControlFlow<()>,
    {
        let catalog_missing = !self.has_catalog();
        let mut memo: HashMap<String, ResolutionResult> = HashMap::new();
        let mut results = Vec::with_capacity(names.len());
        let mut summary = BatchSummary::default();
        let mut interrupted = false;

        for (i, name) in names.iter().enumerate() {
            let key = self.normalizer.normalize(name);
            let result = match memo.get(&key) {
                Some(previous) => ResolutionResult {
                    product_name: name.clone(),
                    ..previous.clone()
                },
                None => {
                    let result = if key.is_empty() {
                        ResolutionResult::unresolved(name.as_str(), 0.0)
                    } else {
                        self.resolve_key(name, &key)
                    };
                    memo.insert(key, result.clone());
                    result
                }
            };

            summary.record(result.status);
            results.push(result);

            let progress = BatchProgress {
                index: i,
                total: names.len(),
                result: &results[i],
            };
            if on_progress(&progress).is_break() && i + 1 < names.len() {
                interrupted = true;
                break;
            }
        }

        info!(
            total = summary.total,
            auto = summary.auto,
            review = summary.review,
            error = summary.error,
            interrupted,
            catalog_missing,
            "batch resolved"
        );

        BatchReport {
            results,
            summary,
            interrupted,
            catalog_missing,
        }
    }

    /// Ask the classification assistant about every non-Auto result.
    ///
    /// Suggestions become `Review` with source `Assistant` and are never
    /// accepted automatically. A failed chunk leaves its items unchanged.
    pub fn assist_unresolved(
        &self,
        results: &mut [ResolutionResult],
        activity: Option<&str>,
        assistant: &dyn ClassificationAssistant,
    ) -> AssistReport {
        let pending: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.needs_attention() && !r.product_name.trim().is_empty())
            .map(|(i, _)| i)
            .collect();

        let mut report = AssistReport::default();
        for chunk in pending.chunks(self.limits.assistant_chunk.max(1)) {
            let items: Vec<ClassifyItem> = chunk
                .iter()
                .map(|&i| ClassifyItem {
                    id: i.to_string(),
                    name: results[i].product_name.clone(),
                })
                .collect();

            let suggestions = match assistant.classify(activity, &items) {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, items = chunk.len(), "assistant chunk failed");
                    report.failed_chunks += 1;
                    continue;
                }
            };

            for suggestion in suggestions {
                let Some(i) = suggestion.id.trim().parse::<usize>().ok().filter(|i| chunk.contains(i)) else {
                    warn!(id = %suggestion.id, "assistant returned unknown id");
                    continue;
                };
                let Ok(code) = parse_code(&suggestion.code) else {
                    continue;
                };

                let result = &mut results[i];
                let mut options = vec![code.clone()];
                options.extend(result.options.iter().filter(|o| **o != code).cloned());
                options.truncate(self.limits.review_options.max(1));

                result.label = self.label_for(&code);
                result.code = code;
                result.status = ResolutionStatus::Review;
                result.source = ResolutionSource::Assistant;
                result.options = options;
                report.suggested += 1;
            }
        }

        info!(
            suggested = report.suggested,
            failed_chunks = report.failed_chunks,
            "assistant pass finished"
        );
        report
    }

    /// Get the normalizer for direct access.
    pub fn normalizer(&self) -> &Normalizer {
        self.normalizer
    }
}

/// First well-formed tariff code in `raw`.
fn parse_code(raw: &str) -> ResolverResult<String> {
    extract_code(raw)
        .filter(|c| is_valid_code(c))
        .ok_or_else(|| ResolverError::InvalidCode(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::db::Database;
    use crate::models::CatalogEntry;

    fn store() -> OverrideStore {
        OverrideStore::new(Arc::new(Mutex::new(Database::open_in_memory().unwrap())), "t")
    }

    fn index(normalizer: &Normalizer) -> CatalogIndex {
        CatalogIndex::from_entries(
            vec![
                CatalogEntry::new("7616999008", "Aluminum ladder"),
                CatalogEntry::new("8467211000", "Drills, electric"),
            ],
            normalizer,
        )
    }

    #[test]
    fn test_empty_name_is_error() {
        let (normalizer, lexicon, store) = (Normalizer::new(), Lexicon::default(), store());
        let resolver = Resolver::new(&normalizer, &lexicon, &store);
        let result = resolver.resolve("  ,, ");
        assert_eq!(result.status, ResolutionStatus::Error);
        assert_eq!(result.code, "");
    }

    #[test]
    fn test_no_catalog_is_error_but_rules_still_apply() {
        let (normalizer, lexicon, store) = (Normalizer::new(), Lexicon::default(), store());
        let resolver = Resolver::new(&normalizer, &lexicon, &store);
        assert!(!resolver.has_catalog());

        assert_eq!(resolver.resolve("Ladder.").status, ResolutionStatus::Error);

        let rule = resolver.resolve("Стремянка 7 ступеней");
        assert_eq!(rule.status, ResolutionStatus::Auto);
        assert_eq!(rule.source, ResolutionSource::KeywordRule);
        assert_eq!(rule.code, "7616999008");
    }

    #[test]
    fn test_exact_match_is_remembered() {
        let (normalizer, lexicon, store) = (Normalizer::new(), Lexicon::default(), store());
        let index = index(&normalizer);
        let resolver = Resolver::new(&normalizer, &lexicon, &store).with_index(&index);

        let result = resolver.resolve("ladder.");
        assert_eq!(result.source, ResolutionSource::ExactMatch);
        assert_eq!(result.label.as_deref(), Some("Aluminum ladder"));
        assert_eq!(store.get("aluminum ladder").as_deref(), Some("7616999008"));

        assert_eq!(resolver.resolve("Aluminum Ladder").source, ResolutionSource::Override);
    }

    #[test]
    fn test_confirm_validates_code() {
        let (normalizer, lexicon, store) = (Normalizer::new(), Lexicon::default(), store());
        let resolver = Resolver::new(&normalizer, &lexicon, &store);

        assert!(matches!(
            resolver.confirm("Краска", "32-14", OverrideSource::Manual),
            Err(ResolverError::InvalidCode(_))
        ));
        assert!(matches!(
            resolver.confirm("  ", "3214101009", OverrideSource::Manual),
            Err(ResolverError::EmptyName)
        ));

        let mapping = resolver
            .confirm("Краска белая", "код 3214101009", OverrideSource::Manual)
            .unwrap();
        assert_eq!(mapping.code, "3214101009");
        assert_eq!(resolver.resolve("КРАСКА  белая").code, "3214101009");
    }

    #[test]
    fn test_keyword_override_beats_name_override() {
        let (normalizer, lexicon, store) = (Normalizer::new(), Lexicon::default(), store());
        let resolver = Resolver::new(&normalizer, &lexicon, &store);

        resolver
            .confirm("эмаль пф-115 белая", "3208909100", OverrideSource::Manual)
            .unwrap();
        resolver.confirm_keyword("Эмаль", "3208109000").unwrap();

        let result = resolver.resolve("Эмаль ПФ-115 белая");
        assert_eq!(result.source, ResolutionSource::KeywordOverride);
        assert_eq!(result.code, "3208109000");
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("7616999008").unwrap(), "7616999008");
        assert!(parse_code("761699").is_err());
    }

    #[test]
    fn test_overlong_code_is_rejected_not_truncated() {
        let (normalizer, lexicon, store) = (Normalizer::new(), Lexicon::default(), store());
        let resolver = Resolver::new(&normalizer, &lexicon, &store);

        assert!(matches!(
            resolver.confirm("Краска", "7616999008123", OverrideSource::Manual),
            Err(ResolverError::InvalidCode(_))
        ));
        assert!(store.get("краска").is_none());
    }
}
