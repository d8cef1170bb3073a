//! Embedding cosine-similarity matcher.
//!
//! The catalog is embedded once per fingerprint, in batches, and persisted; a
//! query costs one embedding call.

use tracing::{debug, info, warn};

use super::{finalize_candidates, CandidateMatcher, MatchError, MatchQuery};
use crate::db::{Database, DbResult, EmbeddingRecord};
use crate::index::CatalogIndex;
use crate::models::MatchCandidate;
use crate::services::EmbeddingService;

/// Precomputed `(key, code, vector)` triples for one catalog.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingSet {
    fingerprint: String,
    records: Vec<EmbeddingRecord>,
}

impl EmbeddingSet {
    /// Embed every indexed label in batches of `batch_size`.
    ///
    /// A failed batch is skipped and a short result only covers the leading
    /// texts of its batch, so the set may be partial.
    pub fn build(index: &CatalogIndex, service: &dyn EmbeddingService, batch_size: usize) -> Self {
        let entries = index.entries();
        let mut records = Vec::with_capacity(entries.len());

        for batch in entries.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|e| e.key.clone()).collect();
            match service.embed(&texts) {
                Ok(vectors) => {
                    if vectors.len() < batch.len() {
                        warn!(
                            requested = batch.len(),
                            returned = vectors.len(),
                            "short embedding batch"
                        );
                    }
                    for (entry, vector) in batch.iter().zip(vectors) {
                        if vector.is_empty() {
                            continue;
                        }
                        records.push(EmbeddingRecord {
                            key: entry.key.clone(),
                            code: entry.entry.code.clone(),
                            vector,
                        });
                    }
                }
                Err(e) => warn!(error = %e, size = batch.len(), "embedding batch failed"),
            }
        }

        Self {
            fingerprint: index.fingerprint().to_string(),
            records,
        }
    }

    /// Reuse vectors persisted for this catalog, or build and persist them.
    pub fn load_or_build(
        db: &mut Database,
        index: &CatalogIndex,
        service: &dyn EmbeddingService,
        batch_size: usize,
    ) -> DbResult<Self> {
        let records = db.load_embeddings(index.fingerprint())?;
        if !records.is_empty() {
            info!(vectors = records.len(), "reusing stored catalog embeddings");
            return Ok(Self {
                fingerprint: index.fingerprint().to_string(),
                records,
            });
        }

        let set = Self::build(index, service, batch_size);
        if !set.is_empty() {
            db.save_embeddings(&set.fingerprint, &set.records)?;
        }
        info!(vectors = set.len(), of = index.len(), "catalog embeddings built");
        Ok(set)
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether these vectors were built for `index`'s catalog.
    pub fn covers(&self, index: &CatalogIndex) -> bool {
        self.fingerprint == index.fingerprint()
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Cosine similarity; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Ranks the embedding set against the query embedding.
pub struct EmbeddingMatcher<'a> {
    set: &'a EmbeddingSet,
    service: &'a dyn EmbeddingService,
    index: Option<&'a CatalogIndex>,
}

impl<'a> EmbeddingMatcher<'a> {
    pub fn new(set: &'a EmbeddingSet, service: &'a dyn EmbeddingService) -> Self {
        Self {
            set,
            service,
            index: None,
        }
    }

    /// Use the index to report catalog labels instead of normalized keys.
    pub fn with_labels(mut self, index: &'a CatalogIndex) -> Self {
        self.index = Some(index);
        self
    }
}

impl CandidateMatcher for EmbeddingMatcher<'_> {
    fn candidates(&self, query: &MatchQuery<'_>, limit: usize) -> Result<Vec<MatchCandidate>, MatchError> {
        if query.key.is_empty() {
            return Err(MatchError::EmptyQuery);
        }
        if self.set.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = match self.service.embed(&[query.key.to_string()])?.into_iter().next() {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };

        let scored: Vec<MatchCandidate> = self
            .set
            .records()
            .iter()
            .filter(|r| query.allows_code(&r.code) && query.allows_label(&r.key))
            .map(|r| {
                let label = self
                    .index
                    .and_then(|i| i.label_for(&r.code))
                    .unwrap_or(&r.key);
                let score = cosine_similarity(&query_vector, &r.vector) as f64;
                MatchCandidate::new(&r.code, label, score)
            })
            .filter(|c| c.score > 0.0)
            .collect();

        debug!(key = query.key, scored = scored.len(), "embedding candidates");
        Ok(finalize_candidates(scored, limit))
    }

    fn name(&self) -> &'static str {
        "embedding"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::models::CatalogEntry;
    use crate::resolver::Normalizer;
    use crate::services::{ServiceError, ServiceResult};

    /// Embeds text as letter counts of a, l, d, r.
    struct LetterCounts {
        calls: AtomicUsize,
        max_per_call: usize,
    }

    impl LetterCounts {
        fn new(max_per_call: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                max_per_call,
            }
        }
    }

    impl EmbeddingService for LetterCounts {
        fn embed(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .take(self.max_per_call)
                .map(|t| {
                    ['a', 'l', 'd', 'r']
                        .iter()
                        .map(|c| t.chars().filter(|x| x == c).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    struct Failing;

    impl EmbeddingService for Failing {
        fn embed(&self, _texts: &[String]) -> ServiceResult<Vec<Vec<f32>>> {
            Err(ServiceError::Unavailable("quota".into()))
        }
    }

    fn index() -> CatalogIndex {
        CatalogIndex::from_entries(
            vec![
                CatalogEntry::new("7616999008", "Aluminum ladder"),
                CatalogEntry::new("8467211000", "Drill"),
                CatalogEntry::new("3214101009", "Paint"),
            ],
            &Normalizer::new(),
        )
    }

    #[test]
    fn test_cosine() {
        assert!((cosine_similarity(&[1.0, 2.0], &[1.0, 2.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_set_only_covers_its_own_catalog() {
        let service = LetterCounts::new(usize::MAX);
        let old = index();
        let set = EmbeddingSet::build(&old, &service, 10);
        assert!(set.covers(&old));

        let reloaded = CatalogIndex::from_entries(
            vec![CatalogEntry::new("6109100000", "T-shirts")],
            &Normalizer::new(),
        );
        assert!(!set.covers(&reloaded));
        assert!(!EmbeddingSet::default().covers(&old));
    }

    #[test]
    fn test_build_in_batches() {
        let service = LetterCounts::new(usize::MAX);
        let set = EmbeddingSet::build(&index(), &service, 2);
        assert_eq!(set.len(), 3);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_short_result_tolerated() {
        let service = LetterCounts::new(1);
        let set = EmbeddingSet::build(&index(), &service, 2);
        // one vector per batch
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_failed_batches_leave_empty_set() {
        let set = EmbeddingSet::build(&index(), &Failing, 50);
        assert!(set.is_empty());
    }

    #[test]
    fn test_load_or_build_reuses_vectors() {
        let mut db = Database::open_in_memory().unwrap();
        let index = index();
        let service = LetterCounts::new(usize::MAX);

        let first = EmbeddingSet::load_or_build(&mut db, &index, &service, 50).unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);

        let second = EmbeddingSet::load_or_build(&mut db, &index, &service, 50).unwrap();
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.records(), second.records());
    }

    #[test]
    fn test_matcher_ranks_by_cosine() {
        let index = index();
        let service = LetterCounts::new(usize::MAX);
        let set = EmbeddingSet::build(&index, &service, 50);
        let matcher = EmbeddingMatcher::new(&set, &service).with_labels(&index);

        let results = matcher
            .candidates(&MatchQuery::plain("aluminum ladder"), 3)
            .unwrap();
        assert_eq!(results[0].code, "7616999008");
        assert_eq!(results[0].label, "Aluminum ladder");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results.iter().all(|c| (0.0..=1.0).contains(&c.score)));
    }

    #[test]
    fn test_matcher_query_failure() {
        let index = index();
        let set = EmbeddingSet::build(&index, &LetterCounts::new(usize::MAX), 50);
        let failing = Failing;
        let matcher = EmbeddingMatcher::new(&set, &failing);
        assert!(matches!(
            matcher.candidates(&MatchQuery::plain("drill"), 3),
            Err(MatchError::Service(_))
        ));
    }
}
