//! Remote fuzzy-search matcher.

use tracing::debug;

use super::{finalize_candidates, CandidateMatcher, MatchError, MatchQuery};
use crate::models::MatchCandidate;
use crate::services::CatalogQueryService;

/// Delegates to the catalog service, then applies the category gate locally.
pub struct RemoteMatcher<'a> {
    service: &'a dyn CatalogQueryService,
}

impl<'a> RemoteMatcher<'a> {
    pub fn new(service: &'a dyn CatalogQueryService) -> Self {
        Self { service }
    }
}

impl CandidateMatcher for RemoteMatcher<'_> {
    fn candidates(&self, query: &MatchQuery<'_>, limit: usize) -> Result<Vec<MatchCandidate>, MatchError> {
        if query.key.is_empty() {
            return Err(MatchError::EmptyQuery);
        }

        let rows = self.service.fuzzy_match(query.key, limit)?;
        let returned = rows.len();
        let kept: Vec<MatchCandidate> = rows
            .into_iter()
            .filter(|r| query.allows_code(&r.code))
            .map(|r| MatchCandidate::new(r.code, r.name, r.similarity))
            .collect();

        debug!(key = query.key, returned, kept = kept.len(), "remote candidates");
        Ok(finalize_candidates(kept, limit))
    }

    fn name(&self) -> &'static str {
        "remote_fuzzy"
    }
}
