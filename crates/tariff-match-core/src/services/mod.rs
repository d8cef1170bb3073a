//! External collaborators consumed by the resolver.
//!
//! Every service is a blocking trait object so the engine can run against the
//! hosted REST backend ([`http`]), the local database, or test doubles.

pub mod http;

use std::collections::HashSet;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::{Database, DbError};
use crate::models::OverrideMapping;
use tariff_match_llm::ClassifyItem;

/// External service errors.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl From<DbError> for ServiceError {
    fn from(e: DbError) -> Self {
        ServiceError::Unavailable(e.to_string())
    }
}

impl From<tariff_match_llm::ExtractionError> for ServiceError {
    fn from(e: tariff_match_llm::ExtractionError) -> Self {
        ServiceError::Decode(e.to_string())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Row returned by the catalog fuzzy search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuzzyRow {
    pub name: String,
    pub code: String,
    pub similarity: f64,
}

/// Server-side fuzzy search over the full catalog.
pub trait CatalogQueryService: Send + Sync {
    /// Rows ordered by similarity descending; empty on no match.
    fn fuzzy_match(&self, query: &str, limit: usize) -> ServiceResult<Vec<FuzzyRow>>;
}

/// Authoritative catalog membership check used before export.
pub trait CatalogVerificationService: Send + Sync {
    fn codes_exist(&self, codes: &[String]) -> ServiceResult<HashSet<String>>;
}

/// Text embedding provider.
pub trait EmbeddingService: Send + Sync {
    /// Vectors in input order. May return fewer than requested.
    fn embed(&self, texts: &[String]) -> ServiceResult<Vec<Vec<f32>>>;
}

/// Suggested code for one classification item.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub id: String,
    pub code: String,
}

/// Batch tariff code suggestion.
pub trait ClassificationAssistant: Send + Sync {
    fn classify(&self, activity: Option<&str>, items: &[ClassifyItem]) -> ServiceResult<Vec<Suggestion>>;
}

/// Picks the best option for a retail sale, or defers with `None`.
pub trait DisambiguationAssistant: Send + Sync {
    fn pick(&self, name: &str, options: &[String]) -> ServiceResult<Option<usize>>;
}

/// Shared cross-session mapping table.
pub trait RemoteOverrideCache: Send + Sync {
    fn fetch_all(&self) -> ServiceResult<Vec<OverrideMapping>>;
    fn upsert(&self, mapping: &OverrideMapping) -> ServiceResult<()>;
}

/// Verifies codes against the locally stored catalog.
pub struct LocalCatalogVerifier<'a> {
    db: &'a Mutex<Database>,
}

impl<'a> LocalCatalogVerifier<'a> {
    pub fn new(db: &'a Mutex<Database>) -> Self {
        Self { db }
    }
}

impl CatalogVerificationService for LocalCatalogVerifier<'_> {
    fn codes_exist(&self, codes: &[String]) -> ServiceResult<HashSet<String>> {
        let db = self
            .db
            .lock()
            .map_err(|_| ServiceError::Unavailable("database lock poisoned".into()))?;
        Ok(db.existing_catalog_codes(codes)?.into_iter().collect())
    }
}
