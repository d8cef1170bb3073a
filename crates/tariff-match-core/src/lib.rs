//! Tariff Match Core Library
//!
//! Resolves free-text product names to tariff (TN VED) codes and matches
//! retail sale text against warehouse stock.
//!
//! # Architecture
//!
//! ```text
//! Product name → Normalization → Keyword override → Name override
//!                                                        │
//!                                    Keyword rule → Exact index match
//!                                                        │
//!                         Candidates (remote fuzzy | token overlap, + embeddings)
//!                                                        │
//!                              ┌─────────────────────────┼─────────────────────┐
//!                              ▼                         ▼                     ▼
//!                       ≥ 0.85 Auto              0.50-0.85 Review        < 0.50 Error
//!                    (override stored)          (ranked options)         (code = "")
//!                              │
//!                              ▼
//!                  Export gate → ESF rows → mapping feedback
//! ```
//!
//! # Core Principle
//!
//! **Ambiguous cases are surfaced, never guessed.** Export refuses to run while
//! any line is unresolved or carries a code the catalog does not know.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence (catalog, overrides, embeddings, stock, sales)
//! - [`models`]: Domain types (CatalogEntry, ResolutionResult, RetailSale, etc.)
//! - [`resolver`]: Normalizer, lexicon, override store and the resolution cascade
//! - [`matcher`]: Token overlap, remote fuzzy and embedding candidate matchers
//! - [`retail`]: Retail sale matching and stock deduction
//! - [`export`]: Tax-portal export gate
//! - [`services`]: External service traits and REST bindings
//! - [`config`]: TOML configuration

pub mod config;
pub mod db;
pub mod export;
pub mod index;
pub mod matcher;
pub mod models;
pub mod resolver;
pub mod retail;
pub mod services;

// Re-export commonly used types
pub use config::MatchConfig;
pub use db::Database;
pub use index::CatalogIndex;
pub use models::{
    CatalogEntry, MatchCandidate, OverrideMapping, OverrideSource, ResolutionResult,
    ResolutionSource, ResolutionStatus, RetailSale, SaleStatus, StockItem,
};
pub use resolver::{Lexicon, Normalizer, OverrideStore, Resolver};
pub use retail::RetailMatcher;

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{info, warn};

use crate::export::{ExportGate, ExportLine};
use crate::matcher::EmbeddingSet;
use crate::services::http::{ChatAssistant, OpenAiEmbeddings, RestCatalogService};
use crate::services::{CatalogVerificationService, LocalCatalogVerifier};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum TariffMatchError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("Export blocked: {0}")]
    ExportBlocked(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<db::DbError> for TariffMatchError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => TariffMatchError::NotFound(what),
            other => TariffMatchError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for TariffMatchError {
    fn from(e: serde_json::Error) -> Self {
        TariffMatchError::SerializationError(e.to_string())
    }
}

impl From<config::ConfigError> for TariffMatchError {
    fn from(e: config::ConfigError) -> Self {
        TariffMatchError::ConfigError(e.to_string())
    }
}

impl From<services::ServiceError> for TariffMatchError {
    fn from(e: services::ServiceError) -> Self {
        TariffMatchError::ServiceError(e.to_string())
    }
}

impl From<resolver::ResolverError> for TariffMatchError {
    fn from(e: resolver::ResolverError) -> Self {
        match e {
            resolver::ResolverError::Database(db) => db.into(),
            other => TariffMatchError::InvalidInput(other.to_string()),
        }
    }
}

impl From<retail::RetailError> for TariffMatchError {
    fn from(e: retail::RetailError) -> Self {
        match e {
            retail::RetailError::Database(db) => db.into(),
            retail::RetailError::AlreadyApplied(id) => {
                TariffMatchError::InvalidInput(format!("sale {} already applied", id))
            }
            retail::RetailError::EmptyText => TariffMatchError::InvalidInput("sale text is empty".into()),
            other => TariffMatchError::NotFound(other.to_string()),
        }
    }
}

impl From<export::ExportError> for TariffMatchError {
    fn from(e: export::ExportError) -> Self {
        TariffMatchError::ExportBlocked(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for TariffMatchError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        TariffMatchError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Install a `tracing` subscriber filtered by `filter` (e.g. "tariff_match_core=debug").
///
/// Only the first call has an effect.
#[uniffi::export]
pub fn init_logging(filter: String) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .try_init();
}

/// Open or create a database at the given path.
///
/// `config_toml` is a TOML document; `None` uses the defaults.
#[uniffi::export]
pub fn open_database(path: String, config_toml: Option<String>) -> Result<Arc<TariffMatchCore>, TariffMatchError> {
    let db = Database::open(&path)?;
    Ok(Arc::new(TariffMatchCore::build(db, parse_config(config_toml)?)?))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory(config_toml: Option<String>) -> Result<Arc<TariffMatchCore>, TariffMatchError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(TariffMatchCore::build(db, parse_config(config_toml)?)?))
}

fn parse_config(config_toml: Option<String>) -> Result<MatchConfig, TariffMatchError> {
    let config = match config_toml {
        Some(content) => MatchConfig::from_toml_str(&content)?,
        None => MatchConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Receives batch progress; return `false` to stop before the next item.
#[uniffi::export(callback_interface)]
pub trait BatchObserver: Send + Sync {
    fn on_item(&self, index: u32, total: u32, result: FfiResolutionResult) -> bool;
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe engine wrapper for FFI.
#[derive(uniffi::Object)]
pub struct TariffMatchCore {
    db: Arc<Mutex<Database>>,
    config: MatchConfig,
    normalizer: Normalizer,
    lexicon: Lexicon,
    store: OverrideStore,
    index: RwLock<Option<CatalogIndex>>,
    remote: Option<Arc<RestCatalogService>>,
    embedder: Option<OpenAiEmbeddings>,
    embeddings: RwLock<Option<EmbeddingSet>>,
    assistant: Option<ChatAssistant>,
}

impl TariffMatchCore {
    fn build(db: Database, config: MatchConfig) -> Result<Self, TariffMatchError> {
        let normalizer = Normalizer::new();
        let index = CatalogIndex::load(&db, &normalizer)?;
        let db = Arc::new(Mutex::new(db));

        let remote = RestCatalogService::from_config(&config.remote)?.map(Arc::new);
        let mut store = OverrideStore::new(db.clone(), config.remote.tenant.as_str());
        if let Some(remote) = &remote {
            store = store.with_remote(remote.clone());
        }

        info!(
            catalog = index.len(),
            remote = remote.is_some(),
            tenant = %config.remote.tenant,
            "engine opened"
        );

        Ok(Self {
            embedder: OpenAiEmbeddings::from_config(&config.embedding)?,
            assistant: ChatAssistant::from_config(&config.assistant)?,
            lexicon: config.lexicon(),
            index: RwLock::new((!index.is_empty()).then_some(index)),
            embeddings: RwLock::new(None),
            db,
            config,
            normalizer,
            store,
            remote,
        })
    }

    /// Build or load catalog embeddings once per loaded catalog.
    fn ensure_embeddings(&self) -> Result<(), TariffMatchError> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };
        let index = self.index.read()?;
        let Some(index) = index.as_ref() else {
            return Ok(());
        };
        if self.embeddings.read()?.as_ref().is_some_and(|set| set.covers(index)) {
            return Ok(());
        }

        let set = {
            let mut db = self.db.lock()?;
            EmbeddingSet::load_or_build(&mut db, index, embedder, self.config.embedding.batch_size)
        };
        match set {
            Ok(set) => *self.embeddings.write()? = Some(set),
            Err(e) => warn!(error = %e, "catalog embeddings unavailable"),
        }
        Ok(())
    }

    /// Run `f` with a resolver wired to every configured collaborator.
    ///
    /// The database lock must not be held by the caller.
    fn with_resolver<T>(&self, f: impl FnOnce(&Resolver<'_>) -> T) -> Result<T, TariffMatchError> {
        self.ensure_embeddings()?;
        let index = self.index.read()?;
        let embeddings = self.embeddings.read()?;

        let mut resolver = Resolver::new(&self.normalizer, &self.lexicon, &self.store)
            .with_thresholds(self.config.thresholds)
            .with_limits(self.config.limits);
        if let Some(index) = index.as_ref() {
            resolver = resolver.with_index(index);
        }
        if let Some(remote) = self.remote.as_deref() {
            resolver = resolver.with_remote(remote);
        }
        // a catalog reload may land while a set is being built for the old one
        let set = embeddings
            .as_ref()
            .filter(|set| index.as_ref().is_some_and(|i| set.covers(i)));
        if let (Some(set), Some(embedder)) = (set, self.embedder.as_ref()) {
            resolver = resolver.with_embeddings(set, embedder);
        }

        Ok(f(&resolver))
    }

    fn run_batch(
        &self,
        names: &[String],
        activity: Option<&str>,
        observer: Option<&dyn BatchObserver>,
    ) -> Result<FfiBatchReport, TariffMatchError> {
        self.with_resolver(|resolver| {
            let mut report = resolver.resolve_batch(names, |progress| {
                let keep_going = observer.map_or(true, |o| {
                    o.on_item(
                        progress.index as u32,
                        progress.total as u32,
                        progress.result.clone().into(),
                    )
                });
                if keep_going {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            });

            let mut suggested = 0;
            if let Some(assistant) = &self.assistant {
                if !report.interrupted && !report.summary.is_clean() {
                    let assist = resolver.assist_unresolved(&mut report.results, activity, assistant);
                    suggested = assist.suggested;
                    report.summary = models::BatchSummary::from_results(&report.results);
                }
            }

            FfiBatchReport {
                total: report.summary.total as u32,
                auto: report.summary.auto as u32,
                review: report.summary.review as u32,
                error: report.summary.error as u32,
                interrupted: report.interrupted,
                catalog_missing: report.catalog_missing,
                assistant_suggested: suggested as u32,
                results: report.results.into_iter().map(Into::into).collect(),
            }
        })
    }

    fn retail_matcher(&self) -> RetailMatcher<'_> {
        let matcher = RetailMatcher::new(&self.normalizer).with_limit(self.config.limits.retail_candidates);
        match &self.assistant {
            Some(assistant) => matcher.with_assistant(assistant),
            None => matcher,
        }
    }

    fn catalog_loaded(&self) -> Result<bool, TariffMatchError> {
        let local = self.index.read()?.as_ref().map_or(false, |i| !i.is_empty());
        Ok(local || self.remote.is_some())
    }
}

#[uniffi::export]
impl TariffMatchCore {
    // =========================================================================
    // Catalog Operations
    // =========================================================================

    /// Replace the local catalog. Returns the number of indexed entries.
    pub fn load_catalog(&self, entries: Vec<FfiCatalogEntry>) -> Result<u32, TariffMatchError> {
        let entries: Vec<CatalogEntry> = entries.into_iter().map(Into::into).collect();
        let index = {
            let mut db = self.db.lock()?;
            CatalogIndex::replace(&mut db, &entries, &self.normalizer)?
        };
        let count = index.len() as u32;

        *self.embeddings.write()? = None;
        *self.index.write()? = (!index.is_empty()).then_some(index);
        Ok(count)
    }

    /// Number of entries in the local catalog.
    pub fn catalog_size(&self) -> Result<u32, TariffMatchError> {
        Ok(self.index.read()?.as_ref().map_or(0, |i| i.len()) as u32)
    }

    // =========================================================================
    // Resolver Operations
    // =========================================================================

    /// Resolve a single product name.
    pub fn resolve(&self, product_name: String) -> Result<FfiResolutionResult, TariffMatchError> {
        self.with_resolver(|r| FfiResolutionResult::from(r.resolve(&product_name)))
    }

    /// Resolve names in order, then ask the assistant about what is left.
    ///
    /// `activity` is an optional business-activity hint for the assistant.
    pub fn resolve_batch(
        &self,
        names: Vec<String>,
        activity: Option<String>,
    ) -> Result<FfiBatchReport, TariffMatchError> {
        self.run_batch(&names, activity.as_deref(), None)
    }

    /// Like `resolve_batch`, reporting each result to `observer`.
    ///
    /// Returning false from the observer stops the batch.
    pub fn resolve_batch_observed(
        &self,
        names: Vec<String>,
        activity: Option<String>,
        observer: Box<dyn BatchObserver>,
    ) -> Result<FfiBatchReport, TariffMatchError> {
        self.run_batch(&names, activity.as_deref(), Some(observer.as_ref()))
    }

    /// Confirm a code for a product name and return the updated result.
    ///
    /// `source` is "manual" (default) or "assistant" when accepting a suggestion.
    pub fn confirm(
        &self,
        product_name: String,
        code: String,
        source: Option<String>,
    ) -> Result<FfiResolutionResult, TariffMatchError> {
        let source = match source.as_deref() {
            None => OverrideSource::Manual,
            Some(s) => OverrideSource::parse(s)
                .ok_or_else(|| TariffMatchError::InvalidInput(format!("unknown source {:?}", s)))?,
        };
        self.with_resolver(|r| -> Result<FfiResolutionResult, TariffMatchError> {
            r.confirm(&product_name, &code, source)?;
            Ok(r.resolve(&product_name).into())
        })?
    }

    /// Confirm a code for every product containing `keyword`.
    pub fn confirm_keyword(&self, keyword: String, code: String) -> Result<(), TariffMatchError> {
        self.with_resolver(|r| r.confirm_keyword(&keyword, &code).map(|_| ()))??;
        Ok(())
    }

    /// Number of stored overrides.
    pub fn override_count(&self) -> u32 {
        self.store.len() as u32
    }

    // =========================================================================
    // Retail Operations
    // =========================================================================

    /// Add or update a stock item.
    pub fn upsert_stock_item(&self, item: FfiStockItem) -> Result<(), TariffMatchError> {
        let db = self.db.lock()?;
        db.upsert_stock_item(&item.into())?;
        Ok(())
    }

    /// All stock items.
    pub fn list_stock_items(&self) -> Result<Vec<FfiStockItem>, TariffMatchError> {
        let db = self.db.lock()?;
        Ok(db.list_stock_items()?.into_iter().map(Into::into).collect())
    }

    /// Log a free-text sale.
    pub fn add_retail_sale(&self, text: String) -> Result<FfiRetailSale, TariffMatchError> {
        let db = self.db.lock()?;
        Ok(self.retail_matcher().add_sale(&db, &text)?.into())
    }

    /// Match every non-applied sale against current stock.
    pub fn sync_retail_sales(&self) -> Result<FfiSyncReport, TariffMatchError> {
        let db = self.db.lock()?;
        let report = self.retail_matcher().sync(&db)?;
        Ok(FfiSyncReport {
            matched: report.matched as u32,
            pending: report.pending as u32,
            skipped: report.skipped as u32,
        })
    }

    /// Deduct stock for a sale and mark it applied.
    ///
    /// `product` overrides the matched product.
    pub fn apply_retail_sale(
        &self,
        sale_id: String,
        product: Option<String>,
    ) -> Result<FfiRetailSale, TariffMatchError> {
        let mut db = self.db.lock()?;
        let (sale, _) = self
            .retail_matcher()
            .apply(&mut db, &sale_id, product.as_deref())?;
        Ok(sale.into())
    }

    /// All sales, newest first.
    pub fn list_retail_sales(&self) -> Result<Vec<FfiRetailSale>, TariffMatchError> {
        let db = self.db.lock()?;
        Ok(db.list_retail_sales()?.into_iter().map(Into::into).collect())
    }

    /// Sales counts per status.
    pub fn retail_totals(&self) -> Result<FfiRetailTotals, TariffMatchError> {
        let db = self.db.lock()?;
        let totals = retail::totals(&db)?;
        Ok(FfiRetailTotals {
            total: totals.total as u32,
            pending: totals.pending as u32,
            matched: totals.matched as u32,
            applied: totals.applied as u32,
        })
    }

    // =========================================================================
    // Export Operations
    // =========================================================================

    /// Export invoice lines as tax-portal JSON.
    ///
    /// Every line is re-resolved; any line that is not Auto, or whose code the
    /// catalog does not confirm, blocks the whole export.
    pub fn export_esf_json(&self, lines: Vec<FfiExportLine>) -> Result<String, TariffMatchError> {
        let lines: Vec<ExportLine> = self.with_resolver(|r| {
            lines
                .into_iter()
                .map(|l| ExportLine {
                    result: r.resolve(&l.product_name),
                    unit: l.unit,
                    price: l.price,
                })
                .collect::<Vec<_>>()
        })?;

        let local = LocalCatalogVerifier::new(&self.db);
        let verifier: &dyn CatalogVerificationService = match self.remote.as_deref() {
            Some(remote) => remote,
            None => &local,
        };
        let document = ExportGate::new(verifier).prepare(&lines, self.catalog_loaded()?)?;

        if let Some(remote) = self.remote.as_deref() {
            export::send_feedback(&lines, &self.normalizer, &self.store, remote);
        }
        Ok(document.to_json()?)
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe catalog entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiCatalogEntry {
    pub code: String,
    pub label: String,
}

impl From<FfiCatalogEntry> for CatalogEntry {
    fn from(entry: FfiCatalogEntry) -> Self {
        CatalogEntry::new(entry.code, entry.label)
    }
}

/// FFI-safe resolution result.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiResolutionResult {
    pub product_name: String,
    /// Empty when status is "Error"
    pub code: String,
    pub label: Option<String>,
    /// "Auto", "Review" or "Error"
    pub status: String,
    pub options: Vec<String>,
    pub score: f64,
    pub source: String,
}

impl From<ResolutionResult> for FfiResolutionResult {
    fn from(result: ResolutionResult) -> Self {
        Self {
            product_name: result.product_name,
            code: result.code,
            label: result.label,
            status: format!("{:?}", result.status),
            options: result.options,
            score: result.score,
            source: format!("{:?}", result.source),
        }
    }
}

/// FFI-safe batch report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiBatchReport {
    pub results: Vec<FfiResolutionResult>,
    pub total: u32,
    pub auto: u32,
    pub review: u32,
    pub error: u32,
    pub interrupted: bool,
    /// No catalog is loaded; load one before fixing items by hand
    pub catalog_missing: bool,
    pub assistant_suggested: u32,
}

/// FFI-safe stock item.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiStockItem {
    pub name: String,
    pub unit: String,
    pub quantity: f64,
    pub price: f64,
    pub total: f64,
}

impl From<StockItem> for FfiStockItem {
    fn from(item: StockItem) -> Self {
        Self {
            total: item.total(),
            name: item.name,
            unit: item.unit,
            quantity: item.quantity,
            price: item.price,
        }
    }
}

impl From<FfiStockItem> for StockItem {
    fn from(item: FfiStockItem) -> Self {
        StockItem {
            name: item.name,
            unit: item.unit,
            quantity: item.quantity,
            price: item.price,
        }
    }
}

/// FFI-safe retail candidate.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRetailCandidate {
    pub product: String,
    pub score: f64,
}

/// FFI-safe retail sale.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRetailSale {
    pub id: String,
    pub text: String,
    pub created_at: String,
    pub status: String,
    pub matched_product: Option<String>,
    pub match_score: Option<f64>,
    pub candidates: Vec<FfiRetailCandidate>,
}

impl From<RetailSale> for FfiRetailSale {
    fn from(sale: RetailSale) -> Self {
        Self {
            id: sale.id,
            text: sale.text,
            created_at: sale.created_at,
            status: sale.status.as_str().to_string(),
            matched_product: sale.matched_product,
            match_score: sale.match_score,
            candidates: sale
                .candidates
                .unwrap_or_default()
                .into_iter()
                .map(|c| FfiRetailCandidate {
                    product: c.product,
                    score: c.score,
                })
                .collect(),
        }
    }
}

/// FFI-safe sync report.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSyncReport {
    pub matched: u32,
    pub pending: u32,
    pub skipped: u32,
}

/// FFI-safe retail totals.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRetailTotals {
    pub total: u32,
    pub pending: u32,
    pub matched: u32,
    pub applied: u32,
}

/// FFI-safe export line.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiExportLine {
    pub product_name: String,
    pub unit: String,
    pub price: f64,
}
