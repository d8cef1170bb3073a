//! Export of resolved invoice lines to the tax portal.
//!
//! Export is irreversible, so the gate refuses the whole document when any
//! line is unresolved or carries a code the catalog does not know.

mod esf;

pub use esf::*;

use thiserror::Error;
use tracing::{info, warn};

use crate::models::{
    is_valid_code, OverrideMapping, OverrideSource, ResolutionResult, ResolutionSource,
};
use crate::resolver::{Normalizer, OverrideStore};
use crate::services::{CatalogVerificationService, RemoteOverrideCache};

/// Export errors.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No catalog loaded")]
    NoCatalogLoaded,

    #[error("Unresolved lines: {0:?}")]
    Unresolved(Vec<String>),

    #[error("Codes not in catalog: {0:?}")]
    IntegrityViolation(Vec<String>),

    #[error("Catalog verification unavailable: {0}")]
    VerificationUnavailable(String),
}

/// One invoice line to export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportLine {
    pub result: ResolutionResult,
    pub unit: String,
    pub price: f64,
}

/// Checks lines and produces the portal document.
pub struct ExportGate<'a> {
    verifier: &'a dyn CatalogVerificationService,
}

impl<'a> ExportGate<'a> {
    pub fn new(verifier: &'a dyn CatalogVerificationService) -> Self {
        Self { verifier }
    }

    /// Build the document, or report every blocking line.
    pub fn prepare(&self, lines: &[ExportLine], catalog_loaded: bool) -> Result<EsfDocument, ExportError> {
        if !catalog_loaded {
            return Err(ExportError::NoCatalogLoaded);
        }

        let unresolved: Vec<String> = lines
            .iter()
            .filter(|l| l.result.final_code().is_none())
            .map(|l| l.result.product_name.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(ExportError::Unresolved(unresolved));
        }

        let malformed: Vec<String> = lines
            .iter()
            .filter(|l| !is_valid_code(&l.result.code))
            .map(|l| l.result.product_name.clone())
            .collect();
        if !malformed.is_empty() {
            return Err(ExportError::IntegrityViolation(malformed));
        }

        let mut codes: Vec<String> = lines.iter().map(|l| l.result.code.clone()).collect();
        codes.sort();
        codes.dedup();
        let known = self
            .verifier
            .codes_exist(&codes)
            .map_err(|e| ExportError::VerificationUnavailable(e.to_string()))?;

        let unknown: Vec<String> = lines
            .iter()
            .filter(|l| !known.contains(&l.result.code))
            .map(|l| l.result.product_name.clone())
            .collect();
        if !unknown.is_empty() {
            warn!(lines = unknown.len(), "export blocked by unknown codes");
            return Err(ExportError::IntegrityViolation(unknown));
        }

        let rows = lines
            .iter()
            .map(|l| EsfRow::new(&l.result.product_name, &l.unit, &l.result.code, l.price))
            .collect::<Vec<_>>();
        info!(rows = rows.len(), "export prepared");
        Ok(EsfDocument::new(rows))
    }
}

/// Mapping source recorded for an exported line.
pub fn feedback_source(source: ResolutionSource) -> OverrideSource {
    match source {
        ResolutionSource::Assistant => OverrideSource::Assistant,
        ResolutionSource::Override | ResolutionSource::KeywordOverride => OverrideSource::Manual,
        _ => OverrideSource::Auto,
    }
}

/// Share exported mappings with other sessions. Returns how many were sent.
///
/// The source stored with a confirmed override wins over the result source;
/// mappings that came from the remote cache are not sent back. Failures are
/// logged and skipped, the export itself already succeeded.
pub fn send_feedback(
    lines: &[ExportLine],
    normalizer: &Normalizer,
    store: &OverrideStore,
    remote: &dyn RemoteOverrideCache,
) -> usize {
    let mut sent = 0;
    for line in lines {
        let Some(code) = line.result.final_code() else {
            continue;
        };
        let key = normalizer.normalize(&line.result.product_name);
        if key.is_empty() {
            continue;
        }

        let source = match store.mapping(&key) {
            Some(stored) if stored.code == code => stored.source,
            _ => feedback_source(line.result.source),
        };
        if source == OverrideSource::Remote {
            continue;
        }

        let mapping = OverrideMapping::name(key, code, source);
        match remote.upsert(&mapping) {
            Ok(()) => sent += 1,
            Err(e) => warn!(error = %e, key = %mapping.key, "mapping feedback failed"),
        }
    }
    info!(sent, of = lines.len(), "mapping feedback sent");
    sent
}
