//! Retail sale matching against warehouse stock.
//!
//! A cashier logs free text such as "Краска Алина 3200"; the matcher strips the
//! trailing price, scores every stock name by normalized edit distance, and
//! records the best product. Stock is only deducted on an explicit apply.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::{Database, DbError};
use crate::models::{RetailMatchCandidate, RetailSale, RetailTotals, SaleStatus, StockItem};
use crate::resolver::Normalizer;
use crate::services::DisambiguationAssistant;

/// Retail errors.
#[derive(Error, Debug)]
pub enum RetailError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    #[error("Sale already applied: {0}")]
    AlreadyApplied(String),

    #[error("Stock item not found: {0}")]
    ProductNotFound(String),

    #[error("Sale text is empty")]
    EmptyText,
}

pub type RetailResult<T> = Result<T, RetailError>;

/// Below this score the disambiguation assistant is consulted.
pub const ASSIST_BELOW: f64 = 0.5;

static TRAILING_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+[\d,.]+(?:\s*(?:сом|kgs|kg|кг|л|шт|р\.|руб\.?))?\.?$").expect("valid regex")
});

/// Strip one trailing price or quantity token ("3200", "3200 сом", "5 kg").
pub fn extract_name(text: &str) -> String {
    let trimmed = text.trim();
    let stripped = TRAILING_AMOUNT.replace(trimmed, "");
    if stripped.trim().is_empty() {
        trimmed.to_string()
    } else {
        stripped.trim().to_string()
    }
}

/// `1 - levenshtein / max_len` over normalized strings.
///
/// Symmetric, `1.0` for equal keys, `0.0` when either side normalizes to empty.
pub fn similarity(normalizer: &Normalizer, a: &str, b: &str) -> f64 {
    let a = normalizer.normalize(a);
    let b = normalizer.normalize(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::normalized_levenshtein(&a, &b)
}

/// Score every label against `name`, best first, scores rounded to 2 decimals.
pub fn build_candidates(
    normalizer: &Normalizer,
    name: &str,
    labels: &[String],
    limit: usize,
) -> Vec<RetailMatchCandidate> {
    let mut candidates: Vec<RetailMatchCandidate> = labels
        .iter()
        .map(|label| RetailMatchCandidate {
            product: label.clone(),
            score: (similarity(normalizer, name, label) * 100.0).round() / 100.0,
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(limit);
    candidates
}

/// Outcome of a sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub matched: usize,
    pub pending: usize,
    /// Applied sales left untouched
    pub skipped: usize,
}

/// Matches retail sales to stock.
pub struct RetailMatcher<'a> {
    normalizer: &'a Normalizer,
    assistant: Option<&'a dyn DisambiguationAssistant>,
    limit: usize,
}

impl<'a> RetailMatcher<'a> {
    pub fn new(normalizer: &'a Normalizer) -> Self {
        Self {
            normalizer,
            assistant: None,
            limit: 5,
        }
    }

    /// Ask an assistant when the best score is below [`ASSIST_BELOW`].
    pub fn with_assistant(mut self, assistant: &'a dyn DisambiguationAssistant) -> Self {
        self.assistant = Some(assistant);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    /// Match one sale against stock names in place.
    ///
    /// Applied sales are returned unchanged. A sale with no candidates stays
    /// Pending.
    pub fn reconcile(&self, sale: &mut RetailSale, stock_names: &[String]) {
        if sale.is_applied() {
            return;
        }

        let name = extract_name(&sale.text);
        let key = self.normalizer.normalize(&name);

        if !key.is_empty() {
            if let Some(exact) = stock_names.iter().find(|s| self.normalizer.normalize(s) == key) {
                debug!(sale = %sale.id, product = %exact, "exact retail match");
                sale.status = SaleStatus::Matched;
                sale.matched_product = Some(exact.clone());
                sale.match_score = Some(1.0);
                sale.candidates = Some(vec![RetailMatchCandidate {
                    product: exact.clone(),
                    score: 1.0,
                }]);
                return;
            }
        }

        let candidates = build_candidates(self.normalizer, &name, stock_names, self.limit);
        let Some(top) = candidates.first() else {
            sale.status = SaleStatus::Pending;
            sale.matched_product = None;
            sale.match_score = None;
            sale.candidates = None;
            return;
        };

        let mut chosen = top.clone();
        if chosen.score < ASSIST_BELOW {
            if let Some(picked) = self.ask_assistant(&name, &candidates) {
                chosen = picked;
            }
        }

        debug!(sale = %sale.id, product = %chosen.product, score = chosen.score, "retail match");
        sale.status = SaleStatus::Matched;
        sale.matched_product = Some(chosen.product);
        sale.match_score = Some(chosen.score);
        sale.candidates = Some(candidates);
    }

    fn ask_assistant(&self, name: &str, candidates: &[RetailMatchCandidate]) -> Option<RetailMatchCandidate> {
        let assistant = self.assistant?;
        let options: Vec<String> = candidates.iter().map(|c| c.product.clone()).collect();
        match assistant.pick(name, &options) {
            Ok(Some(i)) => candidates.get(i).cloned(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, name, "retail assistant failed, keeping top candidate");
                None
            }
        }
    }

    /// Log a new sale as Pending.
    pub fn add_sale(&self, db: &Database, text: &str) -> RetailResult<RetailSale> {
        if text.trim().is_empty() {
            return Err(RetailError::EmptyText);
        }
        let sale = RetailSale::new(text);
        db.insert_retail_sale(&sale)?;
        debug!(sale = %sale.id, "retail sale added");
        Ok(sale)
    }

    /// Re-match every non-applied sale against current stock.
    pub fn sync(&self, db: &Database) -> RetailResult<SyncReport> {
        let stock_names: Vec<String> = db.list_stock_items()?.into_iter().map(|s| s.name).collect();
        let mut report = SyncReport::default();

        for mut sale in db.list_retail_sales()? {
            if sale.is_applied() {
                report.skipped += 1;
                continue;
            }
            self.reconcile(&mut sale, &stock_names);
            db.update_retail_match(&sale)?;
            match sale.status {
                SaleStatus::Matched => report.matched += 1,
                _ => report.pending += 1,
            }
        }

        info!(
            matched = report.matched,
            pending = report.pending,
            skipped = report.skipped,
            "retail sync finished"
        );
        Ok(report)
    }

    /// Deduct one unit of stock and mark the sale Applied.
    ///
    /// `product` defaults to the matched product.
    pub fn apply(&self, db: &mut Database, sale_id: &str, product: Option<&str>) -> RetailResult<(RetailSale, StockItem)> {
        let sale = db
            .get_retail_sale(sale_id)?
            .ok_or_else(|| RetailError::SaleNotFound(sale_id.to_string()))?;
        if sale.is_applied() {
            return Err(RetailError::AlreadyApplied(sale_id.to_string()));
        }

        let product = product
            .map(str::to_string)
            .or(sale.matched_product)
            .ok_or_else(|| RetailError::ProductNotFound(String::new()))?;
        if db.get_stock_item(&product)?.is_none() {
            return Err(RetailError::ProductNotFound(product));
        }

        let (sale, item) = db.apply_retail_sale(sale_id, &product)?;
        info!(sale = %sale.id, product = %item.name, quantity = item.quantity, "retail sale applied");
        Ok((sale, item))
    }
}

/// Counts of sales per status.
pub fn totals(db: &Database) -> RetailResult<RetailTotals> {
    Ok(RetailTotals::from_sales(&db.list_retail_sales()?))
}
