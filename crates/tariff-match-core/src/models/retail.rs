//! Retail sale and warehouse stock models.

use serde::{Deserialize, Serialize};

/// Lifecycle of a logged retail sale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Logged, not yet matched to stock
    Pending,
    /// Matched to a warehouse product, stock not yet deducted
    Matched,
    /// Stock deducted (terminal)
    Applied,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Matched => "matched",
            SaleStatus::Applied => "applied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SaleStatus::Pending),
            "matched" => Some(SaleStatus::Matched),
            "applied" => Some(SaleStatus::Applied),
            _ => None,
        }
    }
}

/// A warehouse product suggested for a sale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetailMatchCandidate {
    /// Warehouse product name
    pub product: String,
    /// Edit-distance similarity (0.0 - 1.0)
    pub score: f64,
}

/// A free-text retail sale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetailSale {
    pub id: String,
    /// Text as typed by the cashier, e.g. "Краска Алина 3200"
    pub text: String,
    pub created_at: String,
    pub status: SaleStatus,
    pub matched_product: Option<String>,
    pub match_score: Option<f64>,
    pub candidates: Option<Vec<RetailMatchCandidate>>,
}

impl RetailSale {
    /// Log a new pending sale.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into().trim().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            status: SaleStatus::Pending,
            matched_product: None,
            match_score: None,
            candidates: None,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self.status, SaleStatus::Applied)
    }
}

/// A warehouse stock row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockItem {
    /// Product name as it appears on the supplier invoice
    pub name: String,
    /// Unit of measure ("шт", "кг", "л", ...)
    pub unit: String,
    pub quantity: f64,
    /// Unit price
    pub price: f64,
}

impl StockItem {
    pub fn new(name: impl Into<String>, quantity: f64, price: f64) -> Self {
        Self {
            name: name.into(),
            unit: "шт".into(),
            quantity,
            price,
        }
    }

    /// Stock value at the current quantity.
    pub fn total(&self) -> f64 {
        self.quantity * self.price
    }
}

/// Sales counts per status.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetailTotals {
    pub total: usize,
    pub pending: usize,
    pub matched: usize,
    pub applied: usize,
}

impl RetailTotals {
    pub fn from_sales(sales: &[RetailSale]) -> Self {
        let mut totals = Self {
            total: sales.len(),
            ..Self::default()
        };
        for sale in sales {
            match sale.status {
                SaleStatus::Pending => totals.pending += 1,
                SaleStatus::Matched => totals.matched += 1,
                SaleStatus::Applied => totals.applied += 1,
            }
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sale_is_pending() {
        let sale = RetailSale::new("  Краска Алина 3200 ");
        assert_eq!(sale.text, "Краска Алина 3200");
        assert_eq!(sale.status, SaleStatus::Pending);
        assert!(sale.matched_product.is_none());
        assert!(!sale.is_applied());
    }

    #[test]
    fn test_totals() {
        let mut a = RetailSale::new("a");
        a.status = SaleStatus::Matched;
        let mut b = RetailSale::new("b");
        b.status = SaleStatus::Applied;
        let c = RetailSale::new("c");

        let totals = RetailTotals::from_sales(&[a, b, c]);
        assert_eq!(totals.total, 3);
        assert_eq!(totals.pending, 1);
        assert_eq!(totals.matched, 1);
        assert_eq!(totals.applied, 1);
    }

    #[test]
    fn test_stock_total() {
        let item = StockItem::new("Краска", 4.0, 2.5);
        assert_eq!(item.total(), 10.0);
    }
}
