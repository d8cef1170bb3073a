//! Tax-portal (ESF) line export.

use serde::{Deserialize, Serialize};

/// Sign column value for goods.
pub const GOODS_SIGN: &str = "1";

/// Single line of an ESF goods table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EsfRow {
    /// Product name as invoiced
    pub product_name: String,
    /// Portal unit name
    pub unit: String,
    /// Verified tariff code
    pub code: String,
    /// Always [`GOODS_SIGN`]
    pub sign: String,
    /// Unit price
    pub price: f64,
}

impl EsfRow {
    pub fn new(product_name: impl Into<String>, unit: &str, code: impl Into<String>, price: f64) -> Self {
        Self {
            product_name: product_name.into(),
            unit: normalize_unit(unit),
            code: code.into(),
            sign: GOODS_SIGN.to_string(),
            price,
        }
    }
}

/// Goods table ready for upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EsfDocument {
    pub exported_at: String,
    pub rows: Vec<EsfRow>,
}

impl EsfDocument {
    pub fn new(rows: Vec<EsfRow>) -> Self {
        Self {
            exported_at: chrono::Utc::now().to_rfc3339(),
            rows,
        }
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Map invoice units onto the portal's unit names.
pub fn normalize_unit(unit: &str) -> String {
    let unit = unit.trim().to_lowercase();
    match unit.as_str() {
        "" | "шт" | "шт." => "шт".to_string(),
        "п/м" | "п.м." | "пог.м" => "метр".to_string(),
        _ => unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_unit() {
        assert_eq!(normalize_unit("шт."), "шт");
        assert_eq!(normalize_unit(" ШТ "), "шт");
        assert_eq!(normalize_unit("п/м"), "метр");
        assert_eq!(normalize_unit(""), "шт");
        assert_eq!(normalize_unit("кг"), "кг");
    }

    #[test]
    fn test_document_json() {
        let doc = EsfDocument::new(vec![EsfRow::new("Стремянка", "шт.", "7616999008", 4500.0)]);
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"sign\": \"1\""));
        assert!(json.contains("\"unit\": \"шт\""));
        assert!(json.contains("7616999008"));
    }
}
