//! Tariff catalog models.

use serde::{Deserialize, Serialize};

/// Shortest tariff code accepted from a catalog.
pub const MIN_CODE_DIGITS: usize = 8;

/// Longest tariff code accepted from a catalog.
pub const MAX_CODE_DIGITS: usize = 12;

/// A single row of the tariff code catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CatalogEntry {
    /// Fixed-format numeric code (e.g., "7616999008")
    pub code: String,
    /// Free-text description of the goods covered by the code
    pub label: String,
}

impl CatalogEntry {
    /// Create a catalog entry, trimming both fields.
    pub fn new(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into().trim().to_string(),
            label: label.into().trim().to_string(),
        }
    }

    /// Whether the code is well-formed and the label non-empty.
    pub fn is_valid(&self) -> bool {
        is_valid_code(&self.code) && !self.label.is_empty()
    }
}

/// Check that a code is 8 to 12 ASCII digits.
pub fn is_valid_code(code: &str) -> bool {
    (MIN_CODE_DIGITS..=MAX_CODE_DIGITS).contains(&code.len())
        && code.bytes().all(|b| b.is_ascii_digit())
}
