//! SQLite schema definition.

/// Complete database schema for tariff-match.
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Tariff Catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS catalog_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL,
    label TEXT NOT NULL,
    loaded_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(code, label)
);

CREATE INDEX IF NOT EXISTS idx_catalog_code ON catalog_entries(code);

-- ============================================================================
-- Override Store
-- ============================================================================

CREATE TABLE IF NOT EXISTS override_mappings (
    tenant TEXT NOT NULL,
    scope TEXT NOT NULL CHECK (scope IN ('name', 'keyword')),
    key TEXT NOT NULL,
    code TEXT NOT NULL,
    source TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (tenant, scope, key)
);

-- ============================================================================
-- Catalog Embeddings (keyed by catalog fingerprint)
-- ============================================================================

CREATE TABLE IF NOT EXISTS catalog_embeddings (
    fingerprint TEXT NOT NULL,
    key TEXT NOT NULL,
    code TEXT NOT NULL,
    vector BLOB NOT NULL,
    PRIMARY KEY (fingerprint, key, code)
);

-- ============================================================================
-- Warehouse Stock
-- ============================================================================

CREATE TABLE IF NOT EXISTS stock_items (
    name TEXT PRIMARY KEY,
    unit TEXT NOT NULL DEFAULT 'шт',
    quantity REAL NOT NULL DEFAULT 0 CHECK (quantity >= 0),
    price REAL NOT NULL DEFAULT 0,
    total REAL NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ============================================================================
-- Retail Sales
-- ============================================================================

CREATE TABLE IF NOT EXISTS retail_sales (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'matched', 'applied')),
    matched_product TEXT,
    match_score REAL,
    candidates TEXT                               -- JSON array of {product, score}
);

CREATE INDEX IF NOT EXISTS idx_sales_status ON retail_sales(status);
CREATE INDEX IF NOT EXISTS idx_sales_created ON retail_sales(created_at);
"#;
