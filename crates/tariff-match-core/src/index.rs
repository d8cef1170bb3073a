//! In-memory catalog index.
//!
//! Holds the loaded code↔label reference list with precomputed normalized keys
//! and tokens, an exact-match lookup by key, and a content fingerprint.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::db::{Database, DbResult};
use crate::models::CatalogEntry;
use crate::resolver::Normalizer;

/// Minimum token length (in chars) that counts for overlap scoring.
const MIN_TOKEN_CHARS: usize = 3;

/// A catalog row with its precomputed key and tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntry {
    pub entry: CatalogEntry,
    pub key: String,
    pub tokens: Vec<String>,
}

/// Loaded catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    entries: Vec<IndexedEntry>,
    by_key: HashMap<String, usize>,
    fingerprint: String,
}

impl CatalogIndex {
    /// Build an index, skipping malformed rows.
    pub fn from_entries(entries: Vec<CatalogEntry>, normalizer: &Normalizer) -> Self {
        let mut hasher = Sha256::new();
        let mut indexed = Vec::with_capacity(entries.len());
        let mut by_key = HashMap::new();
        let mut skipped = 0usize;

        for entry in entries {
            if !entry.is_valid() {
                skipped += 1;
                continue;
            }
            let key = normalizer.normalize(&entry.label);
            if key.is_empty() {
                skipped += 1;
                continue;
            }

            hasher.update(entry.code.as_bytes());
            hasher.update(b"\t");
            hasher.update(entry.label.as_bytes());
            hasher.update(b"\n");

            // first row wins for duplicate labels
            by_key.entry(key.clone()).or_insert(indexed.len());
            indexed.push(IndexedEntry {
                tokens: tokenize(&key),
                key,
                entry,
            });
        }

        if skipped > 0 {
            warn!(skipped, "skipped malformed catalog rows");
        }

        Self {
            entries: indexed,
            by_key,
            fingerprint: hex::encode(hasher.finalize()),
        }
    }

    /// Build from the catalog stored in the database.
    pub fn load(db: &Database, normalizer: &Normalizer) -> DbResult<Self> {
        let index = Self::from_entries(db.list_catalog_entries()?, normalizer);
        info!(entries = index.len(), "catalog index loaded");
        Ok(index)
    }

    /// Persist `entries` and build an index over the stored rows.
    pub fn replace(db: &mut Database, entries: &[CatalogEntry], normalizer: &Normalizer) -> DbResult<Self> {
        let stored = db.replace_catalog(entries)?;
        if stored < entries.len() {
            warn!(
                rejected = entries.len() - stored,
                "catalog rows rejected at load"
            );
        }
        Self::load(db, normalizer)
    }

    /// Entry whose normalized label equals `key`.
    pub fn exact(&self, key: &str) -> Option<&CatalogEntry> {
        if key.is_empty() {
            return None;
        }
        self.by_key.get(key).map(|&i| &self.entries[i].entry)
    }

    /// Label of the first entry with `code`.
    pub fn label_for(&self, code: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.entry.code == code)
            .map(|e| e.entry.label.as_str())
    }

    pub fn entries(&self) -> &[IndexedEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 over the accepted rows, in order.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

/// Distinct tokens of a normalized key longer than two characters.
pub fn tokenize(key: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in key.split(' ') {
        if token.chars().count() >= MIN_TOKEN_CHARS && !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<CatalogEntry> {
        vec![
            CatalogEntry::new("7616999008", "Aluminum ladder"),
            CatalogEntry::new("7326909807", "Steel ladder"),
            CatalogEntry::new("bad", "broken"),
            CatalogEntry::new("8467211000", "Drills, electric"),
        ]
    }

    #[test]
    fn test_invalid_rows_skipped() {
        let index = CatalogIndex::from_entries(catalog(), &Normalizer::new());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_exact_lookup() {
        let index = CatalogIndex::from_entries(catalog(), &Normalizer::new());
        assert_eq!(index.exact("aluminum ladder").unwrap().code, "7616999008");
        assert_eq!(index.exact("drills electric").unwrap().code, "8467211000");
        assert!(index.exact("ladder").is_none());
        assert!(index.exact("").is_none());
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("5 м aluminum ladder ladder"), vec!["aluminum", "ladder"]);
        assert_eq!(tokenize("дрель уд."), vec!["дрель", "уд."]);
        assert!(tokenize("").is_empty());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let normalizer = Normalizer::new();
        let a = CatalogIndex::from_entries(catalog(), &normalizer);
        let b = CatalogIndex::from_entries(catalog(), &normalizer);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut changed = catalog();
        changed[0].label = "Aluminium ladder".into();
        let c = CatalogIndex::from_entries(changed, &normalizer);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_replace_and_load() {
        let mut db = Database::open_in_memory().unwrap();
        let normalizer = Normalizer::new();
        let index = CatalogIndex::replace(&mut db, &catalog(), &normalizer).unwrap();
        assert_eq!(index.len(), 3);

        let reloaded = CatalogIndex::load(&db, &normalizer).unwrap();
        assert_eq!(reloaded.fingerprint(), index.fingerprint());
        assert_eq!(reloaded.label_for("7326909807"), Some("Steel ladder"));
    }
}
