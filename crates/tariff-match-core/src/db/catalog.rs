//! Catalog database operations.

use rusqlite::params;

use super::{Database, DbResult};
use crate::models::CatalogEntry;

impl Database {
    /// Replace the stored catalog with `entries`.
    ///
    /// Malformed rows are skipped; returns the number of rows stored.
    pub fn replace_catalog(&mut self, entries: &[CatalogEntry]) -> DbResult<usize> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM catalog_entries", [])?;

        let mut stored = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO catalog_entries (code, label)
                VALUES (?1, ?2)
                "#,
            )?;
            for entry in entries.iter().filter(|e| e.is_valid()) {
                stored += stmt.execute(params![entry.code, entry.label])?;
            }
        }

        tx.commit()?;
        Ok(stored)
    }

    /// All stored catalog entries, in load order.
    pub fn list_catalog_entries(&self) -> DbResult<Vec<CatalogEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT code, label FROM catalog_entries ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(CatalogEntry {
                code: row.get(0)?,
                label: row.get(1)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Subset of `codes` present in the stored catalog.
    pub fn existing_catalog_codes(&self, codes: &[String]) -> DbResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM catalog_entries WHERE code = ? LIMIT 1")?;

        let mut found = Vec::new();
        for code in codes {
            if stmt.exists([code])? && !found.contains(code) {
                found.push(code.clone());
            }
        }
        Ok(found)
    }
}
