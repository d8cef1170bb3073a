//! Persisted catalog embeddings.
//!
//! Vectors are stored as little-endian `f32` BLOBs under the fingerprint of the
//! catalog they were computed for, so a reloaded identical catalog reuses them.

use rusqlite::params;

use super::{Database, DbResult};

/// One `(key, code, vector)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    /// Normalized catalog label
    pub key: String,
    pub code: String,
    pub vector: Vec<f32>,
}

impl Database {
    /// Store embeddings for a catalog fingerprint, dropping any other fingerprint.
    pub fn save_embeddings(&mut self, fingerprint: &str, records: &[EmbeddingRecord]) -> DbResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM catalog_embeddings WHERE fingerprint != ?",
            [fingerprint],
        )?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR REPLACE INTO catalog_embeddings (fingerprint, key, code, vector)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for record in records {
                stmt.execute(params![
                    fingerprint,
                    record.key,
                    record.code,
                    vec_to_blob(&record.vector)
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the embeddings stored for a catalog fingerprint.
    pub fn load_embeddings(&self, fingerprint: &str) -> DbResult<Vec<EmbeddingRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT key, code, vector FROM catalog_embeddings WHERE fingerprint = ? ORDER BY rowid",
        )?;
        let rows = stmt.query_map([fingerprint], |row| {
            let blob: Vec<u8> = row.get(2)?;
            Ok(EmbeddingRecord {
                key: row.get(0)?,
                code: row.get(1)?,
                vector: blob_to_vec(&blob),
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

/// Encode a float vector as little-endian bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
