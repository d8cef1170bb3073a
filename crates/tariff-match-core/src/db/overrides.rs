//! Override mapping database operations.

use rusqlite::params;

use super::{Database, DbError, DbResult};
use crate::models::{OverrideMapping, OverrideScope, OverrideSource};

impl Database {
    /// Insert or overwrite a mapping for `tenant`.
    pub fn upsert_override(&self, tenant: &str, mapping: &OverrideMapping) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO override_mappings (tenant, scope, key, code, source, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
            ON CONFLICT(tenant, scope, key) DO UPDATE SET
                code = excluded.code,
                source = excluded.source,
                updated_at = datetime('now')
            "#,
            params![
                tenant,
                mapping.scope.as_str(),
                mapping.key,
                mapping.code,
                mapping.source.as_str(),
            ],
        )?;
        Ok(())
    }

    /// All mappings for `tenant`.
    pub fn list_overrides(&self, tenant: &str) -> DbResult<Vec<OverrideMapping>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT scope, key, code, source
            FROM override_mappings
            WHERE tenant = ?
            ORDER BY updated_at, key
            "#,
        )?;
        let rows = stmt.query_map([tenant], |row| {
            Ok(OverrideRow {
                scope: row.get(0)?,
                key: row.get(1)?,
                code: row.get(2)?,
                source: row.get(3)?,
            })
        })?;

        let mut mappings = Vec::new();
        for row in rows {
            mappings.push(row?.try_into()?);
        }
        Ok(mappings)
    }
}

/// Intermediate row struct for database mapping.
struct OverrideRow {
    scope: String,
    key: String,
    code: String,
    source: String,
}

impl TryFrom<OverrideRow> for OverrideMapping {
    type Error = DbError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        let scope = OverrideScope::parse(&row.scope)
            .ok_or_else(|| DbError::Constraint(format!("unknown override scope: {}", row.scope)))?;
        let source = OverrideSource::parse(&row.source).ok_or_else(|| {
            DbError::Constraint(format!("unknown override source: {}", row.source))
        })?;
        Ok(OverrideMapping {
            scope,
            key: row.key,
            code: row.code,
            source,
        })
    }
}
