//! Override store: confirmed key → code mappings.
//!
//! Backed by SQLite per tenant, mirrored in an in-memory map that is loaded on
//! first use. When a remote shared cache is attached its entries are merged at
//! load time and take precedence over local ones.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::db::{Database, DbResult};
use crate::models::{OverrideMapping, OverrideScope, OverrideSource};
use crate::services::RemoteOverrideCache;

/// Durable backing for the override store.
pub trait OverridePersistence: Send + Sync {
    fn load(&self, tenant: &str) -> DbResult<Vec<OverrideMapping>>;
    fn store(&self, tenant: &str, mapping: &OverrideMapping) -> DbResult<()>;
}

impl OverridePersistence for Mutex<Database> {
    fn load(&self, tenant: &str) -> DbResult<Vec<OverrideMapping>> {
        let db = self.lock().unwrap_or_else(PoisonError::into_inner);
        db.list_overrides(tenant)
    }

    fn store(&self, tenant: &str, mapping: &OverrideMapping) -> DbResult<()> {
        let db = self.lock().unwrap_or_else(PoisonError::into_inner);
        db.upsert_override(tenant, mapping)
    }
}

type OverrideMap = HashMap<(OverrideScope, String), OverrideMapping>;

/// Process-wide, read-mostly override cache.
pub struct OverrideStore {
    persistence: Arc<dyn OverridePersistence>,
    remote: Option<Arc<dyn RemoteOverrideCache>>,
    tenant: String,
    map: OnceLock<RwLock<OverrideMap>>,
}

impl OverrideStore {
    pub fn new(persistence: Arc<dyn OverridePersistence>, tenant: impl Into<String>) -> Self {
        Self {
            persistence,
            remote: None,
            tenant: tenant.into(),
            map: OnceLock::new(),
        }
    }

    /// Attach a shared remote cache, consulted once on first use.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteOverrideCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    fn map(&self) -> &RwLock<OverrideMap> {
        self.map.get_or_init(|| RwLock::new(self.initial_map()))
    }

    fn initial_map(&self) -> OverrideMap {
        let mut map = OverrideMap::new();

        match self.persistence.load(&self.tenant) {
            Ok(mappings) => {
                for m in mappings {
                    map.insert((m.scope, m.key.clone()), m);
                }
            }
            Err(e) => warn!(error = %e, tenant = %self.tenant, "failed to load local overrides"),
        }
        let local = map.len();

        if let Some(remote) = &self.remote {
            match remote.fetch_all() {
                Ok(mappings) => {
                    for m in mappings {
                        let slot = (m.scope, m.key.clone());
                        if map.get(&slot).map(|existing| existing.code != m.code).unwrap_or(true) {
                            if let Err(e) = self.persistence.store(&self.tenant, &m) {
                                warn!(error = %e, key = %m.key, "failed to persist remote override");
                            }
                        }
                        map.insert(slot, m);
                    }
                }
                Err(e) => warn!(error = %e, "remote override cache unavailable"),
            }
        }

        info!(tenant = %self.tenant, local, total = map.len(), "override store loaded");
        map
    }

    fn lookup(&self, scope: OverrideScope, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let map = self.map().read().unwrap_or_else(PoisonError::into_inner);
        map.get(&(scope, key.to_string())).map(|m| m.code.clone())
    }

    /// Code confirmed for a normalized product name.
    pub fn get(&self, key: &str) -> Option<String> {
        self.lookup(OverrideScope::Name, key)
    }

    /// Full name-scope mapping, including its source.
    pub fn mapping(&self, key: &str) -> Option<OverrideMapping> {
        let map = self.map().read().unwrap_or_else(PoisonError::into_inner);
        map.get(&(OverrideScope::Name, key.to_string())).cloned()
    }

    /// Keyword override whose keyword occurs in `key`.
    ///
    /// The longest keyword wins; ties go to the lexicographically smallest.
    pub fn keyword_match(&self, key: &str) -> Option<(String, String)> {
        if key.is_empty() {
            return None;
        }
        let map = self.map().read().unwrap_or_else(PoisonError::into_inner);
        map.values()
            .filter(|m| m.scope == OverrideScope::Keyword && key.contains(m.key.as_str()))
            .min_by(|a, b| {
                b.key
                    .chars()
                    .count()
                    .cmp(&a.key.chars().count())
                    .then_with(|| a.key.cmp(&b.key))
            })
            .map(|m| (m.key.clone(), m.code.clone()))
    }

    /// Write a mapping, last write wins.
    ///
    /// Local persistence errors are returned; remote cache failures are logged.
    pub fn put(&self, mapping: OverrideMapping) -> DbResult<()> {
        if mapping.key.is_empty() {
            return Ok(());
        }
        self.persistence.store(&self.tenant, &mapping)?;

        if let Some(remote) = &self.remote {
            if mapping.scope == OverrideScope::Name && mapping.source != OverrideSource::Remote {
                if let Err(e) = remote.upsert(&mapping) {
                    warn!(error = %e, key = %mapping.key, "remote override upsert failed");
                }
            }
        }

        debug!(key = %mapping.key, code = %mapping.code, source = mapping.source.as_str(), "override stored");
        let mut map = self.map().write().unwrap_or_else(PoisonError::into_inner);
        map.insert((mapping.scope, mapping.key.clone()), mapping);
        Ok(())
    }

    /// Snapshot of every mapping, ordered by scope and key.
    pub fn load_all(&self) -> Vec<OverrideMapping> {
        let map = self.map().read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<OverrideMapping> = map.values().cloned().collect();
        all.sort_by(|a, b| {
            a.scope
                .as_str()
                .cmp(b.scope.as_str())
                .then_with(|| a.key.cmp(&b.key))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.map().read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::services::{ServiceError, ServiceResult};

    struct SharedCache {
        rows: Vec<OverrideMapping>,
        fetches: AtomicUsize,
        upserts: Mutex<Vec<OverrideMapping>>,
    }

    impl SharedCache {
        fn new(rows: Vec<OverrideMapping>) -> Self {
            Self {
                rows,
                fetches: AtomicUsize::new(0),
                upserts: Mutex::new(Vec::new()),
            }
        }
    }

    impl RemoteOverrideCache for SharedCache {
        fn fetch_all(&self) -> ServiceResult<Vec<OverrideMapping>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.clone())
        }

        fn upsert(&self, mapping: &OverrideMapping) -> ServiceResult<()> {
            self.upserts.lock().unwrap().push(mapping.clone());
            Ok(())
        }
    }

    struct Offline;

    impl RemoteOverrideCache for Offline {
        fn fetch_all(&self) -> ServiceResult<Vec<OverrideMapping>> {
            Err(ServiceError::Unavailable("offline".into()))
        }

        fn upsert(&self, _mapping: &OverrideMapping) -> ServiceResult<()> {
            Err(ServiceError::Unavailable("offline".into()))
        }
    }

    fn setup_db() -> Arc<Mutex<Database>> {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_put_and_get() {
        let db = setup_db();
        let store = OverrideStore::new(db.clone(), "shop-1");
        assert!(store.get("стремянка 5 ступ.").is_none());

        store
            .put(OverrideMapping::name("стремянка 5 ступ.", "7616999008", OverrideSource::Manual))
            .unwrap();
        assert_eq!(store.get("стремянка 5 ступ.").as_deref(), Some("7616999008"));

        // persisted: a fresh store over the same database sees it
        let reopened = OverrideStore::new(db, "shop-1");
        assert_eq!(reopened.get("стремянка 5 ступ.").as_deref(), Some("7616999008"));
    }

    #[test]
    fn test_last_write_wins() {
        let store = OverrideStore::new(setup_db(), "t");
        store
            .put(OverrideMapping::name("краска", "3209100009", OverrideSource::Auto))
            .unwrap();
        store
            .put(OverrideMapping::name("краска", "3214101009", OverrideSource::Manual))
            .unwrap();
        assert_eq!(store.get("краска").as_deref(), Some("3214101009"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remote_wins_on_collision_and_is_fetched_once() {
        let db = setup_db();
        OverrideStore::new(db.clone(), "t")
            .put(OverrideMapping::name("дрель", "8467291000", OverrideSource::Auto))
            .unwrap();

        let remote = Arc::new(SharedCache::new(vec![
            OverrideMapping::name("дрель", "8467211000", OverrideSource::Remote),
            OverrideMapping::name("лестница", "7616999008", OverrideSource::Remote),
        ]));
        let store = OverrideStore::new(db.clone(), "t").with_remote(remote.clone());

        assert_eq!(store.get("дрель").as_deref(), Some("8467211000"));
        assert_eq!(store.get("лестница").as_deref(), Some("7616999008"));
        assert_eq!(remote.fetches.load(Ordering::SeqCst), 1);

        // merged entries were persisted locally
        let offline = OverrideStore::new(db, "t");
        assert_eq!(offline.get("лестница").as_deref(), Some("7616999008"));
    }

    #[test]
    fn test_put_mirrors_to_remote() {
        let remote = Arc::new(SharedCache::new(Vec::new()));
        let store = OverrideStore::new(setup_db(), "t").with_remote(remote.clone());

        store
            .put(OverrideMapping::name("лестница", "7616999008", OverrideSource::Auto))
            .unwrap();
        store.put(OverrideMapping::keyword("дрел", "8467211000")).unwrap();

        let upserts = remote.upserts.lock().unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].key, "лестница");
    }

    #[test]
    fn test_offline_remote_degrades() {
        let store = OverrideStore::new(setup_db(), "t").with_remote(Arc::new(Offline));
        store
            .put(OverrideMapping::name("лестница", "7616999008", OverrideSource::Auto))
            .unwrap();
        assert_eq!(store.get("лестница").as_deref(), Some("7616999008"));
    }

    #[test]
    fn test_keyword_match_prefers_longest() {
        let store = OverrideStore::new(setup_db(), "t");
        store.put(OverrideMapping::keyword("лест", "1111111111")).unwrap();
        store.put(OverrideMapping::keyword("лестниц", "7616999008")).unwrap();

        assert_eq!(
            store.keyword_match("лестница алюминиевая"),
            Some(("лестниц".to_string(), "7616999008".to_string()))
        );
        assert_eq!(
            store.keyword_match("лестн").map(|(_, code)| code).as_deref(),
            Some("1111111111")
        );
        assert!(store.keyword_match("дрель").is_none());
        assert!(store.get("лестниц").is_none());
    }

    #[test]
    fn test_tenants_isolated() {
        let db = setup_db();
        OverrideStore::new(db.clone(), "a")
            .put(OverrideMapping::name("лак", "3208109000", OverrideSource::Manual))
            .unwrap();
        assert!(OverrideStore::new(db, "b").get("лак").is_none());
    }

    #[test]
    fn test_load_all_sorted() {
        let store = OverrideStore::new(setup_db(), "t");
        store
            .put(OverrideMapping::name("b", "2222222222", OverrideSource::Manual))
            .unwrap();
        store.put(OverrideMapping::keyword("k", "3333333333")).unwrap();
        store
            .put(OverrideMapping::name("a", "1111111111", OverrideSource::Manual))
            .unwrap();

        let keys: Vec<_> = store.load_all().into_iter().map(|m| m.key).collect();
        assert_eq!(keys, vec!["k", "a", "b"]);
    }
}
