//! Best-effort TTL cache over remote records
//!
//! One cache per resource kind, keyed by owner token, guarded by a single
//! read/write lock per cache. Reads past the TTL trigger a full
//! repopulation sweep before falling back to direct remote reads. The
//! cache only saves remote calls; a population failure must never block
//! correctness.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use strata_common::Error;
use tracing::debug;

use crate::client::{OrganizationClient, SpaceClient};
use crate::model::{Binding, Instance, Space};

/// TTL cache mapping owner token to last-known remote record
pub struct ResourceCache<T: Clone> {
    inner: RwLock<CacheInner<T>>,
    ttl: Duration,
}

struct CacheInner<T> {
    entries: HashMap<String, T>,
    refreshed_at: Option<DateTime<Utc>>,
}

impl<T: Clone> ResourceCache<T> {
    /// Create an empty cache with the given time-to-live
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                entries: HashMap::new(),
                refreshed_at: None,
            }),
            ttl,
        }
    }

    /// Whether the cache contents are past their TTL (or never populated)
    pub fn is_expired(&self) -> bool {
        let inner = self.inner.read().expect("cache lock poisoned");
        match inner.refreshed_at {
            None => true,
            Some(at) => {
                let age = Utc::now().signed_duration_since(at);
                age.to_std().map(|age| age > self.ttl).unwrap_or(true)
            }
        }
    }

    /// Read a record by owner token; None on miss (caller falls back)
    pub fn get(&self, owner: &str) -> Option<T> {
        let inner = self.inner.read().expect("cache lock poisoned");
        inner.entries.get(owner).cloned()
    }

    /// Store a record after a successful remote read or mutation
    pub fn insert(&self, owner: impl Into<String>, record: T) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        inner.entries.insert(owner.into(), record);
    }

    /// Drop a record after a delete or before a post-mutation re-read
    pub fn invalidate(&self, owner: &str) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        inner.entries.remove(owner);
    }

    /// Replace the whole map after a repopulation sweep
    pub fn replace_all(&self, entries: HashMap<String, T>) {
        let mut inner = self.inner.write().expect("cache lock poisoned");
        inner.entries = entries;
        inner.refreshed_at = Some(Utc::now());
    }
}

/// Look up a space by owner, through the cache when one is wired
///
/// An expired cache is repopulated with one list sweep first; if the sweep
/// fails the lookup falls through to a direct remote read.
pub async fn space_by_owner(
    cache: Option<&ResourceCache<Space>>,
    client: &dyn OrganizationClient,
    owner: &str,
) -> Result<Option<Space>, Error> {
    if let Some(cache) = cache {
        if cache.is_expired() {
            match client.list_spaces().await {
                Ok(spaces) => cache.replace_all(
                    spaces
                        .into_iter()
                        .filter_map(|s| s.owner.clone().map(|o| (o, s)))
                        .collect(),
                ),
                Err(e) => debug!(error = %e, "space cache population failed, reading directly"),
            }
        }
        if let Some(space) = cache.get(owner) {
            return Ok(Some(space));
        }
    }
    client.get_space_by_owner(owner).await
}

/// Look up an instance by owner, through the cache when one is wired
///
/// An expired cache is repopulated with one list sweep first; if the sweep
/// fails the lookup falls through to a direct remote read.
pub async fn instance_by_owner(
    cache: Option<&ResourceCache<Instance>>,
    client: &dyn SpaceClient,
    owner: &str,
) -> Result<Option<Instance>, Error> {
    if let Some(cache) = cache {
        if cache.is_expired() {
            match client.list_instances().await {
                Ok(instances) => cache.replace_all(
                    instances
                        .into_iter()
                        .filter_map(|i| i.owner.clone().map(|o| (o, i)))
                        .collect(),
                ),
                Err(e) => debug!(error = %e, "instance cache population failed, reading directly"),
            }
        }
        if let Some(instance) = cache.get(owner) {
            return Ok(Some(instance));
        }
    }
    client.get_instance_by_owner(owner).await
}

/// Look up a binding by owner, through the cache when one is wired
pub async fn binding_by_owner(
    cache: Option<&ResourceCache<Binding>>,
    client: &dyn SpaceClient,
    owner: &str,
) -> Result<Option<Binding>, Error> {
    if let Some(cache) = cache {
        if cache.is_expired() {
            match client.list_bindings().await {
                Ok(bindings) => cache.replace_all(
                    bindings
                        .into_iter()
                        .filter_map(|b| b.owner.clone().map(|o| (o, b)))
                        .collect(),
                ),
                Err(e) => debug!(error = %e, "binding cache population failed, reading directly"),
            }
        }
        if let Some(binding) = cache.get(owner) {
            return Ok(Some(binding));
        }
    }
    client.get_binding_by_owner(owner).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_cache_is_expired() {
        let cache: ResourceCache<Instance> = ResourceCache::new(Duration::from_secs(60));
        assert!(cache.is_expired());
        assert!(cache.get("uid-1").is_none());
    }

    #[test]
    fn test_replace_all_refreshes_ttl() {
        let cache: ResourceCache<String> = ResourceCache::new(Duration::from_secs(60));
        cache.replace_all(HashMap::from([(
            "uid-1".to_string(),
            "record".to_string(),
        )]));
        assert!(!cache.is_expired());
        assert_eq!(cache.get("uid-1").as_deref(), Some("record"));
    }

    #[test]
    fn test_insert_and_invalidate() {
        let cache: ResourceCache<String> = ResourceCache::new(Duration::from_secs(60));
        cache.insert("uid-1", "record".to_string());
        assert_eq!(cache.get("uid-1").as_deref(), Some("record"));
        cache.invalidate("uid-1");
        assert!(cache.get("uid-1").is_none());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache: ResourceCache<String> = ResourceCache::new(Duration::ZERO);
        cache.replace_all(HashMap::new());
        assert!(cache.is_expired());
    }
}
