//! Two-budget raw byte cache
//!
//! `CachingResourcesManager` caches undecoded resource bytes. It shares the
//! A1/A-main policy with the typed cache and adds a persistent tier: a
//! caller may ask for a resource to be kept outside both queues, where it
//! is charged against its own budget and never evicted automatically.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::Mutex;

use super::error::CacheError;
use super::handle::{PinnedResourceHandle, ReleaseRef, ResourceHandle};
use super::index::{ResourceId, ResourceKey};
use super::source::ResourceSource;
use super::table::{CacheLimits, CacheStats, CacheTable, EntryLocation};
use crate::config::CacheConfig;

struct Shared {
    table: Mutex<CacheTable<Arc<[u8]>>>,
    source: Arc<dyn ResourceSource>,
}

impl ReleaseRef for Shared {
    fn release(&self, id: ResourceId) {
        self.table.lock().release(id);
    }
}

/// Bytes from `fetch_buffer`, cached or not
#[derive(Debug)]
pub enum ResourceBytes {
    Cached(ResourceHandle<[u8]>),
    Uncached(PinnedResourceHandle),
}

impl ResourceBytes {
    pub fn id(&self) -> ResourceId {
        match self {
            ResourceBytes::Cached(handle) => handle.id(),
            ResourceBytes::Uncached(pinned) => pinned.id(),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, ResourceBytes::Cached(_))
    }
}

impl Deref for ResourceBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ResourceBytes::Cached(handle) => &handle[..],
            ResourceBytes::Uncached(pinned) => &pinned[..],
        }
    }
}

/// Thread-safe byte cache with volatile and persistent budgets.
/// Cloning shares the same cache.
#[derive(Clone)]
pub struct CachingResourcesManager {
    shared: Arc<Shared>,
}

impl CachingResourcesManager {
    pub fn new(source: Arc<dyn ResourceSource>, config: &CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(CacheTable::new(CacheLimits::from_config(config))),
                source,
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn ResourceSource> {
        &self.shared.source
    }

    /// Get the bytes of a resource, reading them from the source on a miss.
    ///
    /// With `as_persistent`, a miss that fits the persistent budgets is
    /// placed in the persistent tier. Otherwise it goes through normal
    /// volatile admission. The flag is ignored on a hit.
    pub fn get_resource(
        &self,
        key: impl Into<ResourceKey>,
        as_persistent: bool,
    ) -> Result<ResourceHandle<[u8]>, CacheError> {
        let key = key.into();
        let id = self.shared.source.resolve(&key)?.id;

        let bytes = self.lock_table(|table| -> Result<Arc<[u8]>, CacheError> {
            if let Some(bytes) = table.acquire(id) {
                return Ok(bytes.clone());
            }

            table.record_miss();
            let bytes: Arc<[u8]> = Arc::from(self.shared.source.resource_data(id)?);
            let location = table.admit(id, bytes.clone(), bytes.len(), as_persistent)?;
            if as_persistent && location != EntryLocation::Persistent {
                log::debug!(
                    "Resource {} ({} bytes) does not fit the persistent budget, cached as volatile",
                    id,
                    bytes.len()
                );
            }
            Ok(bytes)
        })?;
        Ok(ResourceHandle::new(self.shared.clone(), id, bytes))
    }

    /// Fetch raw bytes without touching the cache
    pub fn get_uncached_buffer(&self, key: impl Into<ResourceKey>) -> Result<PinnedResourceHandle, CacheError> {
        let key = key.into();
        let id = self.shared.source.resolve(&key)?.id;
        let data = self.shared.source.resource_data(id)?;
        Ok(PinnedResourceHandle::new(id, data))
    }

    /// Get a resource through the cache unless it is too large to be worth
    /// caching, or the cache has no room for it. Either way the caller gets
    /// the bytes.
    pub fn fetch_buffer(&self, key: impl Into<ResourceKey>) -> Result<ResourceBytes, CacheError> {
        let key = key.into();
        let size = self.shared.source.declared_size(&key)?;
        if self.should_bypass(size) {
            log::warn!("Resource {} ({} bytes) bypasses the cache", key, size);
            return self.get_uncached_buffer(key).map(ResourceBytes::Uncached);
        }

        match self.get_resource(key.clone(), false) {
            Ok(handle) => Ok(ResourceBytes::Cached(handle)),
            Err(e) if e.is_capacity_error() => {
                log::warn!("Falling back to uncached read of {}: {}", key, e);
                self.get_uncached_buffer(key).map(ResourceBytes::Uncached)
            }
            Err(e) => Err(e),
        }
    }

    /// Volatile capacity in bytes
    pub fn max_cache_buffer_size(&self) -> usize {
        self.shared.table.lock().limits().max_volatile_size
    }

    /// `size * 3 > capacity`
    pub fn should_bypass(&self, size: usize) -> bool {
        size.saturating_mul(3) > self.max_cache_buffer_size()
    }

    /// Evict every unreferenced volatile entry
    pub fn purge(&self) -> usize {
        self.lock_table(|t| t.purge_volatile())
    }

    /// Like `purge`, and also drop unreferenced persistent entries
    pub fn purge_all(&self) -> usize {
        self.lock_table(|t| t.purge_volatile() + t.purge_persistent())
    }

    pub fn stats(&self) -> CacheStats {
        self.shared.table.lock().stats()
    }

    pub fn contains(&self, key: impl Into<ResourceKey>) -> bool {
        self.resolve_id(key)
            .is_some_and(|id| self.shared.table.lock().contains(id))
    }

    pub fn location(&self, key: impl Into<ResourceKey>) -> Option<EntryLocation> {
        let id = self.resolve_id(key)?;
        self.shared.table.lock().get(id).map(|e| e.location)
    }

    pub fn ref_count(&self, key: impl Into<ResourceKey>) -> Option<u32> {
        let id = self.resolve_id(key)?;
        self.shared.table.lock().get(id).map(|e| e.ref_count)
    }

    /// Run `f` under the lock, freeing departed bytes after unlocking
    fn lock_table<R>(&self, f: impl FnOnce(&mut CacheTable<Arc<[u8]>>) -> R) -> R {
        let (result, retired) = {
            let mut table = self.shared.table.lock();
            let result = f(&mut table);
            (result, table.take_retired())
        };
        drop(retired);
        result
    }

    fn resolve_id(&self, key: impl Into<ResourceKey>) -> Option<ResourceId> {
        self.shared.source.resolve(&key.into()).ok().map(|d| d.id)
    }

    #[cfg(test)]
    pub(crate) fn with_table<R>(&self, f: impl FnOnce(&CacheTable<Arc<[u8]>>) -> R) -> R {
        f(&self.shared.table.lock())
    }
}

impl fmt::Debug for CachingResourcesManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("CachingResourcesManager")
            .field("volatile_size", &stats.volatile_size)
            .field("max_volatile_size", &stats.max_volatile_size)
            .field("persistent_size", &stats.persistent_size)
            .field("max_persistent_size", &stats.max_persistent_size)
            .field("entries", &stats.entries)
            .finish()
    }
}
