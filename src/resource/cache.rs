//! Unified resource cache - typed, decoded resources under one byte budget
//!
//! `UnifiedCacheManager` keys entries by resource id and stores whatever
//! `CacheLoadable` type the first request decoded. Admission and eviction
//! follow the two-queue policy of the cache table (A1 for once-touched
//! entries, A-main for the working set). A live `ResourceHandle` keeps its
//! entry from being evicted.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use assetcache::config::CacheConfig;
//! use assetcache::resource::{BufferResource, MemorySource, ResourceKind, UnifiedCacheManager};
//!
//! let mut pack = MemorySource::new();
//! pack.add(Some("script.intro"), ResourceKind::Binary, b"@scene start".to_vec());
//!
//! let cache = UnifiedCacheManager::new(Arc::new(pack), &CacheConfig::with_volatile_size(1024));
//! let script = cache.get::<BufferResource>("script.intro").unwrap();
//! assert_eq!(&script[..], b"@scene start");
//! ```
//!
//! # Locking
//! One reentrant lock guards the whole table for the duration of every
//! public call, including the decode on a miss. A loader may therefore
//! call back into the same cache from the decoding thread, and a payload
//! may keep handles to other entries. Payloads leaving the table are
//! dropped only after the table borrow ends, since dropping such a handle
//! needs the table again.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::ReentrantMutex;

use super::error::CacheError;
use super::handle::{PinnedResourceHandle, ReleaseRef, ResourceHandle};
use super::index::{ResourceId, ResourceKey};
use super::loader::{CacheLoadable, LoadContext};
use super::source::ResourceSource;
use super::table::{CacheLimits, CacheStats, CacheTable, EntryLocation};
use crate::config::CacheConfig;

/// Type-erased payload plus the name it was decoded as
pub(crate) struct TypedPayload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

struct Shared {
    table: ReentrantMutex<RefCell<CacheTable<TypedPayload>>>,
    source: Arc<dyn ResourceSource>,
}

impl ReleaseRef for Shared {
    fn release(&self, id: ResourceId) {
        let guard = self.table.lock();
        guard.borrow_mut().release(id);
    }
}

/// Thread-safe typed resource cache. Cloning shares the same cache.
#[derive(Clone)]
pub struct UnifiedCacheManager {
    shared: Arc<Shared>,
}

impl UnifiedCacheManager {
    /// Create a cache over `source` using the volatile budget and A1 ratio
    /// of `config`. This store has no persistent tier.
    pub fn new(source: Arc<dyn ResourceSource>, config: &CacheConfig) -> Self {
        let limits = CacheLimits::volatile_only(config);
        Self {
            shared: Arc::new(Shared {
                table: ReentrantMutex::new(RefCell::new(CacheTable::new(limits))),
                source,
            }),
        }
    }

    pub fn source(&self) -> &Arc<dyn ResourceSource> {
        &self.shared.source
    }

    /// Get a resource decoded with the default loader options
    pub fn get<T: CacheLoadable>(&self, key: impl Into<ResourceKey>) -> Result<ResourceHandle<T>, CacheError> {
        self.get_with(key, T::Options::default())
    }

    /// Get a resource, decoding with `options` on a miss.
    ///
    /// # Errors
    /// * `Source(NotFound)` - unknown id or alias
    /// * `TypeMismatch` - the entry was decoded as a different type
    /// * `Decode` - the loader rejected the bytes
    /// * `CapacityExceeded` - the decoded resource is larger than the cache
    /// * `OutOfMemory` - not enough unreferenced entries to evict
    pub fn get_with<T: CacheLoadable>(
        &self,
        key: impl Into<ResourceKey>,
        options: T::Options,
    ) -> Result<ResourceHandle<T>, CacheError> {
        let key = key.into();
        let definition = self.shared.source.resolve(&key)?;
        let id = definition.id;

        let guard = self.shared.table.lock();
        if let Some(handle) = self.try_hit::<T>(&guard, id)? {
            return Ok(handle);
        }

        guard.borrow_mut().record_miss();
        let data = self.shared.source.resource_data(id)?;
        let ctx = LoadContext::new(self, definition);
        let resource = T::load(&ctx, data, options).map_err(|source| CacheError::Decode { id, source })?;
        let size = resource.byte_size();
        let resource = Arc::new(resource);

        // A reentrant call from the loader may have admitted this id already,
        // possibly as another type. An unreferenced entry of another type
        // makes way for the resource that was asked for.
        let displaced = borrow_table(&guard, |t| {
            let entry = t.get(id)?;
            if entry.ref_count > 0 || entry.payload.value.is::<T>() {
                return None;
            }
            let cached = entry.payload.type_name;
            t.evict_unreferenced(id).then_some(cached)
        });
        if let Some(cached) = displaced {
            log::debug!(
                "Resource {} was cached as {} during its decode as {}, replacing it",
                id,
                cached,
                T::type_name()
            );
        }
        if let Some(handle) = self.try_hit::<T>(&guard, id)? {
            log::debug!("Resource {} was admitted during its own decode", id);
            return Ok(handle);
        }

        let payload = TypedPayload {
            value: resource.clone(),
            type_name: T::type_name(),
        };
        borrow_table(&guard, |t| t.admit(id, payload, size, false))?;
        Ok(ResourceHandle::new(self.shared.clone(), id, resource))
    }

    /// Fetch raw bytes without touching the cache
    pub fn get_uncached_buffer(&self, key: impl Into<ResourceKey>) -> Result<PinnedResourceHandle, CacheError> {
        let key = key.into();
        let id = self.shared.source.resolve(&key)?.id;
        let data = self.shared.source.resource_data(id)?;
        Ok(PinnedResourceHandle::new(id, data))
    }

    /// Largest decoded size the cache could ever hold
    pub fn max_cache_buffer_size(&self) -> usize {
        self.lock_table(|t| t.limits().max_volatile_size)
    }

    /// Whether a resource of `size` bytes is better fetched uncached:
    /// `size * 3 > capacity` leaves headroom for decode overhead
    pub fn should_bypass(&self, size: usize) -> bool {
        size.saturating_mul(3) > self.max_cache_buffer_size()
    }

    /// Evict every unreferenced entry, returning how many went
    pub fn purge(&self) -> usize {
        self.lock_table(|t| t.purge_volatile())
    }

    pub fn stats(&self) -> CacheStats {
        self.lock_table(|t| t.stats())
    }

    pub fn contains(&self, key: impl Into<ResourceKey>) -> bool {
        self.entry_info(key, |_, _| ()).is_some()
    }

    pub fn location(&self, key: impl Into<ResourceKey>) -> Option<EntryLocation> {
        self.entry_info(key, |location, _| location)
    }

    /// Live handle count for a cached resource
    pub fn ref_count(&self, key: impl Into<ResourceKey>) -> Option<u32> {
        self.entry_info(key, |_, refs| refs)
    }

    fn try_hit<T: CacheLoadable>(
        &self,
        table: &RefCell<CacheTable<TypedPayload>>,
        id: ResourceId,
    ) -> Result<Option<ResourceHandle<T>>, CacheError> {
        let value = borrow_table(table, |table| {
            let Some(entry) = table.get(id) else {
                return Ok(None);
            };

            let value = match entry.payload.value.clone().downcast::<T>() {
                Ok(value) => value,
                Err(_) => {
                    let cached = entry.payload.type_name;
                    log::error!(
                        "Resource {} requested as {} but cached as {}",
                        id,
                        T::type_name(),
                        cached
                    );
                    return Err(CacheError::TypeMismatch {
                        id,
                        cached,
                        requested: T::type_name(),
                    });
                }
            };

            // A promotion may evict, so this goes through `borrow_table`
            table.acquire(id);
            Ok(Some(value))
        })?;
        Ok(value.map(|value| ResourceHandle::new(self.shared.clone(), id, value)))
    }

    fn lock_table<R>(&self, f: impl FnOnce(&mut CacheTable<TypedPayload>) -> R) -> R {
        let guard = self.shared.table.lock();
        borrow_table(&guard, f)
    }

    fn entry_info<R>(&self, key: impl Into<ResourceKey>, f: impl FnOnce(EntryLocation, u32) -> R) -> Option<R> {
        let id = self.shared.source.resolve(&key.into()).ok()?.id;
        self.lock_table(|t| t.get(id).map(|e| f(e.location, e.ref_count)))
    }

    #[cfg(test)]
    pub(crate) fn with_table<R>(&self, f: impl FnOnce(&CacheTable<TypedPayload>) -> R) -> R {
        self.lock_table(|t| f(t))
    }
}

/// Run `f` on the borrowed table, then drop the payloads that left it once
/// the borrow has ended
fn borrow_table<R>(
    table: &RefCell<CacheTable<TypedPayload>>,
    f: impl FnOnce(&mut CacheTable<TypedPayload>) -> R,
) -> R {
    let (result, retired) = {
        let mut table = table.borrow_mut();
        let result = f(&mut table);
        (result, table.take_retired())
    };
    drop(retired);
    result
}

impl fmt::Debug for UnifiedCacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("UnifiedCacheManager")
            .field("max_volatile_size", &stats.max_volatile_size)
            .field("volatile_size", &stats.volatile_size)
            .field("entries", &stats.entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::audio::wav_bytes;
    use crate::resource::{
        BufferResource, DecodeError, MemorySource, ResourceKind, SoundResource, TextureDecoder,
        TextureResource,
    };
    use std::thread;

    fn config(max_volatile: usize, a1_ratio: f64) -> CacheConfig {
        CacheConfig {
            max_volatile_size: max_volatile,
            a1_ratio,
            ..CacheConfig::default()
        }
    }

    fn buffers(sizes: &[usize]) -> Arc<MemorySource> {
        let mut pack = MemorySource::new();
        for (i, &size) in sizes.iter().enumerate() {
            pack.add(Some(&format!("buf.{}", i)), ResourceKind::Binary, vec![i as u8; size]);
        }
        Arc::new(pack)
    }

    #[test]
    fn test_cache_new() {
        let cache = UnifiedCacheManager::new(buffers(&[]), &config(1024, 0.25));
        assert_eq!(cache.max_cache_buffer_size(), 1024);
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.target_a1_size, 256);
        assert_eq!(stats.max_persistent_size, 0);
    }

    #[test]
    fn test_miss_then_hit_returns_same_object() {
        let cache = UnifiedCacheManager::new(buffers(&[10]), &config(1024, 0.25));
        let a = cache.get::<BufferResource>(0).unwrap();
        let b = cache.get::<BufferResource>("buf.0").unwrap();
        assert!(ResourceHandle::ptr_eq(&a, &b));
        assert_eq!(a.len(), 10);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(cache.ref_count(0), Some(2));
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let cache = UnifiedCacheManager::new(buffers(&[10]), &config(1024, 0.25));
        assert!(cache.get::<BufferResource>("nope").unwrap_err().is_not_found());
        assert!(cache.get::<BufferResource>(99).unwrap_err().is_not_found());
        assert_eq!(cache.stats().misses, 0);
    }

    #[test]
    fn test_drop_releases_without_evicting() {
        let cache = UnifiedCacheManager::new(buffers(&[10]), &config(1024, 0.25));
        let handle = cache.get::<BufferResource>(0).unwrap();
        drop(handle);
        assert_eq!(cache.ref_count(0), Some(0));
        assert!(cache.contains(0));
    }

    #[test]
    fn test_second_touch_promotes() {
        let cache = UnifiedCacheManager::new(buffers(&[10]), &config(1024, 0.25));
        let _first = cache.get::<BufferResource>(0).unwrap();
        assert_eq!(cache.location(0), Some(EntryLocation::A1));
        let _second = cache.get::<BufferResource>(0).unwrap();
        assert_eq!(cache.location(0), Some(EntryLocation::AMain));
        cache.with_table(|t| {
            assert_eq!(t.a_main_ids(), vec![0]);
            t.assert_consistent();
        });
    }

    #[test]
    fn test_type_mismatch_is_loud() {
        let mut pack = MemorySource::new();
        let texture = TextureResource::new(1, 1, vec![1, 2, 3, 4]).unwrap();
        pack.add(Some("tex"), ResourceKind::Texture, texture.to_raw_container());
        let cache = UnifiedCacheManager::new(Arc::new(pack), &config(1024, 0.25));

        let _tex = cache.get::<TextureResource>("tex").unwrap();
        let err = cache.get::<SoundResource>("tex").unwrap_err();
        assert!(matches!(
            err,
            CacheError::TypeMismatch {
                cached: "TextureResource",
                requested: "SoundResource",
                ..
            }
        ));
        assert_eq!(cache.ref_count("tex"), Some(1));
    }

    #[test]
    fn test_decode_failure_admits_nothing() {
        let mut pack = MemorySource::new();
        pack.add(Some("bad"), ResourceKind::Sound, b"not audio".to_vec());
        let cache = UnifiedCacheManager::new(Arc::new(pack), &config(1024, 0.25));

        let err = cache.get::<SoundResource>("bad").unwrap_err();
        assert!(matches!(
            err,
            CacheError::Decode {
                source: DecodeError::UnsupportedFormat(_),
                ..
            }
        ));
        assert!(!cache.contains("bad"));
        assert_eq!(cache.stats().volatile_size, 0);
    }

    #[test]
    fn test_texture_decoder_choice() {
        let mut pack = MemorySource::new();
        let texture = TextureResource::new(2, 1, vec![7; 8]).unwrap();
        pack.add(Some("raw"), ResourceKind::Texture, texture.to_raw_container());
        let cache = UnifiedCacheManager::new(Arc::new(pack), &config(1024, 0.25));

        let err = cache
            .get_with::<TextureResource>("raw", TextureDecoder::Image(image::ImageFormat::Png))
            .unwrap_err();
        assert!(matches!(err, CacheError::Decode { .. }));

        let handle = cache
            .get_with::<TextureResource>("raw", TextureDecoder::Raw)
            .unwrap();
        assert_eq!(*handle, texture);
        assert_eq!(cache.stats().volatile_size, 8);
    }

    #[test]
    fn test_sound_is_cached_by_decoded_size() {
        let mut pack = MemorySource::new();
        pack.add(Some("beep"), ResourceKind::Sound, wav_bytes(8000, 1, 8, &[128; 100]));
        let cache = UnifiedCacheManager::new(Arc::new(pack), &config(1024, 0.25));

        let sound = cache.get::<SoundResource>("beep").unwrap();
        assert_eq!(sound.samples.len(), 100);
        // 8-bit source widened to 16-bit samples
        assert_eq!(cache.stats().volatile_size, 200);
    }

    #[test]
    fn test_oversize_fails_but_uncached_succeeds() {
        let cache = UnifiedCacheManager::new(buffers(&[301]), &config(300, 0.5));
        let err = cache.get::<BufferResource>(0).unwrap_err();
        assert!(matches!(
            err,
            CacheError::CapacityExceeded {
                size: 301,
                capacity: 300,
                ..
            }
        ));
        assert!(err.is_capacity_error());

        let pinned = cache.get_uncached_buffer(0).unwrap();
        assert_eq!(pinned.len(), 301);
        assert_eq!(cache.stats().entries, 0);
        assert!(cache.should_bypass(101));
        assert!(!cache.should_bypass(100));
    }

    #[test]
    fn test_purge_keeps_referenced() {
        let cache = UnifiedCacheManager::new(buffers(&[10, 10, 10]), &config(1024, 0.5));
        let keep = cache.get::<BufferResource>(1).unwrap();
        drop(cache.get::<BufferResource>(0).unwrap());
        drop(cache.get::<BufferResource>(2).unwrap());

        assert_eq!(cache.purge(), 2);
        assert!(cache.contains(1));
        assert_eq!(keep.id(), 1);
    }

    /// Decodes a texture and, in the same call, pulls the raw bytes of the
    /// same id through the cache.
    #[derive(Debug)]
    struct TextureWithSource;

    impl CacheLoadable for TextureWithSource {
        type Options = ();

        fn load(ctx: &LoadContext<'_>, data: Vec<u8>, _: ()) -> Result<Self, DecodeError> {
            let raw = ctx
                .cache()
                .get::<BufferResource>(ctx.id())
                .map_err(|e| DecodeError::InvalidData(e.to_string()))?;
            assert_eq!(raw.len(), data.len());
            Ok(Self)
        }

        fn byte_size(&self) -> usize {
            1
        }
    }

    /// Like `TextureWithSource`, but keeps the raw bytes handle
    #[derive(Debug)]
    struct TextureKeepingSource {
        _raw: ResourceHandle<BufferResource>,
    }

    impl CacheLoadable for TextureKeepingSource {
        type Options = ();

        fn load(ctx: &LoadContext<'_>, _: Vec<u8>, _: ()) -> Result<Self, DecodeError> {
            let raw = ctx
                .cache()
                .get::<BufferResource>(ctx.id())
                .map_err(|e| DecodeError::InvalidData(e.to_string()))?;
            Ok(Self { _raw: raw })
        }

        fn byte_size(&self) -> usize {
            1
        }
    }

    /// A scene that holds on to the resource stored right after it
    #[derive(Debug)]
    struct SceneWithCompanion {
        companion: ResourceHandle<BufferResource>,
    }

    impl CacheLoadable for SceneWithCompanion {
        type Options = ();

        fn load(ctx: &LoadContext<'_>, _: Vec<u8>, _: ()) -> Result<Self, DecodeError> {
            let companion = ctx
                .cache()
                .get::<BufferResource>(ctx.id() + 1)
                .map_err(|e| DecodeError::InvalidData(e.to_string()))?;
            Ok(Self { companion })
        }

        fn byte_size(&self) -> usize {
            8
        }
    }

    #[test]
    fn test_reentrant_loader_same_id() {
        let cache = UnifiedCacheManager::new(buffers(&[40]), &config(1024, 0.25));
        // The nested get caches id 0 as a buffer and lets go of it, so the
        // texture takes its place
        let texture = cache.get::<TextureWithSource>(0).unwrap();
        assert_eq!(cache.ref_count(0), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.volatile_size, 1);

        let err = cache.get::<BufferResource>(0).unwrap_err();
        assert!(matches!(
            err,
            CacheError::TypeMismatch {
                cached: "TextureWithSource",
                requested: "BufferResource",
                ..
            }
        ));
        drop(texture);
        cache.with_table(|t| t.assert_consistent());
    }

    #[test]
    fn test_reentrant_loader_keeping_same_id() {
        let cache = UnifiedCacheManager::new(buffers(&[40]), &config(1024, 0.25));
        // The buffer is still referenced by the new texture, so it stays
        let err = cache.get::<TextureKeepingSource>(0).unwrap_err();
        assert!(matches!(err, CacheError::TypeMismatch { .. }));
        assert_eq!(cache.ref_count(0), Some(0));
        assert!(cache.get::<BufferResource>(0).is_ok());
        cache.with_table(|t| t.assert_consistent());
    }

    #[test]
    fn test_purge_drops_payload_holding_handle() {
        let cache = UnifiedCacheManager::new(buffers(&[10, 30]), &config(1024, 0.25));
        let scene = cache.get::<SceneWithCompanion>(0).unwrap();
        assert_eq!(scene.companion.len(), 30);
        assert_eq!(cache.ref_count(1), Some(1));
        drop(scene);

        // Only the scene is free; dropping it frees the companion
        assert_eq!(cache.purge(), 1);
        assert!(!cache.contains(0));
        assert_eq!(cache.ref_count(1), Some(0));
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.stats().entries, 0);
        cache.with_table(|t| t.assert_consistent());
    }

    #[test]
    fn test_eviction_drops_payload_holding_handle() {
        // A1 target is 50 bytes
        let cache = UnifiedCacheManager::new(buffers(&[10, 30, 60]), &config(100, 0.5));
        drop(cache.get::<SceneWithCompanion>(0).unwrap());
        assert_eq!(cache.stats().volatile_size, 38);

        // Trimming A1 after this admission evicts the scene
        let big = cache.get::<BufferResource>(2).unwrap();
        assert_eq!(big.len(), 60);
        assert!(!cache.contains(0));
        assert_eq!(cache.ref_count(1), Some(0));

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.volatile_size, 90);
        cache.with_table(|t| t.assert_consistent());
    }

    #[test]
    fn test_refused_payload_holding_handle() {
        // The scene itself does not fit next to its pinned companion
        let cache = UnifiedCacheManager::new(buffers(&[10, 95]), &config(100, 0.5));
        let err = cache.get::<SceneWithCompanion>(0).unwrap_err();
        assert!(matches!(err, CacheError::OutOfMemory { .. }));
        assert_eq!(cache.ref_count(1), Some(0));
        assert!(!cache.contains(0));
    }

    #[test]
    fn test_concurrent_gets() {
        let cache = UnifiedCacheManager::new(buffers(&[50; 8]), &config(200, 0.25));
        let workers: Vec<_> = (0..4)
            .map(|w| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for round in 0..200u32 {
                        let id = (round + w) % 8;
                        match cache.get::<BufferResource>(id) {
                            Ok(handle) => assert_eq!(handle[0], id as u8),
                            Err(e) => assert!(e.is_capacity_error(), "{}", e),
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker should finish");
        }

        let stats = cache.stats();
        assert!(stats.volatile_size <= 200);
        cache.with_table(|t| t.assert_consistent());
        for id in 0..8u32 {
            assert!(cache.ref_count(id).map_or(true, |r| r == 0));
        }
    }

    #[test]
    fn test_debug_output() {
        let cache = UnifiedCacheManager::new(buffers(&[]), &config(1024, 0.25));
        let debug = format!("{:?}", cache);
        assert!(debug.contains("UnifiedCacheManager"));
        assert!(debug.contains("1024"));
    }
}
