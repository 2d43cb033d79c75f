//! Typed loaders - how raw pack bytes become cacheable resources
//!
//! Every type the unified cache can hold implements `CacheLoadable`. The
//! associated `Options` type selects a loader variant (for textures, the
//! decoder); it only matters on a cache miss.
//!
//! Loaders run while the cache lock is held. The lock is reentrant, so a
//! loader may call back into the cache through `LoadContext::cache`, for
//! example to fetch a companion resource.

use std::any::Any;
use std::fmt;

use super::cache::UnifiedCacheManager;
use super::error::DecodeError;
use super::index::{ResourceDefinition, ResourceId};

/// What a loader gets to see besides the raw bytes
pub struct LoadContext<'a> {
    cache: &'a UnifiedCacheManager,
    definition: &'a ResourceDefinition,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(cache: &'a UnifiedCacheManager, definition: &'a ResourceDefinition) -> Self {
        Self { cache, definition }
    }

    pub fn cache(&self) -> &'a UnifiedCacheManager {
        self.cache
    }

    pub fn definition(&self) -> &'a ResourceDefinition {
        self.definition
    }

    pub fn id(&self) -> ResourceId {
        self.definition.id
    }
}

/// A decoded resource type the unified cache can store
pub trait CacheLoadable: Any + Send + Sync + Sized {
    /// Loader variant chosen by the caller
    type Options: Copy + Default + fmt::Debug;

    /// Decode raw pack bytes
    fn load(ctx: &LoadContext<'_>, data: Vec<u8>, options: Self::Options) -> Result<Self, DecodeError>;

    /// In-memory footprint in bytes, charged against the cache budget
    fn byte_size(&self) -> usize;

    /// Name used in type mismatch errors
    fn type_name() -> &'static str {
        short_type_name::<Self>()
    }
}

/// Last path segment of a type name, e.g. `TextureResource`
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
