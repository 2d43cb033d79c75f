//! Handles returned by the cache stores
//!
//! A `ResourceHandle` holds one reference on a cache entry for as long as
//! it lives, which keeps the entry out of every eviction pass. Dropping it
//! gives the reference back exactly once. Moving a handle moves the
//! reference with it, and the compiler rejects any use of the moved-from
//! binding, so a double release cannot be written.
//!
//! A `PinnedResourceHandle` owns a private copy of the raw bytes and has
//! nothing to do with any cache.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use super::index::ResourceId;

/// Back-reference from a handle to the store that issued it
pub(crate) trait ReleaseRef: Send + Sync {
    fn release(&self, id: ResourceId);
}

/// RAII reference to a cached resource
pub struct ResourceHandle<T: ?Sized + Send + Sync> {
    owner: Arc<dyn ReleaseRef>,
    id: ResourceId,
    resource: Arc<T>,
}

impl<T: ?Sized + Send + Sync> ResourceHandle<T> {
    /// Only called by a store after it has bumped the entry's count
    pub(crate) fn new(owner: Arc<dyn ReleaseRef>, id: ResourceId, resource: Arc<T>) -> Self {
        Self {
            owner,
            id,
            resource,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// True when both handles point at the same cached object
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.resource, &b.resource)
    }

    /// Give the reference back now instead of at end of scope
    pub fn release(self) {}
}

impl<T: ?Sized + Send + Sync> Deref for ResourceHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.resource
    }
}

impl<T: ?Sized + Send + Sync> AsRef<T> for ResourceHandle<T> {
    fn as_ref(&self) -> &T {
        &self.resource
    }
}

impl<T: ?Sized + Send + Sync> Drop for ResourceHandle<T> {
    fn drop(&mut self) {
        self.owner.release(self.id);
    }
}

impl<T: ?Sized + Send + Sync> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Uncached raw bytes, owned outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedResourceHandle {
    id: ResourceId,
    data: Vec<u8>,
}

impl PinnedResourceHandle {
    pub(crate) fn new(id: ResourceId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for PinnedResourceHandle {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}
