//! Recency-ordered eviction queue
//!
//! Thin wrapper over an unbounded `lru::LruCache` used purely for its
//! ordering: O(1) insert-at-front, move-to-front and removal by id, plus
//! iteration from the oldest end. The cache table owns the entries; the
//! queue only holds ids.

use lru::LruCache;

use super::index::ResourceId;

pub(crate) struct EvictionQueue {
    order: LruCache<ResourceId, ()>,
}

impl EvictionQueue {
    pub fn new() -> Self {
        Self {
            order: LruCache::unbounded(),
        }
    }

    /// Insert at the front (most recent end)
    pub fn push_front(&mut self, id: ResourceId) {
        self.order.push(id, ());
    }

    /// Move an existing id to the front. Returns false if absent.
    pub fn move_to_front(&mut self, id: ResourceId) -> bool {
        if self.order.contains(&id) {
            self.order.promote(&id);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: ResourceId) -> bool {
        self.order.pop(&id).is_some()
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.order.contains(&id)
    }

    /// First id, scanning from the tail (oldest) toward the head, that
    /// satisfies `evictable`
    pub fn oldest_matching(&self, mut evictable: impl FnMut(ResourceId) -> bool) -> Option<ResourceId> {
        self.order
            .iter()
            .rev()
            .map(|(&id, _)| id)
            .find(|&id| evictable(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Ids from most to least recent
    pub fn ids(&self) -> Vec<ResourceId> {
        self.order.iter().map(|(&id, _)| id).collect()
    }
}
