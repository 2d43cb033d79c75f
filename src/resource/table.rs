//! Cache table - the admission/eviction engine shared by both cache stores
//!
//! Entries live in one of three places:
//! - `A1`: admitted once, probationary. Budgeted to `target_a1_size`.
//! - `AMain`: touched at least twice, the working set. Gets whatever
//!   volatile budget A1 does not.
//! - `Persistent`: outside both queues, counted against a separate budget
//!   and never evicted automatically.
//!
//! Eviction scans a queue from its oldest end and skips every entry with a
//! nonzero reference count. If a scan finds nothing evictable the pass
//! stops rather than spinning.
//!
//! The table is plain data; callers provide the locking. Payloads that
//! leave the table (evicted, purged, or refused at admission) are parked
//! until the caller takes them with `take_retired`, so a payload whose
//! drop reenters the cache is never dropped inside a table borrow.

use std::collections::HashMap;

use super::error::CacheError;
use super::index::ResourceId;
use super::queue::EvictionQueue;
use crate::config::CacheConfig;

/// Where an entry currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryLocation {
    A1,
    AMain,
    Persistent,
}

pub(crate) struct CacheEntry<P> {
    pub payload: P,
    pub size: usize,
    pub ref_count: u32,
    pub location: EntryLocation,
}

/// Byte budgets derived from a `CacheConfig`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CacheLimits {
    pub max_volatile_size: usize,
    pub target_a1_size: usize,
    pub max_persistent_size: usize,
    pub max_single_persistent_size: usize,
}

impl CacheLimits {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_volatile_size: config.max_volatile_size,
            target_a1_size: config.target_a1_size(),
            max_persistent_size: config.max_persistent_size,
            max_single_persistent_size: config.max_single_persistent_size,
        }
    }

    /// Limits with no persistent tier
    pub fn volatile_only(config: &CacheConfig) -> Self {
        Self {
            max_persistent_size: 0,
            max_single_persistent_size: 0,
            ..Self::from_config(config)
        }
    }

    fn max_a_main_size(&self) -> usize {
        self.max_volatile_size.saturating_sub(self.target_a1_size)
    }
}

/// Counters and gauges for one cache store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the table
    pub hits: u64,
    /// Lookups that had to go to the source
    pub misses: u64,
    /// A1 entries moved to A-main on a second touch
    pub promotions: u64,
    pub evictions: u64,
    /// Successful volatile admissions
    pub admissions: u64,
    pub persistent_admissions: u64,
    /// Admissions refused for capacity reasons
    pub failed_admissions: u64,

    pub entries: usize,
    pub a1_entries: usize,
    pub a_main_entries: usize,
    pub persistent_entries: usize,
    pub volatile_size: usize,
    pub a1_size: usize,
    pub persistent_size: usize,
    pub max_volatile_size: usize,
    pub target_a1_size: usize,
    pub max_persistent_size: usize,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub(crate) struct CacheTable<P> {
    entries: HashMap<ResourceId, CacheEntry<P>>,
    a1_queue: EvictionQueue,
    a_main_queue: EvictionQueue,
    current_volatile_size: usize,
    current_a1_size: usize,
    current_persistent_size: usize,
    limits: CacheLimits,
    stats: CacheStats,
    retired: Vec<P>,
}

impl<P> CacheTable<P> {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            entries: HashMap::new(),
            a1_queue: EvictionQueue::new(),
            a_main_queue: EvictionQueue::new(),
            current_volatile_size: 0,
            current_a1_size: 0,
            current_persistent_size: 0,
            limits,
            stats: CacheStats::default(),
            retired: Vec::new(),
        }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    pub fn get(&self, id: ResourceId) -> Option<&CacheEntry<P>> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn record_miss(&mut self) {
        self.stats.misses += 1;
    }

    /// Take a reference on an existing entry and apply the recency rules.
    ///
    /// A second touch moves an A1 entry to the front of A-main and
    /// re-enforces the A-main budget. An A-main entry is only moved to the
    /// front. Persistent entries are not requeued.
    pub fn acquire(&mut self, id: ResourceId) -> Option<&P> {
        let entry = self.entries.get_mut(&id)?;
        entry.ref_count += 1;
        self.stats.hits += 1;

        match entry.location {
            EntryLocation::A1 => {
                entry.location = EntryLocation::AMain;
                let size = entry.size;
                self.a1_queue.remove(id);
                self.a_main_queue.push_front(id);
                self.current_a1_size -= size;
                self.stats.promotions += 1;
                log::debug!("Promoted resource {} to A-main ({} bytes)", id, size);
                self.trim_a_main();
            }
            EntryLocation::AMain => {
                self.a_main_queue.move_to_front(id);
            }
            EntryLocation::Persistent => {}
        }

        self.entries.get(&id).map(|e| &e.payload)
    }

    /// Admit a freshly decoded payload with one reference held.
    ///
    /// A persistent request that fits both persistent budgets bypasses the
    /// queues entirely; anything else goes through volatile admission. The
    /// table is left untouched when admission fails.
    pub fn admit(
        &mut self,
        id: ResourceId,
        payload: P,
        size: usize,
        as_persistent: bool,
    ) -> Result<EntryLocation, CacheError> {
        debug_assert!(!self.entries.contains_key(&id), "resource {} admitted twice", id);

        if as_persistent && self.fits_persistent(size) {
            self.current_persistent_size += size;
            self.stats.persistent_admissions += 1;
            self.entries.insert(
                id,
                CacheEntry {
                    payload,
                    size,
                    ref_count: 1,
                    location: EntryLocation::Persistent,
                },
            );
            log::debug!(
                "Admitted resource {} as persistent ({} bytes, {}/{} used)",
                id,
                size,
                self.current_persistent_size,
                self.limits.max_persistent_size
            );
            return Ok(EntryLocation::Persistent);
        }

        if size > self.limits.max_volatile_size {
            self.stats.failed_admissions += 1;
            self.retired.push(payload);
            return Err(CacheError::CapacityExceeded {
                id,
                size,
                capacity: self.limits.max_volatile_size,
            });
        }

        let pinned = self.current_volatile_size - self.reclaimable_size();
        if pinned + size > self.limits.max_volatile_size {
            self.stats.failed_admissions += 1;
            self.retired.push(payload);
            return Err(CacheError::OutOfMemory {
                id,
                requested: size,
                available: self.limits.max_volatile_size - pinned,
            });
        }

        self.make_room(size);

        self.entries.insert(
            id,
            CacheEntry {
                payload,
                size,
                ref_count: 1,
                location: EntryLocation::A1,
            },
        );
        self.a1_queue.push_front(id);
        self.current_a1_size += size;
        self.current_volatile_size += size;
        self.stats.admissions += 1;
        log::debug!(
            "Admitted resource {} to A1 ({} bytes, {}/{} used)",
            id,
            size,
            self.current_volatile_size,
            self.limits.max_volatile_size
        );

        self.trim_a1();
        Ok(EntryLocation::A1)
    }

    /// Drop one reference. Never evicts; eviction happens on the next
    /// admission that needs the space.
    pub fn release(&mut self, id: ResourceId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.ref_count > 0 => {
                entry.ref_count -= 1;
                true
            }
            Some(_) => {
                log::warn!("Release of resource {} with no outstanding references", id);
                false
            }
            None => {
                log::warn!("Release of resource {} which is not cached", id);
                false
            }
        }
    }

    /// Evict every unreferenced volatile entry
    pub fn purge_volatile(&mut self) -> usize {
        let victims: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.ref_count == 0 && e.location != EntryLocation::Persistent)
            .map(|(&id, _)| id)
            .collect();
        for &id in &victims {
            self.evict(id);
        }
        victims.len()
    }

    /// Drop every unreferenced persistent entry
    pub fn purge_persistent(&mut self) -> usize {
        let victims: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.ref_count == 0 && e.location == EntryLocation::Persistent)
            .map(|(&id, _)| id)
            .collect();
        for &id in &victims {
            if let Some(entry) = self.entries.remove(&id) {
                self.current_persistent_size -= entry.size;
                log::debug!("Dropped persistent resource {} ({} bytes)", id, entry.size);
                self.retired.push(entry.payload);
            }
        }
        victims.len()
    }

    /// Evict one entry if nothing references it
    pub fn evict_unreferenced(&mut self, id: ResourceId) -> bool {
        if !self.is_evictable(id) {
            return false;
        }
        self.evict(id);
        true
    }

    /// Payloads that left the table since the last call. Drop them only
    /// after the table borrow has ended.
    pub fn take_retired(&mut self) -> Vec<P> {
        std::mem::take(&mut self.retired)
    }

    pub fn stats(&self) -> CacheStats {
        let persistent_entries = self.entries.len() - self.a1_queue.len() - self.a_main_queue.len();
        CacheStats {
            entries: self.entries.len(),
            a1_entries: self.a1_queue.len(),
            a_main_entries: self.a_main_queue.len(),
            persistent_entries,
            volatile_size: self.current_volatile_size,
            a1_size: self.current_a1_size,
            persistent_size: self.current_persistent_size,
            max_volatile_size: self.limits.max_volatile_size,
            target_a1_size: self.limits.target_a1_size,
            max_persistent_size: self.limits.max_persistent_size,
            ..self.stats
        }
    }

    fn fits_persistent(&self, size: usize) -> bool {
        size <= self.limits.max_single_persistent_size
            && self.current_persistent_size + size <= self.limits.max_persistent_size
    }

    fn is_evictable(&self, id: ResourceId) -> bool {
        self.entries.get(&id).is_some_and(|e| e.ref_count == 0)
    }

    /// Bytes held by unreferenced volatile entries
    fn reclaimable_size(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.ref_count == 0 && e.location != EntryLocation::Persistent)
            .map(|e| e.size)
            .sum()
    }

    /// Evict oldest-first, A1 before A-main, until `size` more bytes fit.
    /// Callers check beforehand that enough is reclaimable.
    fn make_room(&mut self, size: usize) {
        while self.current_volatile_size + size > self.limits.max_volatile_size {
            let victim = self
                .a1_queue
                .oldest_matching(|id| self.is_evictable(id))
                .or_else(|| self.a_main_queue.oldest_matching(|id| self.is_evictable(id)));
            match victim {
                Some(id) => self.evict(id),
                None => break,
            }
        }
    }

    fn trim_a1(&mut self) {
        while self.current_a1_size > self.limits.target_a1_size {
            match self.a1_queue.oldest_matching(|id| self.is_evictable(id)) {
                Some(id) => self.evict(id),
                None => break,
            }
        }
    }

    fn trim_a_main(&mut self) {
        let max_am_size = self.limits.max_a_main_size();
        while self.current_volatile_size - self.current_a1_size > max_am_size {
            match self.a_main_queue.oldest_matching(|id| self.is_evictable(id)) {
                Some(id) => self.evict(id),
                None => break,
            }
        }
    }

    fn evict(&mut self, id: ResourceId) {
        let Some(entry) = self.entries.remove(&id) else {
            return;
        };
        match entry.location {
            EntryLocation::A1 => {
                self.a1_queue.remove(id);
                self.current_a1_size -= entry.size;
                self.current_volatile_size -= entry.size;
            }
            EntryLocation::AMain => {
                self.a_main_queue.remove(id);
                self.current_volatile_size -= entry.size;
            }
            EntryLocation::Persistent => {
                self.current_persistent_size -= entry.size;
            }
        }
        self.stats.evictions += 1;
        log::debug!(
            "Evicted resource {} from {:?} ({} bytes)",
            id,
            entry.location,
            entry.size
        );
        self.retired.push(entry.payload);
    }

    #[cfg(test)]
    pub fn a1_ids(&self) -> Vec<ResourceId> {
        self.a1_queue.ids()
    }

    #[cfg(test)]
    pub fn a_main_ids(&self) -> Vec<ResourceId> {
        self.a_main_queue.ids()
    }

    /// Check every bookkeeping invariant, panicking on the first violation
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        let mut a1 = 0;
        let mut volatile = 0;
        let mut persistent = 0;
        for (&id, e) in &self.entries {
            match e.location {
                EntryLocation::A1 => {
                    assert!(self.a1_queue.contains(id) && !self.a_main_queue.contains(id));
                    a1 += e.size;
                    volatile += e.size;
                }
                EntryLocation::AMain => {
                    assert!(self.a_main_queue.contains(id) && !self.a1_queue.contains(id));
                    volatile += e.size;
                }
                EntryLocation::Persistent => {
                    assert!(!self.a1_queue.contains(id) && !self.a_main_queue.contains(id));
                    persistent += e.size;
                }
            }
        }
        for id in self.a1_queue.ids().into_iter().chain(self.a_main_queue.ids()) {
            assert!(self.entries.contains_key(&id), "queued id {} has no entry", id);
        }
        assert_eq!(a1, self.current_a1_size);
        assert_eq!(volatile, self.current_volatile_size);
        assert_eq!(persistent, self.current_persistent_size);
        assert!(self.current_volatile_size <= self.limits.max_volatile_size);
        assert!(self.current_persistent_size <= self.limits.max_persistent_size);
    }
}
