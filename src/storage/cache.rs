use std::{collections::HashMap, sync::Arc};

use crate::types::PageId;

pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Shared, immutable page image. Readers clone the `Arc` and never hold the
/// cache lock while decoding.
pub type PageImage = Arc<[u8]>;

struct CacheEntry {
    image: PageImage,
    last_access: u64,
}

/// Cache of committed page images with least-recently-used eviction.
///
/// Only committed images enter the cache; a write transaction keeps its own
/// dirty images until commit publishes them.
pub struct PageCache {
    entries: HashMap<PageId, CacheEntry>,
    capacity: usize,
    access_counter: u64,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub capacity: usize,
    pub resident: usize,
    pub hits: u64,
    pub misses: u64,
}

impl PageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            access_counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, page_id: PageId) -> Option<PageImage> {
        let tick = self.next_access();
        match self.entries.get_mut(&page_id) {
            Some(entry) => {
                entry.last_access = tick;
                self.hits += 1;
                Some(Arc::clone(&entry.image))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, page_id: PageId, image: PageImage) {
        let tick = self.next_access();
        if let Some(entry) = self.entries.get_mut(&page_id) {
            entry.image = image;
            entry.last_access = tick;
            return;
        }
        self.evict_to(self.capacity - 1);
        self.entries.insert(
            page_id,
            CacheEntry {
                image,
                last_access: tick,
            },
        );
    }

    pub fn remove(&mut self, page_id: PageId) {
        self.entries.remove(&page_id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Changes the capacity, evicting the coldest pages if it shrinks.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.evict_to(self.capacity);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            resident: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    fn evict_to(&mut self, target: usize) {
        while self.entries.len() > target {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(&page_id, _)| page_id);
            match victim {
                Some(page_id) => {
                    self.entries.remove(&page_id);
                }
                None => break,
            }
        }
    }

    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }
}
