//! Per-run directory listing cache.
//!
//! Keyed by `(connection id, path)` so listings from different sessions
//! never mix. Bounded; the oldest insertion is evicted first.

use sftpc_ftp::ftp::DirectoryEntry;
use std::collections::{HashMap, VecDeque};

type CacheKey = (String, String);

pub struct ListingCache {
    capacity: usize,
    entries: HashMap<CacheKey, Vec<DirectoryEntry>>,
    order: VecDeque<CacheKey>,
    hits: u64,
    misses: u64,
}

impl ListingCache {
    /// A capacity of 0 disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, connection_id: &str, path: &str) -> Option<Vec<DirectoryEntry>> {
        let key = (connection_id.to_string(), path.to_string());
        match self.entries.get(&key) {
            Some(entries) => {
                self.hits += 1;
                Some(entries.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, connection_id: &str, path: &str, entries: Vec<DirectoryEntry>) {
        if self.capacity == 0 {
            return;
        }
        let key = (connection_id.to_string(), path.to_string());
        if self.entries.insert(key.clone(), entries).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)`
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(name: &str) -> DirectoryEntry {
        let mut facts = HashMap::new();
        facts.insert("type".to_string(), "file".to_string());
        DirectoryEntry::new(name, "/", facts)
    }

    #[test]
    fn test_keyed_by_connection() {
        let mut cache = ListingCache::new(4);
        cache.insert("a", "/x", vec![entry("one")]);
        assert_eq!(cache.get("a", "/x").map(|v| v.len()), Some(1));
        assert!(cache.get("b", "/x").is_none());
        assert_eq!(cache.counters(), (1, 1));
    }

    #[test]
    fn test_evicts_oldest() {
        let mut cache = ListingCache::new(2);
        cache.insert("c", "/1", vec![]);
        cache.insert("c", "/2", vec![]);
        cache.insert("c", "/3", vec![]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("c", "/1").is_none());
        assert!(cache.get("c", "/3").is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut cache = ListingCache::new(0);
        cache.insert("c", "/", vec![entry("a")]);
        assert!(cache.is_empty());
        assert!(cache.get("c", "/").is_none());
    }
}
