//! Strict LRU cache for embedding vectors.
//!
//! Recency is tracked with a monotonically increasing access tick: the map
//! holds `key → (vector, tick)` and an ordered index holds `tick → key`, so
//! the least recently used entry is always the first entry of the index.
//! Hit and miss counters live next to the entries so a reset clears both at
//! once.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::text::normalize_whitespace;

struct CacheEntry {
    vector: Vec<f32>,
    last_access: u64,
}

/// Occupancy and effectiveness counters.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct LruCache {
    capacity: usize,
    entries: HashMap<u64, CacheEntry>,
    recency: BTreeMap<u64, u64>,
    tick: u64,
    hits: u64,
    misses: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Look up `key`, refreshing its recency on a hit. Counts the lookup.
    pub fn get(&mut self, key: u64) -> Option<Vec<f32>> {
        let tick = self.next_tick();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                self.recency.remove(&entry.last_access);
                entry.last_access = tick;
                self.recency.insert(tick, key);
                self.hits += 1;
                Some(entry.vector.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or overwrite `key`, evicting the least recently used entries
    /// while over capacity.
    pub fn insert(&mut self, key: u64, vector: Vec<f32>) {
        let tick = self.next_tick();
        if let Some(old) = self.entries.insert(
            key,
            CacheEntry {
                vector,
                last_access: tick,
            },
        ) {
            self.recency.remove(&old.last_access);
        }
        self.recency.insert(tick, key);

        while self.entries.len() > self.capacity {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    pub fn contains(&self, key: u64) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.hits = 0;
        self.misses = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }
}

/// Cache key for `text`: a hash of its whitespace-normalized prefix of at
/// most `prefix_chars` characters.
///
/// Two texts that only differ after the prefix share a key, and therefore a
/// cached vector.
pub fn cache_key(text: &str, prefix_chars: usize) -> u64 {
    // Normalizing can only shrink the text, so a raw window of twice the
    // prefix length is always enough.
    let window = crate::text::truncate_chars(text, prefix_chars.saturating_mul(2));
    let normalized = normalize_whitespace(window);
    let prefix = crate::text::truncate_chars(&normalized, prefix_chars);

    let digest = Sha256::digest(prefix.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
