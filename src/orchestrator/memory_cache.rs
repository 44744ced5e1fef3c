//! In-process keyed cache: the first lookup tier.

use crate::discovery_store::{ArtistProfile, RelationshipEdge, TrackRecord};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Which lookup an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    ArtistProfile,
    Track,
    TopTracks,
    RelatedArtists,
    PopularArtists,
    GenreSearch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Artist(ArtistProfile),
    Track(TrackRecord),
    Tracks(Vec<TrackRecord>),
    Artists(Vec<ArtistProfile>),
    Edges(Vec<RelationshipEdge>),
}

struct CacheEntry {
    value: CachedValue,
    inserted_at: Instant,
}

#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(15 * 60),
            max_entries: 10_000,
        }
    }
}

/// TTL'd map bounded by entry count; the oldest entry is evicted when full.
/// Process-local, no coherence with other instances.
pub struct MemoryCache {
    entries: Mutex<HashMap<(CacheKind, String), CacheEntry>>,
    config: MemoryCacheConfig,
}

impl MemoryCache {
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Expired entries are removed on read.
    pub fn get(&self, kind: CacheKind, key: &str) -> Option<CachedValue> {
        let mut entries = self.entries.lock().unwrap();
        let cache_key = (kind, key.to_string());
        let entry = entries.get(&cache_key)?;
        if entry.inserted_at.elapsed() < self.config.ttl {
            return Some(entry.value.clone());
        }
        entries.remove(&cache_key);
        None
    }

    pub fn put(&self, kind: CacheKind, key: &str, value: CachedValue) {
        if self.config.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap();
        let cache_key = (kind, key.to_string());

        if !entries.contains_key(&cache_key) && entries.len() >= self.config.max_entries {
            let ttl = self.config.ttl;
            entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            if entries.len() >= self.config.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            cache_key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, kind: CacheKind, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .remove(&(kind, key.to_string()))
            .is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
