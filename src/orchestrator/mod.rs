//! Tiered lookup orchestrator.

mod lookup;
mod memory_cache;

pub use lookup::{LookupOutcome, Tier, TieredLookup};
pub use memory_cache::{CacheKind, CachedValue, MemoryCache, MemoryCacheConfig};
