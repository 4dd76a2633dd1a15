//! Result cache
//!
//! Holds serialized enriched result sets keyed by query fingerprint. Entries
//! expire after their TTL and are never invalidated on write: readers accept
//! staleness up to the TTL.

mod fingerprint;
mod memory;

pub use fingerprint::fingerprint;
pub use memory::{spawn_sweeper, MemoryCache};

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Cache backend used by the read path
#[async_trait]
pub trait ResultCache: Send + Sync {
    /// Get an unexpired value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, replacing any existing entry
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Usage counters; backends that keep none report zeros
    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Cache usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
}
