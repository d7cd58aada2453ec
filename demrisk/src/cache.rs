//! Content-addressed memoization of pipeline results.
//!
//! [`FingerprintCache`] maps a tile-set [`Fingerprint`] to a previously
//! computed result. Lookups for the same fingerprint that arrive while a
//! computation is running wait for it instead of starting their own.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use moka::policy::EvictionPolicy;
use moka::sync::Cache;

use crate::error::{Result, TerrainError};
use crate::pipeline::PipelineResult;
use crate::tileset::Fingerprint;

/// Default number of results kept in memory.
pub const DEFAULT_CACHE_SIZE: u64 = 32;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of results currently in the cache.
    pub entry_count: u64,
    /// Number of lookups served from the cache.
    pub hit_count: u64,
    /// Number of lookups that ran the computation.
    pub miss_count: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0).
    ///
    /// Returns 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

/// Bounded LRU cache of results keyed by tile-set fingerprint.
///
/// # Example
///
/// ```ignore
/// use demrisk::{FingerprintCache, TileSet};
///
/// let cache = FingerprintCache::new(32);
/// let tiles = TileSet::scan("/data/site", &[])?;
/// let result = cache.get_or_compute(tiles.fingerprint()?, || run_pipeline(&tiles))?;
/// ```
pub struct FingerprintCache<V = PipelineResult> {
    entries: Cache<Fingerprint, Arc<V>>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl<V: Send + Sync + 'static> FingerprintCache<V> {
    /// Create a cache holding at most `capacity` results.
    pub fn new(capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(capacity)
                .eviction_policy(EvictionPolicy::lru())
                .build(),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    /// Return the result stored for `fingerprint`, running `compute` on a miss.
    ///
    /// A `None` fingerprint is never cached: `compute` runs on every call.
    /// Errors from `compute` are returned to every caller waiting on the same
    /// fingerprint and nothing is stored.
    pub fn get_or_compute<F>(&self, fingerprint: Option<Fingerprint>, compute: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let Some(fingerprint) = fingerprint else {
            tracing::debug!("No fingerprint, bypassing cache");
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            return compute().map(Arc::new);
        };

        let mut computed = false;
        let result = self.entries.try_get_with(fingerprint.clone(), || {
            computed = true;
            compute().map(Arc::new)
        });

        if computed {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%fingerprint, "Cache miss");
        } else {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%fingerprint, "Cache hit");
        }

        // moka keeps a reference to the error, so rebuild the typed variant
        result.map_err(TerrainError::from_shared)
    }

    /// Whether a result is stored for `fingerprint`.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.entries.contains_key(fingerprint)
    }

    /// Drop the result stored for `fingerprint`, if any.
    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.invalidate(fingerprint);
    }

    /// Drop every stored result.
    pub fn clear(&self) {
        self.entries.invalidate_all();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.entry_count(),
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        }
    }

    /// Get the maximum number of stored results.
    pub fn capacity(&self) -> u64 {
        self.entries.policy().max_capacity().unwrap_or(0)
    }

    /// Apply pending evictions and bookkeeping now instead of lazily.
    pub fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks();
    }
}

impl<V: Send + Sync + 'static> Default for FingerprintCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}
