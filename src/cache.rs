//! Path lookup cache
//!
//! A fixed array of buckets, each a small LRU map from normalized path to
//! the entry it resolved to. The bucket is picked by a djb2 hash of the path.
//! A full bucket evicts its least recently used path, so insertion never
//! fails. Entries found detached on a probe are dropped and count as misses.

use crate::entry::EntryRef;
use crate::error::{Error, Result};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// djb2 over the path bytes
pub fn hash_path(path: &str) -> u64 {
    path.bytes()
        .fold(5381u64, |h, b| h.wrapping_mul(33).wrapping_add(u64::from(b)))
}

/// Bucketed LRU cache from path to entry
pub struct PathCache {
    buckets: Vec<Mutex<LruCache<String, EntryRef>>>,
    bucket_capacity: NonZeroUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl PathCache {
    /// Create a cache with `buckets` buckets of `bucket_capacity` paths each
    pub fn new(buckets: usize, bucket_capacity: usize) -> Result<Self> {
        if buckets == 0 {
            return Err(Error::InvalidArgument(
                "path cache needs at least one bucket".to_string(),
            ));
        }
        let bucket_capacity = NonZeroUsize::new(bucket_capacity).ok_or_else(|| {
            Error::InvalidArgument("path cache bucket capacity must be non-zero".to_string())
        })?;
        let mut table = Vec::new();
        table.try_reserve_exact(buckets)?;
        table.extend((0..buckets).map(|_| Mutex::new(LruCache::new(bucket_capacity))));
        Ok(Self {
            buckets: table,
            bucket_capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_of(&self, path: &str) -> usize {
        (hash_path(path) % self.buckets.len() as u64) as usize
    }

    fn bucket(&self, path: &str) -> &Mutex<LruCache<String, EntryRef>> {
        &self.buckets[self.bucket_of(path)]
    }

    /// Probe for `path`. Does not touch the entry's reference count.
    pub fn get(&self, path: &str) -> Option<EntryRef> {
        let mut bucket = self.bucket(path).lock();
        let found = match bucket.get(path).cloned() {
            Some(entry) if entry.is_attached() => Some(entry),
            Some(_) => {
                bucket.pop(path);
                None
            }
            None => None,
        };
        drop(bucket);

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Remember `path -> entry`, evicting the bucket's oldest path if full
    pub fn insert(&self, path: &str, entry: EntryRef) {
        let evicted = self.bucket(path).lock().push(path.to_string(), entry);
        if let Some((old_path, _)) = evicted {
            if old_path != path {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(evicted = %old_path, path, "Path cache bucket full");
            }
        }
    }

    /// Drop one path. Returns true if it was cached.
    pub fn invalidate(&self, path: &str) -> bool {
        self.bucket(path).lock().pop(path).is_some()
    }

    /// Drop every path that resolves to `entry`
    pub fn invalidate_entry(&self, entry: &EntryRef) -> usize {
        self.invalidate_where(|_, cached| Arc::ptr_eq(cached, entry))
    }

    /// Drop `prefix` itself and every path below it
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_where(|path, _| {
            path.strip_prefix(prefix)
                .map_or(false, |rest| rest.is_empty() || rest.starts_with('/'))
        })
    }

    fn invalidate_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&str, &EntryRef) -> bool,
    {
        let mut removed = 0;
        for bucket in &self.buckets {
            let mut bucket = bucket.lock();
            let doomed: Vec<String> = bucket
                .iter()
                .filter(|(path, entry)| pred(path.as_str(), *entry))
                .map(|(path, _)| path.clone())
                .collect();
            for path in doomed {
                bucket.pop(&path);
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) {
        for bucket in &self.buckets {
            bucket.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
            capacity: self.buckets.len() * self.bucket_capacity.get(),
            buckets: self.buckets.len(),
        }
    }
}

impl std::fmt::Debug for PathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathCache")
            .field("buckets", &self.buckets.len())
            .field("bucket_capacity", &self.bucket_capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
    pub buckets: usize,
}
