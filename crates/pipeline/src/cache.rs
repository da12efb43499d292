//! Response cache for expensive provider calls.
//!
//! Literature searches and model completions are memoised by a [`CacheKey`]:
//! a SHA-256 fingerprint of the call's semantic inputs. Two calls with the
//! same effective inputs produce the same key regardless of call order, so
//! independent runs sharing one process-wide cache reuse each other's results.
//!
//! # Expiry
//!
//! Every entry carries its own TTL. [`ResponseCache::get`] treats an entry whose
//! `created_at + ttl` has passed as a miss and evicts it on the spot;
//! [`InMemoryCache::purge_expired`] sweeps the whole map. An optional entry
//! bound ([`InMemoryCache::with_max_entries`]) evicts the oldest entry first.
//!
//! # Concurrency
//!
//! The map is guarded by a `parking_lot::RwLock`. Values are replaced as a
//! whole under the write lock, so overlapping `put`s on one key resolve to the
//! last writer and a reader never observes a partial value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================================================
// Keys
// ============================================================================

/// Hex-encoded SHA-256 fingerprint identifying one cached call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds a [`CacheKey`] from a namespace and an ordered list of parts.
///
/// Parts are length-prefixed before hashing, so `("ab", "c")` and `("a", "bc")`
/// never collide.
///
/// ```
/// use pipeline::cache::Fingerprint;
///
/// let a = Fingerprint::new("search").query("Graphene  Batteries").part("5").finish();
/// let b = Fingerprint::new("search").query("graphene batteries").part("5").finish();
/// assert_eq!(a, b);
/// ```
pub struct Fingerprint {
    hasher: Sha256,
}

impl Fingerprint {
    pub fn new(namespace: &str) -> Self {
        let mut fingerprint = Self {
            hasher: Sha256::new(),
        };
        fingerprint.absorb(namespace);
        fingerprint
    }

    /// Adds a part verbatim.
    pub fn part(mut self, value: &str) -> Self {
        self.absorb(value);
        self
    }

    /// Adds a free-text query after [`normalize_query`].
    pub fn query(self, query: &str) -> Self {
        let normalized = normalize_query(query);
        self.part(&normalized)
    }

    pub fn finish(self) -> CacheKey {
        CacheKey(format!("{:x}", self.hasher.finalize()))
    }

    fn absorb(&mut self, value: &str) {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
    }
}

/// Lowercases and collapses runs of whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// Cache trait
// ============================================================================

/// Key/value store with per-entry expiration.
///
/// Implementations must be safe to share between concurrent runs.
pub trait ResponseCache: Send + Sync {
    /// The live value for `key`, or `None` on a miss or an expired entry.
    fn get(&self, key: &CacheKey) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous entry.
    fn put(&self, key: CacheKey, value: String, ttl: Duration);

    fn invalidate(&self, key: &CacheKey);
}

/// Counters for cache monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed because they expired or the bound was reached.
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Hit rate in `[0, 1]`; `0` before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Process-wide in-memory [`ResponseCache`].
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_entries: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryCache {
    /// An unbounded cache; entries leave only through expiry or invalidation.
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `max_entries`; inserting into a full cache
    /// evicts the oldest entry.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
            ..Self::default()
        }
    }

    /// Removes every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - entries.len();
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.read().len(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ResponseCache for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: re-check under the write lock, a concurrent put may have
        // refreshed the entry in between.
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: CacheKey, value: String, ttl: Duration) {
        let mut entries = self.entries.write();
        if let Some(max) = self.max_entries {
            while entries.len() >= max && !entries.contains_key(&key) {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.created_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(oldest) => {
                        entries.remove(&oldest);
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at: Instant::now(),
                ttl,
            },
        );
    }

    fn invalidate(&self, key: &CacheKey) {
        self.entries.write().remove(key);
    }
}
