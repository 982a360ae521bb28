//! Content-addressed response cache
//!
//! Memoizes adapter results whose value depends only on their semantic
//! input. Parameters are normalized (strings trimmed and lowercased, arrays
//! sorted, object keys sorted) and hashed together with the operation class
//! into a fixed-length fingerprint, so `{b: 1, a: [3, 1, 2]}` and
//! `{a: [1, 2, 3], b: 1}` share an entry.
//!
//! # Eviction
//!
//! TTL only. An entry is visible while `now - created_at < ttl`; expired
//! entries are dropped when read and swept on every `set`. There is no size
//! bound; [`ResponseCache::clear`] resets everything.
//!
//! # Concurrency
//!
//! Entries live in a `DashMap` and the hit/miss counters are atomics, so a
//! shared `&ResponseCache` serves concurrent callers. Two racing `set`s on
//! the same fingerprint resolve last-write-wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ConductorError;

/// Hex characters kept from the SHA-256 digest
pub const FINGERPRINT_LEN: usize = 32;

// ============================================================================
// Operation classes
// ============================================================================

/// Cacheable operation class, each with its own default TTL
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationClass {
    /// Prompt enhancement (24h)
    Enhancement,
    /// Prompt scoring (12h)
    Scoring,
    /// Plain completion, also the default class (6h)
    Completion,
    /// Follow-up suggestions (30m)
    Suggestions,
}

impl OperationClass {
    /// Label mixed into the fingerprint
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enhancement => "enhancement",
            Self::Scoring => "scoring",
            Self::Completion => "completion",
            Self::Suggestions => "suggestions",
        }
    }
}

/// TTL per operation class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheTtls {
    /// Enhancement TTL
    pub enhancement: Duration,
    /// Scoring TTL
    pub scoring: Duration,
    /// Completion TTL
    pub completion: Duration,
    /// Suggestions TTL
    pub suggestions: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            enhancement: Duration::from_secs(24 * 60 * 60),
            scoring: Duration::from_secs(12 * 60 * 60),
            completion: Duration::from_secs(6 * 60 * 60),
            suggestions: Duration::from_secs(30 * 60),
        }
    }
}

impl CacheTtls {
    /// TTL for `class`
    #[must_use]
    pub fn for_class(&self, class: OperationClass) -> Duration {
        match class {
            OperationClass::Enhancement => self.enhancement,
            OperationClass::Scoring => self.scoring,
            OperationClass::Completion => self.completion,
            OperationClass::Suggestions => self.suggestions,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Cache failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Parameters cannot be turned into a stable key
    #[error("cache parameters are not serializable: {0}")]
    InvalidKey(String),

    /// Value cannot be stored
    #[error("cache value is not serializable: {0}")]
    Unserializable(String),
}

impl From<CacheError> for ConductorError {
    fn from(err: CacheError) -> Self {
        ConductorError::InvalidCacheKey(err.to_string())
    }
}

// ============================================================================
// Key derivation
// ============================================================================

/// Canonical form used for fingerprinting
///
/// Strings are trimmed and lowercased, arrays are normalized then sorted by
/// their serialized form, object keys are sorted.
#[must_use]
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        Value::Array(items) => {
            let mut normalized: Vec<(String, Value)> = items
                .iter()
                .map(normalize)
                .map(|v| (v.to_string(), v))
                .collect();
            normalized.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(normalized.into_iter().map(|(_, v)| v).collect())
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), normalize(&map[key]));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Fingerprint for `class` and `params`
///
/// Fails with [`CacheError::InvalidKey`] when `params` cannot be serialized
/// (for instance a map with non-string keys).
pub fn cache_key<P: Serialize + ?Sized>(
    class: OperationClass,
    params: &P,
) -> Result<String, CacheError> {
    let value = serde_json::to_value(params).map_err(|e| CacheError::InvalidKey(e.to_string()))?;
    let canonical = format!("{}:{}", class.as_str(), normalize(&value));
    let digest = Sha256::digest(canonical.as_bytes());
    let mut key = hex::encode(digest);
    key.truncate(FINGERPRINT_LEN);
    Ok(key)
}

// ============================================================================
// Entries
// ============================================================================

/// One cached value
#[derive(Clone, Debug)]
pub struct CacheEntry<T> {
    /// Stored value
    pub data: T,
    /// Class it was stored under
    pub class: OperationClass,
    /// Insertion time
    pub created_at: Instant,
    /// Lifetime
    pub ttl: Duration,
    /// Successful reads
    pub hit_count: u64,
}

impl<T> CacheEntry<T> {
    fn new(data: T, class: OperationClass, ttl: Duration) -> Self {
        Self {
            data,
            class,
            created_at: Instant::now(),
            ttl,
            hit_count: 0,
        }
    }

    /// Whether the entry is past its TTL at `now`
    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }

    fn touch(&mut self) {
        self.hit_count = self.hit_count.saturating_add(1);
    }
}

impl CacheEntry<Value> {
    fn size_bytes(&self) -> usize {
        self.data.to_string().len()
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Snapshot of cache counters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Successful reads
    pub hits: u64,
    /// Misses, including expired reads
    pub misses: u64,
    /// Hits as a percentage of lookups, two decimals
    pub hit_rate: f64,
    /// Live and not-yet-swept entries
    pub total_entries: usize,
    /// Approximate payload size in KB, two decimals
    #[serde(rename = "approxMemoryKB")]
    pub approx_memory_kb: f64,
}

/// Frequently read entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularEntry {
    /// Fingerprint
    pub key: String,
    /// Operation class
    pub class: OperationClass,
    /// Successful reads
    pub hit_count: u64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// Cache
// ============================================================================

/// Shared TTL cache keyed by fingerprint
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry<Value>>,
    ttls: CacheTtls,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Cache with default TTLs
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache with custom TTLs
    #[must_use]
    pub fn with_ttls(ttls: CacheTtls) -> Self {
        Self {
            ttls,
            ..Self::default()
        }
    }

    /// Configured TTLs
    #[must_use]
    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    /// Look up a value
    ///
    /// A miss, an expired entry, or a stored value of another shape all
    /// count as misses. Expired entries are removed.
    pub fn get<P, T>(&self, class: OperationClass, params: &P) -> Result<Option<T>, CacheError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let key = cache_key(class, params)?;
        Ok(self.get_by_key(&key))
    }

    /// Look up a value by fingerprint
    pub fn get_by_key<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = Instant::now();

        {
            let Some(mut entry) = self.entries.get_mut(key) else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            };

            if !entry.is_expired(now) {
                match serde_json::from_value::<T>(entry.data.clone()) {
                    Ok(data) => {
                        entry.touch();
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Some(data);
                    }
                    Err(e) => {
                        warn!(key, error = %e, "Cached value has unexpected shape");
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                }
            }
        }

        // Guard released above; removing while holding it would deadlock the shard
        self.entries.remove_if(key, |_, e| e.is_expired(now));
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "Cache entry expired");
        None
    }

    /// Store a value with the class TTL, or `ttl` when given
    ///
    /// Sweeps every expired entry first.
    pub fn set<P, T>(
        &self,
        class: OperationClass,
        params: &P,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<String, CacheError>
    where
        P: Serialize + ?Sized,
        T: Serialize + ?Sized,
    {
        let key = cache_key(class, params)?;
        self.set_by_key(&key, class, data, ttl)?;
        Ok(key)
    }

    /// Store a value under a precomputed fingerprint
    pub fn set_by_key<T: Serialize + ?Sized>(
        &self,
        key: &str,
        class: OperationClass,
        data: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value =
            serde_json::to_value(data).map_err(|e| CacheError::Unserializable(e.to_string()))?;

        self.sweep_expired();

        let ttl = ttl.unwrap_or_else(|| self.ttls.for_class(class));
        self.entries
            .insert(key.to_string(), CacheEntry::new(value, class, ttl));
        Ok(())
    }

    /// Drop one entry; returns whether it existed
    pub fn remove<P: Serialize + ?Sized>(
        &self,
        class: OperationClass,
        params: &P,
    ) -> Result<bool, CacheError> {
        let key = cache_key(class, params)?;
        Ok(self.entries.remove(&key).is_some())
    }

    /// Drop every entry and reset counters
    pub fn clear(&self) {
        self.entries.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let swept = before.saturating_sub(self.entries.len());
        if swept > 0 {
            debug!(swept, "Swept expired cache entries");
        }
        swept
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            round2(hits as f64 / lookups as f64 * 100.0)
        };
        let bytes: usize = self
            .entries
            .iter()
            .map(|e| e.key().len() + e.value().size_bytes())
            .sum();

        CacheStats {
            hits,
            misses,
            hit_rate,
            total_entries: self.entries.len(),
            approx_memory_kb: round2(bytes as f64 / 1024.0),
        }
    }

    /// Most-read live entries, highest first
    #[must_use]
    pub fn popular_entries(&self, limit: usize) -> Vec<PopularEntry> {
        let now = Instant::now();
        let mut entries: Vec<PopularEntry> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now) && e.value().hit_count > 0)
            .map(|e| PopularEntry {
                key: e.key().clone(),
                class: e.value().class,
                hit_count: e.value().hit_count,
            })
            .collect();
        entries.sort_by(|a, b| b.hit_count.cmp(&a.hit_count).then_with(|| a.key.cmp(&b.key)));
        entries.truncate(limit);
        entries
    }
}
