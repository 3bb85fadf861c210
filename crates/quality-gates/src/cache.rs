//! Gate Result Cache
//!
//! In-memory cache of gate results keyed by
//! `"<gate-name>:<sha256(target identity, gate name, gate configuration)>"`.
//!
//! Entries expire at `created_at + ttl`. When the cache is full, inserting a
//! new key evicts exactly the least-recently-accessed entry. Recency is
//! tracked with a monotonically increasing access sequence, so two accesses
//! in the same clock tick still have a strict order.
//!
//! Values are returned as owned copies; callers can never mutate what the
//! cache holds.
//!
//! ## Thread Safety
//!
//! `CacheManager` is `Send + Sync`; all state sits behind one mutex and every
//! operation holds it only for the map update.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gatework_core::{CoreError, CoreResult, Target};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::{Gate, GateResult};

/// Lookups remembered for hit-probability estimates.
const RECENT_LOOKUP_WINDOW: usize = 256;

/// Smoothing factor of the access-time moving average.
const ACCESS_TIME_ALPHA: f64 = 0.1;

// ============================================================================
// Cache Trait
// ============================================================================

/// Trait for gate result caching.
///
/// `CacheManager` is the in-process implementation. The engine only talks to
/// this trait, so any backend works; failures are treated by the engine as a
/// miss (on read) or a no-op (on write).
pub trait ResultCache: Send + Sync {
    /// Look up a cached gate result.
    fn get(&self, key: &str) -> CoreResult<Option<GateResult>>;
    /// Store a gate result, with an optional TTL override.
    fn set(&self, key: &str, value: GateResult, ttl: Option<Duration>) -> CoreResult<()>;
    /// Estimated probability that a lookup of `key` hits.
    fn hit_probability(&self, _key: &str) -> f64 {
        0.0
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Default time-to-live in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
    /// Maximum number of entries before LRU eviction
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Interval of the background expiry sweep in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_ttl_ms() -> u64 {
    300_000
}

fn default_max_entries() -> usize {
    1000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            max_entries: default_max_entries(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

impl CacheConfig {
    /// Default TTL as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

// ============================================================================
// Entries / Stats
// ============================================================================

/// A cached gate result.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: GateResult,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_accessed: Instant,
    access_seq: u64,
}

impl CacheEntry {
    /// Whether the entry has expired at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.created_at + self.ttl
    }
}

/// Cache counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Percentage of lookups that hit
    pub hit_rate: f64,
    pub size: usize,
    pub max_entries: usize,
    pub evictions: u64,
    pub expirations: u64,
    /// Moving average of lookup latency in microseconds
    pub avg_access_time_us: f64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    avg_access_time_us: Option<f64>,
    access_seq: u64,
    recent: VecDeque<(String, bool)>,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.access_seq += 1;
        self.access_seq
    }

    fn record_lookup(&mut self, key: &str, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        if self.recent.len() == RECENT_LOOKUP_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back((key.to_string(), hit));
    }

    fn record_access_time(&mut self, micros: f64) {
        self.avg_access_time_us = Some(match self.avg_access_time_us {
            Some(avg) => avg + ACCESS_TIME_ALPHA * (micros - avg),
            None => micros,
        });
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .entries
            .values()
            .min_by_key(|e| e.access_seq)
            .map(|e| e.key.clone())?;
        self.entries.remove(&victim);
        self.evictions += 1;
        Some(victim)
    }
}

// ============================================================================
// CacheManager
// ============================================================================

/// TTL + LRU gate result cache.
pub struct CacheManager {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("size", &self.len())
            .finish()
    }
}

impl CacheManager {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> CoreResult<MutexGuard<'_, CacheState>> {
        self.state
            .lock()
            .map_err(|_| CoreError::cache("cache lock poisoned"))
    }

    fn lock_recovering(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up a live entry. Expired entries are removed on the way.
    pub fn get(&self, key: &str) -> CoreResult<Option<GateResult>> {
        let started = std::time::Instant::now();
        let mut state = self.lock()?;
        let now = Instant::now();

        let expired = state.entries.get(key).map(|e| e.is_expired(now));
        let value = match expired {
            Some(false) => {
                let seq = state.next_seq();
                state.entries.get_mut(key).map(|entry| {
                    entry.access_count += 1;
                    entry.last_accessed = now;
                    entry.access_seq = seq;
                    entry.value.clone()
                })
            }
            Some(true) => {
                state.entries.remove(key);
                state.expirations += 1;
                None
            }
            None => None,
        };

        state.record_lookup(key, value.is_some());
        state.record_access_time(started.elapsed().as_secs_f64() * 1_000_000.0);
        Ok(value)
    }

    /// Insert or replace an entry. `ttl` overrides the configured default.
    pub fn set(&self, key: &str, value: GateResult, ttl: Option<Duration>) -> CoreResult<()> {
        let mut state = self.lock()?;
        let now = Instant::now();

        if !state.entries.contains_key(key) && state.entries.len() >= self.config.max_entries {
            if let Some(victim) = state.evict_lru() {
                debug!(key = %victim, "evicted least recently used cache entry");
            }
        }

        let seq = state.next_seq();
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                created_at: now,
                ttl: ttl.unwrap_or_else(|| self.config.ttl()),
                access_count: 0,
                last_accessed: now,
                access_seq: seq,
            },
        );
        Ok(())
    }

    /// Whether a live entry exists. Does not touch recency or counters.
    pub fn contains(&self, key: &str) -> bool {
        let state = self.lock_recovering();
        let now = Instant::now();
        state
            .entries
            .get(key)
            .map_or(false, |e| !e.is_expired(now))
    }

    /// Snapshot of an entry without touching recency or counters.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.lock_recovering().entries.get(key).cloned()
    }

    /// Estimated probability that a lookup of `key` hits.
    ///
    /// 0 for absent or expired keys. For live keys, the hit ratio of that
    /// key among recent lookups, or 1 when it has not been looked up yet.
    pub fn hit_probability(&self, key: &str) -> f64 {
        let state = self.lock_recovering();
        let now = Instant::now();
        match state.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let (lookups, hits) = state
                    .recent
                    .iter()
                    .filter(|(k, _)| k == key)
                    .fold((0u32, 0u32), |(n, h), (_, hit)| (n + 1, h + u32::from(*hit)));
                if lookups == 0 {
                    1.0
                } else {
                    f64::from(hits) / f64::from(lookups)
                }
            }
            _ => 0.0,
        }
    }

    /// Remove one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock_recovering().entries.remove(key).is_some()
    }

    /// Remove every entry whose key contains `pattern`.
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut state = self.lock_recovering();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.contains(pattern));
        before - state.entries.len()
    }

    /// Remove every entry written for gate `name`.
    ///
    /// Matches the `"<gate>:"` key prefix only, so gates whose names contain
    /// `name` keep their entries.
    pub fn invalidate_gate(&self, name: &str) -> usize {
        let prefix = format!("{name}:");
        let mut state = self.lock_recovering();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(&prefix));
        before - state.entries.len()
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) -> usize {
        let mut state = self.lock_recovering();
        let count = state.entries.len();
        state.entries.clear();
        count
    }

    /// Remove every expired entry.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.lock_recovering();
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before - state.entries.len();
        state.expirations += purged as u64;
        purged
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.lock_recovering().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.lock_recovering();
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups > 0 {
                state.hits as f64 / lookups as f64 * 100.0
            } else {
                0.0
            },
            size: state.entries.len(),
            max_entries: self.config.max_entries,
            evictions: state.evictions,
            expirations: state.expirations,
            avg_access_time_us: state.avg_access_time_us.unwrap_or(0.0),
        }
    }

    /// Spawn the periodic expiry sweep.
    ///
    /// The task ends when `cancel` fires or the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let purged = cache.purge_expired();
                        if purged > 0 {
                            debug!(purged, "cache sweep purged expired entries");
                        }
                    }
                }
            }
        })
    }
}

impl ResultCache for CacheManager {
    fn get(&self, key: &str) -> CoreResult<Option<GateResult>> {
        CacheManager::get(self, key)
    }

    fn set(&self, key: &str, value: GateResult, ttl: Option<Duration>) -> CoreResult<()> {
        CacheManager::set(self, key, value, ttl)
    }

    fn hit_probability(&self, key: &str) -> f64 {
        CacheManager::hit_probability(self, key)
    }
}

// ============================================================================
// Cache Keys
// ============================================================================

/// Cache key for a gate run against a target.
///
/// The gate name is kept in clear as a prefix so pattern invalidation by
/// gate name works; the digest covers target identity, gate name and the
/// canonicalized configuration.
pub fn cache_key(target: &Target, gate: &Gate) -> String {
    let config = canonical_json(&Value::Object(gate.configuration.clone()));
    let mut hasher = Sha256::new();
    hasher.update(target.identity().as_bytes());
    hasher.update([0u8]);
    hasher.update(gate.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(config.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}:{}", gate.name, hex)
}

/// JSON text with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for key in keys {
                    out.insert(key.clone(), sorted(&map[key]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    match serde_json::to_string(&sorted(value)) {
        Ok(text) => text,
        Err(err) => {
            warn!("failed to serialize gate configuration for cache key: {}", err);
            String::new()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use gatework_core::{GateType, TargetKind, ValidatorOutput};

    fn create_test_cache(max_entries: usize, ttl_ms: u64) -> CacheManager {
        CacheManager::new(CacheConfig {
            ttl_ms,
            max_entries,
            sweep_interval_ms: 1000,
        })
    }

    fn create_test_result(name: &str) -> GateResult {
        let gate = Gate::new(name, GateType::Lint);
        GateResult::from_output(&gate, ValidatorOutput::passed(90.0), 10, 1)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_round_trip() {
        let cache = create_test_cache(10, 100);
        cache.set("k", create_test_result("lint"), None).unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.map(|r| r.gate), Some("lint".to_string()));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(cache.get("k").unwrap().is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_exactly_at_ttl() {
        let cache = create_test_cache(10, 100);
        cache.set("k", create_test_result("lint"), None).unwrap();
        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(cache.contains("k"));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!cache.contains("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_override() {
        let cache = create_test_cache(10, 100);
        cache
            .set("long", create_test_result("lint"), Some(Duration::from_secs(10)))
            .unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(cache.get("long").unwrap().is_some());
    }

    #[test]
    fn test_lru_evicts_least_recently_accessed() {
        let cache = create_test_cache(3, 60_000);
        cache.set("a", create_test_result("a"), None).unwrap();
        cache.set("b", create_test_result("b"), None).unwrap();
        cache.set("c", create_test_result("c"), None).unwrap();

        // Touch "a" so "b" becomes the oldest.
        assert!(cache.get("a").unwrap().is_some());

        cache.set("d", create_test_result("d"), None).unwrap();
        assert_eq!(cache.len(), 3);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let cache = create_test_cache(2, 60_000);
        cache.set("a", create_test_result("a"), None).unwrap();
        cache.set("b", create_test_result("b"), None).unwrap();
        cache.set("a", create_test_result("a2"), None).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.get("a").unwrap().unwrap().gate, "a2");
    }

    #[test]
    fn test_returned_value_is_a_copy() {
        let cache = create_test_cache(2, 60_000);
        cache.set("a", create_test_result("lint"), None).unwrap();
        let mut copy = cache.get("a").unwrap().unwrap();
        copy.score = 0.0;
        assert_eq!(cache.get("a").unwrap().unwrap().score, 90.0);
    }

    #[test]
    fn test_access_count_tracking() {
        let cache = create_test_cache(2, 60_000);
        cache.set("a", create_test_result("lint"), None).unwrap();
        cache.get("a").unwrap();
        cache.get("a").unwrap();
        assert_eq!(cache.peek("a").unwrap().access_count, 2);
    }

    #[test]
    fn test_invalidate_pattern() {
        let cache = create_test_cache(10, 60_000);
        cache.set("lint:abc", create_test_result("lint"), None).unwrap();
        cache.set("lint:def", create_test_result("lint"), None).unwrap();
        cache.set("security:abc", create_test_result("security"), None).unwrap();

        assert_eq!(cache.invalidate_pattern("lint:"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.invalidate("security:abc"));
        assert!(!cache.invalidate("security:abc"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_gate_leaves_overlapping_names() {
        let cache = create_test_cache(10, 60_000);
        let target = Target::new(TargetKind::File, "src/lib.rs");
        let lint = Gate::new("lint", GateType::Lint);
        let strict = Gate::new("strict-lint", GateType::Lint);
        let a = Gate::new("a", GateType::Syntax);
        let ba = Gate::new("ba", GateType::Syntax);
        for gate in [&lint, &strict, &a, &ba] {
            cache
                .set(&cache_key(&target, gate), create_test_result(&gate.name), None)
                .unwrap();
        }

        assert_eq!(cache.invalidate_gate("lint"), 1);
        assert!(!cache.contains(&cache_key(&target, &lint)));
        assert!(cache.contains(&cache_key(&target, &strict)));

        assert_eq!(cache.invalidate_gate("a"), 1);
        assert!(cache.contains(&cache_key(&target, &ba)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_hit_probability() {
        let cache = create_test_cache(10, 60_000);
        assert_eq!(cache.hit_probability("a"), 0.0);

        cache.set("a", create_test_result("lint"), None).unwrap();
        assert_eq!(cache.hit_probability("a"), 1.0);

        cache.get("a").unwrap();
        assert_eq!(cache.hit_probability("a"), 1.0);

        cache.invalidate("a");
        cache.get("a").unwrap();
        cache.set("a", create_test_result("lint"), None).unwrap();
        assert_eq!(cache.hit_probability("a"), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = create_test_cache(10, 100);
        cache.set("short", create_test_result("lint"), None).unwrap();
        cache
            .set("long", create_test_result("lint"), Some(Duration::from_secs(60)))
            .unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_purges_in_background() {
        let cache = Arc::new(create_test_cache(10, 100));
        cache.set("k", create_test_result("lint"), None).unwrap();

        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_millis(50), cancel.clone());

        tokio::time::sleep(Duration::from_millis(160)).await;
        assert_eq!(cache.len(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = create_test_cache(10, 60_000);
        cache.set("a", create_test_result("lint"), None).unwrap();
        cache.get("a").unwrap();
        cache.get("a").unwrap();
        cache.get("b").unwrap();
        cache.get("c").unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hit_rate, 50.0);
        assert_eq!(stats.max_entries, 10);
        assert!(stats.avg_access_time_us >= 0.0);
    }

    #[test]
    fn test_cache_key_components() {
        let target = Target::new(TargetKind::Project, "/repo").with_files(["a.rs"]);
        let gate = Gate::new("lint", GateType::Lint)
            .with_config("b", Value::from(1))
            .with_config("a", Value::from(2));

        let key = cache_key(&target, &gate);
        assert!(key.starts_with("lint:"));
        assert_eq!(key.len(), "lint:".len() + 64);
        assert_eq!(key, cache_key(&target, &gate.clone()));

        let reconfigured = gate.clone().with_config("a", Value::from(3));
        assert_ne!(key, cache_key(&target, &reconfigured));

        let other_target = Target::new(TargetKind::Project, "/other").with_files(["a.rs"]);
        assert_ne!(key, cache_key(&other_target, &gate));
    }

    #[test]
    fn test_cache_key_separates_lookalike_targets() {
        let gate = Gate::new("lint", GateType::Lint);
        let joined = Target::new(TargetKind::File, "x").with_files(["a,b"]);
        let split = Target::new(TargetKind::File, "x").with_files(["a", "b"]);
        assert_ne!(cache_key(&joined, &gate), cache_key(&split, &gate));

        let in_uri = Target::new(TargetKind::File, "p|q");
        let in_files = Target::new(TargetKind::File, "p").with_files(["q"]);
        assert_ne!(cache_key(&in_uri, &gate), cache_key(&in_files, &gate));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = serde_json::json!({"z": {"b": 1, "a": [ {"y": 1, "x": 2} ]}, "a": true});
        assert_eq!(
            canonical_json(&a),
            r#"{"a":true,"z":{"a":[{"x":2,"y":1}],"b":1}}"#
        );
    }
}
