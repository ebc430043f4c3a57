//! TTL key-value cache with a durable backing store.
//!
//! Entries live in memory and are written through to the [`DurableStore`]
//! one namespace per key. The cache is an optimization: durable-store
//! failures are logged and reported, never returned.
//!
//! - Reads never extend an entry's lifetime (no sliding expiration).
//! - Expired entries are dropped lazily on read and eagerly when the backing
//!   store reports it is full; a full store also evicts the oldest share of
//!   entries by `stored_at`.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::StorageError;
use crate::ports::{DurableStore, ExceptionReporter};
use crate::storage::{namespaces, Hydration};

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Share of entries evicted when the backing store is full.
    #[serde(default = "default_eviction_ratio")]
    pub eviction_ratio: f64,
}

fn default_ttl_secs() -> u64 {
    3600
}
fn default_eviction_ratio() -> f64 {
    0.2
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            eviction_ratio: default_eviction_ratio(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// A cached value and its lifetime, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = chrono::Duration::milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX));
        self.stored_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Visible only while `now < stored_at + ttl`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub item_count: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub approx_bytes: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    // Insertion order; breaks ties between equal `stored_at` values.
    seq: u64,
}

/// Shared handle used by every fetch call site.
pub type SharedCache = Arc<Mutex<CacheService>>;

/// Lock a shared cache, recovering from a poisoned lock.
pub fn lock(cache: &SharedCache) -> MutexGuard<'_, CacheService> {
    cache.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct CacheService {
    entries: HashMap<String, Slot>,
    next_seq: u64,
    config: CacheConfig,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn ExceptionReporter>,
}

impl CacheService {
    /// Create an empty cache. Call [`CacheService::hydrate`] to pick up
    /// entries persisted by an earlier session.
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn ExceptionReporter>,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            next_seq: 0,
            config,
            store,
            clock,
            reporter,
        }
    }

    pub fn into_shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    /// Load every persisted entry, deleting expired or unreadable ones from
    /// the backing store.
    pub fn hydrate(&mut self) -> Result<Hydration, StorageError> {
        let now = self.clock.now();
        let mut restored: Vec<(String, CacheEntry)> = Vec::new();
        let mut discarded = 0usize;

        for namespace in self.store.list_namespaces(namespaces::CACHE_PREFIX)? {
            let key = namespace[namespaces::CACHE_PREFIX.len()..].to_string();
            let Some(bytes) = self.store.load_namespace(&namespace)? else {
                continue;
            };
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) if entry.is_live(now) => restored.push((key, entry)),
                Ok(_) => {
                    debug!(key, "dropping expired cache entry at startup");
                    self.forget_durable(&key);
                }
                Err(e) => {
                    warn!(key, error = %e, "dropping unreadable cache entry");
                    discarded += 1;
                    self.forget_durable(&key);
                }
            }
        }

        restored.sort_by(|a, b| a.1.stored_at.cmp(&b.1.stored_at).then_with(|| a.0.cmp(&b.0)));
        let items = restored.len();
        for (key, entry) in restored {
            let seq = self.bump_seq();
            self.entries.insert(key, Slot { entry, seq });
        }

        Ok(match (items, discarded) {
            (0, 0) => Hydration::Empty,
            (0, n) => Hydration::Discarded {
                reason: format!("{n} unreadable cache entries"),
            },
            (items, _) => Hydration::Restored { items },
        })
    }

    /// Cache a serializable value. `ttl` of `None` uses the configured default.
    pub fn set<T: Serialize>(
        &mut self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set_value(key, value, ttl);
        Ok(())
    }

    /// Cache a raw JSON value. Always succeeds in memory.
    pub fn set_value(&mut self, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let entry = CacheEntry {
            value,
            stored_at: self.clock.now(),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        };
        let seq = self.bump_seq();
        self.entries.insert(
            key.to_string(),
            Slot {
                entry: entry.clone(),
                seq,
            },
        );
        self.write_through(key, &entry);
    }

    /// Typed read. A value that does not decode as `T` is a miss.
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        let value = self.get_value(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    pub fn get_value(&mut self, key: &str) -> Option<serde_json::Value> {
        let now = self.clock.now();
        let live = self.entries.get(key).map(|slot| slot.entry.is_live(now))?;
        if !live {
            debug!(key, "cache entry expired");
            self.remove(key);
            return None;
        }
        self.entries.get(key).map(|slot| slot.entry.value.clone())
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.forget_durable(key);
    }

    /// Remove every entry whose key starts with `prefix`. Returns how many
    /// in-memory entries were dropped.
    pub fn remove_prefix(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    /// Drop every entry, including persisted ones this session never loaded.
    pub fn clear(&mut self) {
        self.entries.clear();
        match self.store.list_namespaces(namespaces::CACHE_PREFIX) {
            Ok(names) => {
                for name in names {
                    if let Err(e) = self.store.remove_namespace(&name) {
                        warn!(namespace = %name, error = %e, "failed to clear cache entry");
                    }
                }
            }
            Err(e) => self.report(&e, "*"),
        }
    }

    /// Remove expired entries now. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| !slot.entry.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let oldest = self.entries.values().map(|s| s.entry.stored_at).min();
        let newest = self.entries.values().map(|s| s.entry.stored_at).max();
        let snapshot: BTreeMap<&String, &CacheEntry> =
            self.entries.iter().map(|(k, s)| (k, &s.entry)).collect();
        let approx_bytes = serde_json::to_vec(&snapshot).map(|b| b.len()).unwrap_or(0);

        CacheStats {
            item_count: self.entries.len(),
            oldest,
            newest,
            approx_bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write_through(&mut self, key: &str, entry: &CacheEntry) {
        let namespace = format!("{}{key}", namespaces::CACHE_PREFIX);
        let bytes = match serde_json::to_vec(entry) {
            Ok(b) => b,
            Err(e) => {
                warn!(key, error = %e, "cache entry not serializable; kept in memory only");
                return;
            }
        };

        match self.store.save_namespace(&namespace, &bytes) {
            Ok(()) => {}
            Err(e) if e.is_quota() => {
                let evicted = self.relieve_pressure(key);
                warn!(key, evicted, "cache storage full; evicted oldest entries");
                if let Err(e) = self.store.save_namespace(&namespace, &bytes) {
                    debug!(key, error = %e, "cache entry kept in memory only");
                }
            }
            Err(e) => self.report(&e, key),
        }
    }

    /// Purge expired entries, then evict the oldest share of the rest,
    /// sparing `keep`.
    fn relieve_pressure(&mut self, keep: &str) -> usize {
        let purged = self.purge_expired();

        let mut candidates: Vec<(&String, &Slot)> =
            self.entries.iter().filter(|(k, _)| k.as_str() != keep).collect();
        candidates.sort_by(|a, b| {
            a.1.entry
                .stored_at
                .cmp(&b.1.entry.stored_at)
                .then(a.1.seq.cmp(&b.1.seq))
        });
        let ratio = self.config.eviction_ratio.clamp(0.0, 1.0);
        let count = (candidates.len() as f64 * ratio).ceil() as usize;
        let victims: Vec<String> = candidates
            .into_iter()
            .take(count)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &victims {
            self.remove(key);
        }
        purged + victims.len()
    }

    fn forget_durable(&self, key: &str) {
        let namespace = format!("{}{key}", namespaces::CACHE_PREFIX);
        if let Err(e) = self.store.remove_namespace(&namespace) {
            self.report(&e, key);
        }
    }

    fn report(&self, error: &StorageError, key: &str) {
        warn!(key, error = %error, "cache storage error");
        let mut context = BTreeMap::new();
        context.insert("cache_key".to_string(), key.to_string());
        self.reporter.report(error, &context);
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}
