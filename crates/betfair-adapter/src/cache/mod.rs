//! Freshness cache with per-key single-flight
//!
//! # Design Principles
//! 1. An entry is fresh while `now - fetched_at < ttl`; TTL is per data class
//! 2. Strict reads refetch on miss or stale and propagate failure; stale
//!    pricing is never served as fresh
//! 3. Best-effort reads fall back to the last entry (flagged stale), then to
//!    an empty default
//! 4. At most one refetch per key is in flight; concurrent callers await it
//! 5. Refetches run on their own task: a caller timing out abandons only its
//!    own wait
//! 6. The lock guards the maps only and is never held across I/O
//!
//! An optional [`PayloadStore`] is read through on a memory miss and written
//! after every successful refetch. A failed write is logged as
//! `CacheWriteFailure` and the request still succeeds.

pub mod clock;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{JsonDirStore, MemoryStore, PayloadStore, StoredPayload};

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PipelineError;

// ============================================================================
// Keys and entries
// ============================================================================

/// What kind of payload a key holds. Each class has its own TTL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    /// Live prices (strict, seconds)
    Book,
    /// Market catalogue (strict, minutes)
    Catalog,
    /// Sports / competitions / events listings (strict, minutes)
    Navigation,
    /// Dashboard aggregates (best-effort, minutes)
    Stats,
}

impl DataClass {
    /// Stable name used in keys and store paths
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::Book => "book",
            DataClass::Catalog => "catalog",
            DataClass::Navigation => "navigation",
            DataClass::Stats => "stats",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub class: DataClass,
    pub id: String,
}

impl CacheKey {
    /// Key for `id` within `class`
    pub fn new(class: DataClass, id: impl Into<String>) -> Self {
        Self { class, id: id.into() }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class.as_str(), self.id)
    }
}

/// TTL per data class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassTtls {
    pub book: Duration,
    pub catalog: Duration,
    pub navigation: Duration,
    pub stats: Duration,
}

impl ClassTtls {
    /// TTL of `class`
    pub fn ttl_for(&self, class: DataClass) -> Duration {
        match class {
            DataClass::Book => self.book,
            DataClass::Catalog => self.catalog,
            DataClass::Navigation => self.navigation,
            DataClass::Stats => self.stats,
        }
    }
}

impl Default for ClassTtls {
    fn default() -> Self {
        Self {
            book: Duration::from_secs(5),
            catalog: Duration::from_secs(300),
            navigation: Duration::from_secs(300),
            stats: Duration::from_secs(900),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub payload: V,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// `now - fetched_at < ttl`. An entry stamped in the future counts as fresh.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match now.signed_duration_since(self.fetched_at).to_std() {
            Ok(age) => age < ttl,
            Err(_) => true,
        }
    }
}

/// Where a served payload came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Fresh entry, no upstream call
    Cache,
    /// Refetched for this request (or a concurrent one)
    Upstream,
    /// Refetch failed; last known entry served past its TTL
    StaleFallback,
    /// Refetch failed and nothing was ever cached
    EmptyFallback,
}

/// A payload handed back to the caller
#[derive(Clone, Debug, PartialEq)]
pub struct Served<V> {
    pub payload: V,
    pub fetched_at: Option<DateTime<Utc>>,
    pub origin: Origin,
}

impl<V> Served<V> {
    fn from_entry(entry: CacheEntry<V>, origin: Origin) -> Self {
        Self { payload: entry.payload, fetched_at: Some(entry.fetched_at), origin }
    }

    /// Served from memory or store rather than a new upstream call
    pub fn is_cached(&self) -> bool {
        matches!(self.origin, Origin::Cache | Origin::StaleFallback)
    }

    /// Served past its TTL after a failed refetch
    pub fn is_stale(&self) -> bool {
        self.origin == Origin::StaleFallback
    }
}

/// Result of one batched refetch
#[derive(Debug)]
pub struct FetchBatch<V> {
    pub found: HashMap<CacheKey, V>,
    /// Keys whose upstream chunk failed. Keys neither found nor failed are `NotFound`.
    pub failed: HashSet<CacheKey>,
}

impl<V> FetchBatch<V> {
    /// Batch holding one found payload
    pub fn single(key: CacheKey, payload: V) -> Self {
        Self { found: HashMap::from([(key, payload)]), failed: HashSet::new() }
    }
}

impl<V> Default for FetchBatch<V> {
    fn default() -> Self {
        Self { found: HashMap::new(), failed: HashSet::new() }
    }
}

// ============================================================================
// Cache
// ============================================================================

type Outcome<V> = Option<Result<CacheEntry<V>, PipelineError>>;

struct State<V> {
    entries: HashMap<CacheKey, CacheEntry<V>>,
    in_flight: HashMap<CacheKey, watch::Receiver<Outcome<V>>>,
}

struct Inner<V> {
    state: Mutex<State<V>>,
    ttls: ClassTtls,
    clock: Arc<dyn Clock>,
}

/// Shared, cloneable freshness cache. Clones share entries and in-flight refreshes.
pub struct FreshnessCache<V> {
    inner: Arc<Inner<V>>,
    store: Option<Arc<dyn PayloadStore>>,
    wait_timeout: Option<Duration>,
}

impl<V> Clone for FreshnessCache<V> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), store: self.store.clone(), wait_timeout: self.wait_timeout }
    }
}

impl<V> fmt::Debug for FreshnessCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreshnessCache")
            .field("ttls", &self.inner.ttls)
            .field("clock", &self.inner.clock)
            .field("has_store", &self.store.is_some())
            .field("wait_timeout", &self.wait_timeout)
            .finish()
    }
}

enum Claim<V> {
    Ready(Served<V>),
    Follow(watch::Receiver<Outcome<V>>),
    Lead(watch::Sender<Outcome<V>>, watch::Receiver<Outcome<V>>),
}

impl<V> FreshnessCache<V>
where
    V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Cache on the system clock
    pub fn new(ttls: ClassTtls) -> Self {
        Self::with_clock(ttls, Arc::new(SystemClock))
    }

    /// Cache reading time from `clock`
    pub fn with_clock(ttls: ClassTtls, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State { entries: HashMap::new(), in_flight: HashMap::new() }),
                ttls,
                clock,
            }),
            store: None,
            wait_timeout: None,
        }
    }

    /// Attach a persistence collaborator
    pub fn with_store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Bound how long a caller waits on an in-flight refetch
    pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// TTL applied to keys of `class`
    pub fn ttl_for(&self, class: DataClass) -> Duration {
        self.inner.ttls.ttl_for(class)
    }

    /// Current time on the cache clock
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Memory lookup; `None` on miss
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        self.inner.state.lock().entries.get(key).cloned()
    }

    /// Store a payload stamped now, replacing any previous entry
    pub fn put(&self, key: CacheKey, payload: V) -> CacheEntry<V> {
        self.inner.put(key, payload)
    }

    /// `now - entry.fetched_at < ttl`
    pub fn is_fresh(&self, entry: &CacheEntry<V>, ttl: Duration) -> bool {
        entry.is_fresh_at(self.now(), ttl)
    }

    /// Entries held in memory
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// No entries held in memory
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory lookup, reading through the store on a miss
    pub async fn load(&self, key: &CacheKey) -> Option<CacheEntry<V>> {
        if let Some(entry) = self.get(key) {
            return Some(entry);
        }

        let store = self.store.as_ref()?;
        let stored = match store.load(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache store read failed for {}: {:#}", key, e);
                return None;
            }
        };

        let payload: V = match serde_json::from_value(stored.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Discarding unreadable stored payload for {}: {}", key, e);
                return None;
            }
        };

        let entry = CacheEntry {
            key: key.clone(),
            payload,
            fetched_at: stored.fetched_at,
            ttl: self.ttl_for(key.class),
        };

        // Keep a newer entry if a refetch landed meanwhile
        let mut state = self.inner.state.lock();
        let slot = state.entries.entry(key.clone()).or_insert(entry);
        Some(slot.clone())
    }

    /// Strict read of one key
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, bypass: bool, fetch: F) -> Result<Served<V>, PipelineError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, PipelineError>> + Send + 'static,
    {
        let batch_key = key.clone();
        let mut results = self
            .get_many(std::slice::from_ref(&key), bypass, move |_| async move {
                fetch().await.map(|payload| FetchBatch::single(batch_key, payload))
            })
            .await;

        results
            .remove(&key)
            .unwrap_or_else(|| Err(PipelineError::upstream(format!("no result for {key}"))))
    }

    /// Best-effort read of one key: never fails
    pub async fn get_or_fetch_best_effort<F, Fut>(&self, key: CacheKey, bypass: bool, fetch: F) -> Served<V>
    where
        V: Default,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, PipelineError>> + Send + 'static,
    {
        match self.get_or_fetch(key.clone(), bypass, fetch).await {
            Ok(served) => served,
            Err(e) => match self.load(&key).await {
                Some(entry) => {
                    warn!("Refresh of {} failed, serving stale payload: {}", key, e);
                    Served::from_entry(entry, Origin::StaleFallback)
                }
                None => {
                    warn!("Refresh of {} failed and nothing cached, serving empty payload: {}", key, e);
                    Served { payload: V::default(), fetched_at: None, origin: Origin::EmptyFallback }
                }
            },
        }
    }

    /// Strict read of many keys with one batched refetch for the keys this call leads.
    ///
    /// Keys already being refetched by another caller are awaited, not refetched.
    pub async fn get_many<F, Fut>(
        &self,
        keys: &[CacheKey],
        bypass: bool,
        fetch: F,
    ) -> HashMap<CacheKey, Result<Served<V>, PipelineError>>
    where
        F: FnOnce(Vec<CacheKey>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<FetchBatch<V>, PipelineError>> + Send + 'static,
    {
        let mut results = HashMap::with_capacity(keys.len());
        let mut pending = Vec::new();

        // Store read-through happens before claiming so no lock spans I/O
        let mut unique = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(key) {
                unique.push(key.clone());
            }
        }
        if !bypass {
            for key in &unique {
                // Warms memory from the store; the freshness decision is made under the lock
                if self.load(key).await.is_none() {
                    debug!("No cached entry for {}", key);
                }
            }
        }

        let mut leader_keys = Vec::new();
        let mut senders = Vec::new();
        {
            let now = self.now();
            let mut state = self.inner.state.lock();
            for key in unique {
                match self.claim(&mut state, &key, now, bypass) {
                    Claim::Ready(served) => {
                        debug!("Cache hit {}", key);
                        results.insert(key, Ok(served));
                    }
                    Claim::Follow(rx) => {
                        debug!("Joining in-flight refresh of {}", key);
                        pending.push((key, rx));
                    }
                    Claim::Lead(tx, rx) => {
                        leader_keys.push(key.clone());
                        senders.push((key.clone(), tx));
                        pending.push((key, rx));
                    }
                }
            }
        }

        if !leader_keys.is_empty() {
            debug!("Refreshing {} keys", leader_keys.len());
            self.spawn_refresh(leader_keys, senders, fetch);
        }

        let waits = pending.into_iter().map(|(key, rx)| async move {
            let result = self.wait(&key, rx).await.map(|entry| Served::from_entry(entry, Origin::Upstream));
            (key, result)
        });
        results.extend(join_all(waits).await);
        results
    }

    fn claim(&self, state: &mut State<V>, key: &CacheKey, now: DateTime<Utc>, bypass: bool) -> Claim<V> {
        if !bypass {
            if let Some(entry) = state.entries.get(key) {
                if entry.is_fresh_at(now, self.ttl_for(key.class)) {
                    return Claim::Ready(Served::from_entry(entry.clone(), Origin::Cache));
                }
            }
        }

        if let Some(rx) = state.in_flight.get(key) {
            return Claim::Follow(rx.clone());
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(key.clone(), rx.clone());
        Claim::Lead(tx, rx)
    }

    fn spawn_refresh<F, Fut>(&self, keys: Vec<CacheKey>, senders: Vec<(CacheKey, watch::Sender<Outcome<V>>)>, fetch: F)
    where
        F: FnOnce(Vec<CacheKey>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<FetchBatch<V>, PipelineError>> + Send + 'static,
    {
        let inner = self.inner.clone();
        let store = self.store.clone();
        tokio::spawn(async move {
            // Clears in-flight markers even if the fetch panics
            let guard = InFlightGuard { inner: inner.clone(), keys: keys.clone() };

            let outcomes: Vec<(CacheKey, Result<CacheEntry<V>, PipelineError>)> = match fetch(keys).await {
                Ok(mut batch) => senders
                    .iter()
                    .map(|(key, _)| {
                        let outcome = match batch.found.remove(key) {
                            Some(payload) => Ok(inner.put(key.clone(), payload)),
                            None if batch.failed.contains(key) => {
                                Err(PipelineError::upstream(format!("upstream batch failed for {}", key.id)))
                            }
                            None => Err(PipelineError::NotFound(key.id.clone())),
                        };
                        (key.clone(), outcome)
                    })
                    .collect(),
                Err(e) => senders.iter().map(|(key, _)| (key.clone(), Err(e.clone()))).collect(),
            };

            // Entries are in place before the in-flight markers go
            drop(guard);
            for ((_, tx), (_, outcome)) in senders.iter().zip(&outcomes) {
                let _ = tx.send(Some(outcome.clone()));
            }

            let refreshed: Vec<&CacheEntry<V>> = outcomes.iter().filter_map(|(_, outcome)| outcome.as_ref().ok()).collect();
            info!("Refreshed {} of {} keys", refreshed.len(), outcomes.len());

            if let Some(store) = store {
                persist(store.as_ref(), &refreshed).await;
            }
        });
    }

    async fn wait(&self, key: &CacheKey, mut rx: watch::Receiver<Outcome<V>>) -> Result<CacheEntry<V>, PipelineError> {
        let waiting = async {
            match rx.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            }
        };

        let outcome = match self.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, waiting).await.map_err(|_| {
                PipelineError::upstream(format!("timed out after {:?} waiting for {}", limit, key))
            })?,
            None => waiting.await,
        };

        outcome.unwrap_or_else(|| Err(PipelineError::upstream(format!("refresh of {key} ended without a result"))))
    }
}

impl<V: Clone> Inner<V> {
    fn put(&self, key: CacheKey, payload: V) -> CacheEntry<V> {
        let entry = CacheEntry {
            ttl: self.ttls.ttl_for(key.class),
            key: key.clone(),
            payload,
            fetched_at: self.clock.now(),
        };
        self.state.lock().entries.insert(key, entry.clone());
        entry
    }
}

/// Write refreshed entries to the store. Failures are logged, never returned.
async fn persist<V: Serialize>(store: &dyn PayloadStore, entries: &[&CacheEntry<V>]) {
    for entry in entries {
        let result = match serde_json::to_value(&entry.payload) {
            Ok(payload) => {
                let stored = StoredPayload { key: entry.key.to_string(), fetched_at: entry.fetched_at, payload };
                store.save(&entry.key, &stored).await
            }
            Err(e) => Err(e.into()),
        };

        if let Err(e) = result {
            let err = PipelineError::CacheWriteFailure { key: entry.key.to_string(), message: format!("{e:#}") };
            warn!("{}", err);
        }
    }
}

struct InFlightGuard<V> {
    inner: Arc<Inner<V>>,
    keys: Vec<CacheKey>,
}

impl<V> Drop for InFlightGuard<V> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        for key in &self.keys {
            state.in_flight.remove(key);
        }
    }
}
