//! The process-wide computation cache.
//!
//! [`CacheService`] maps fingerprints to completed values and deduplicates
//! concurrent requests for the same fingerprint:
//!
//! 1. A lookup in the bounded value store. A hit returns immediately.
//! 2. On a miss, the fingerprint is registered in the in-flight registry,
//!    a `DashMap` of single-assignment [`Promise`]s. Exactly one caller
//!    creates the entry and becomes the winner; everyone else waits on it.
//! 3. The winner computes, stores a successful value, removes the registry
//!    entry and fulfils the promise, in that order. A waiter woken with an
//!    error therefore never finds the stale entry again when it retries.
//!
//! Errors and cancellations are delivered to every waiter but never stored,
//! so a later request retries. In-flight entries live in the registry, not
//! in the value store, so eviction can never remove them.
//!
//! The value store is split into shards, each an LRU list behind its own
//! mutex with byte accounting. The byte budget is divided evenly between
//! shards and enforced by evicting least-recently-used entries on insert.
//!
//! A second, smaller LRU memoizes fingerprints themselves, keyed by
//! [`HashKey`]. Because plug generations change on every dirtying, stale
//! fingerprints are never looked up again and simply age out.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use plexus_core::error::EvalError;
use plexus_core::hash::Fingerprint;
use plexus_core::id::{GraphId, PlugId};
use plexus_core::value::Value;

use crate::cancel::CancellationToken;
use crate::config::CacheConfig;
use crate::promise::Promise;

/// Result of resolving one fingerprint.
pub type Outcome = Result<Arc<Value>, EvalError>;

/// Fixed per-entry bookkeeping charged against the byte budget.
const ENTRY_OVERHEAD: usize = 64;

/// Key of the fingerprint cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub graph: GraphId,
    pub plug: PlugId,
    /// Plug generation at the time of hashing.
    pub generation: u64,
    pub context: Fingerprint,
}

/// A completed value in the store. Either absent or complete; never
/// partially populated.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Arc<Value>,
    /// Charge against the byte budget.
    pub bytes: usize,
}

struct ValueShard {
    entries: LruCache<Fingerprint, CacheEntry>,
    bytes: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    waits: AtomicU64,
    evictions: AtomicU64,
    cancellations: AtomicU64,
    failures: AtomicU64,
    hash_hits: AtomicU64,
    hash_misses: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of cache activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    /// Lookups that missed the store (winners and waiters).
    pub misses: u64,
    /// Computations actually run.
    pub computes: u64,
    /// Requests that blocked on another caller's computation.
    pub waits: u64,
    pub evictions: u64,
    pub cancellations: u64,
    pub failures: u64,
    pub hash_hits: u64,
    pub hash_misses: u64,
    pub entries: usize,
    pub bytes: usize,
    pub in_flight: usize,
}

/// Bounded, thread-safe store of computed values with per-fingerprint
/// deduplication.
pub struct CacheService {
    config: CacheConfig,
    byte_budget: AtomicUsize,
    shards: Vec<Mutex<ValueShard>>,
    hash_shards: Vec<Mutex<LruCache<HashKey, Fingerprint>>>,
    in_flight: DashMap<Fingerprint, Arc<Promise<Outcome>>>,
    counters: Counters,
    shut_down: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CacheService {
    /// Creates the service. Construct once per process and share the handle.
    pub fn init(config: CacheConfig) -> Arc<CacheService> {
        let shard_count = config.shard_count();
        let hash_capacity = NonZeroUsize::new((config.hash_entry_budget / shard_count).max(1))
            .unwrap_or(NonZeroUsize::MIN);

        let shards = (0..shard_count)
            .map(|_| {
                Mutex::new(ValueShard {
                    entries: LruCache::unbounded(),
                    bytes: 0,
                })
            })
            .collect();
        let hash_shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(hash_capacity)))
            .collect();

        tracing::info!(
            byte_budget = config.byte_budget,
            hash_entries = config.hash_entry_budget,
            shards = shard_count,
            "cache service initialized"
        );

        Arc::new(CacheService {
            byte_budget: AtomicUsize::new(config.byte_budget),
            config,
            shards,
            hash_shards,
            in_flight: DashMap::new(),
            counters: Counters::default(),
            shut_down: AtomicBool::new(false),
        })
    }

    /// The configuration the service was created with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Drops every completed entry and refuses further lookups with
    /// [`EvalError::CacheShutdown`]. Computations already in flight finish,
    /// but their results are not stored.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.clear();
        tracing::info!(in_flight = self.in_flight.len(), "cache service shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub(crate) fn check_open(&self) -> Result<(), EvalError> {
        if self.is_shut_down() {
            Err(EvalError::CacheShutdown)
        } else {
            Ok(())
        }
    }

    fn shard_for(&self, fingerprint: &Fingerprint) -> &Mutex<ValueShard> {
        let index = (fingerprint.low_u64() % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    fn shard_budget(&self) -> usize {
        (self.byte_budget.load(Ordering::Relaxed) / self.shards.len()).max(1)
    }

    // -----------------------------------------------------------------------
    // Value store
    // -----------------------------------------------------------------------

    /// Looks up a completed value, marking it most recently used.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<Value>> {
        let mut shard = lock(self.shard_for(fingerprint));
        shard.entries.get(fingerprint).map(|e| e.value.clone())
    }

    /// Whether a completed value is stored, without touching recency.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        lock(self.shard_for(fingerprint)).entries.contains(fingerprint)
    }

    /// Whether a computation for `fingerprint` is currently running.
    pub fn is_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.in_flight.contains_key(fingerprint)
    }

    fn insert(&self, fingerprint: Fingerprint, value: Arc<Value>) {
        if self.is_shut_down() {
            return;
        }
        let bytes = value.approx_bytes() + ENTRY_OVERHEAD;
        let budget = self.shard_budget();
        if bytes > budget {
            tracing::debug!(
                %fingerprint,
                bytes,
                budget,
                "value larger than shard budget; not cached"
            );
            return;
        }

        let mut shard = lock(self.shard_for(&fingerprint));
        if let Some(old) = shard.entries.put(fingerprint, CacheEntry { value, bytes }) {
            shard.bytes -= old.bytes;
        }
        shard.bytes += bytes;
        self.evict_to(&mut shard, budget);
    }

    fn evict_to(&self, shard: &mut ValueShard, budget: usize) {
        while shard.bytes > budget {
            match shard.entries.pop_lru() {
                Some((fingerprint, entry)) => {
                    shard.bytes -= entry.bytes;
                    bump(&self.counters.evictions);
                    tracing::trace!(%fingerprint, bytes = entry.bytes, "evicted");
                }
                None => break,
            }
        }
    }

    /// Changes the byte budget, evicting immediately if it shrank.
    pub fn set_byte_budget(&self, bytes: usize) {
        self.byte_budget.store(bytes, Ordering::Relaxed);
        let budget = self.shard_budget();
        for shard in &self.shards {
            self.evict_to(&mut lock(shard), budget);
        }
        tracing::debug!(bytes, "byte budget changed");
    }

    pub fn byte_budget(&self) -> usize {
        self.byte_budget.load(Ordering::Relaxed)
    }

    /// Drops all completed values and memoized fingerprints.
    pub fn clear(&self) {
        for shard in &self.shards {
            let mut shard = lock(shard);
            shard.entries.clear();
            shard.bytes = 0;
        }
        for shard in &self.hash_shards {
            lock(shard).clear();
        }
    }

    /// Resolves `fingerprint`, running `compute` only if no value is stored
    /// and no other caller is already computing it.
    ///
    /// Waiters poll `token` while blocked and return
    /// [`EvalError::Cancelled`] once it fires, without affecting the winner.
    pub fn get_or_compute<F>(
        &self,
        fingerprint: Fingerprint,
        token: &CancellationToken,
        compute: F,
    ) -> Outcome
    where
        F: FnOnce() -> Outcome,
    {
        self.check_open()?;

        if let Some(value) = self.get(&fingerprint) {
            bump(&self.counters.hits);
            tracing::trace!(%fingerprint, "cache hit");
            return Ok(value);
        }
        bump(&self.counters.misses);

        let (promise, winner) = match self.in_flight.entry(fingerprint) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let promise = Arc::new(Promise::new());
                entry.insert(promise.clone());
                (promise, true)
            }
        };

        if !winner {
            bump(&self.counters.waits);
            tracing::trace!(%fingerprint, "waiting on in-flight computation");
            return promise
                .wait_or_cancel(token)
                .unwrap_or(Err(EvalError::Cancelled));
        }

        let in_flight = InFlight {
            cache: self,
            fingerprint,
            promise,
            completed: false,
        };

        // A previous winner may have stored the value and left the registry
        // between our lookup and our registration.
        if let Some(value) = self.get(&fingerprint) {
            bump(&self.counters.hits);
            in_flight.complete(Ok(value.clone()));
            return Ok(value);
        }

        bump(&self.counters.computes);
        let outcome = compute();
        match &outcome {
            Ok(value) => self.insert(fingerprint, value.clone()),
            Err(EvalError::Cancelled) => {
                bump(&self.counters.cancellations);
                tracing::debug!(%fingerprint, "computation cancelled; nothing stored");
            }
            Err(err) => {
                bump(&self.counters.failures);
                tracing::debug!(%fingerprint, error = %err, "computation failed; nothing stored");
            }
        }
        in_flight.complete(outcome.clone());
        outcome
    }

    // -----------------------------------------------------------------------
    // Fingerprint memo
    // -----------------------------------------------------------------------

    fn hash_shard_for(&self, key: &HashKey) -> &Mutex<LruCache<HashKey, Fingerprint>> {
        let mix = key.context.low_u64() ^ u64::from(key.plug.0) ^ key.generation.rotate_left(17);
        &self.hash_shards[(mix % self.hash_shards.len() as u64) as usize]
    }

    /// Memoized fingerprint for `key`, if any.
    pub fn hash_lookup(&self, key: &HashKey) -> Option<Fingerprint> {
        let found = lock(self.hash_shard_for(key)).get(key).copied();
        if found.is_some() {
            bump(&self.counters.hash_hits);
        } else {
            bump(&self.counters.hash_misses);
        }
        found
    }

    pub fn hash_store(&self, key: HashKey, fingerprint: Fingerprint) {
        if self.is_shut_down() {
            return;
        }
        lock(self.hash_shard_for(&key)).put(key, fingerprint);
    }

    // -----------------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> CacheStats {
        let (mut entries, mut bytes) = (0, 0);
        for shard in &self.shards {
            let shard = lock(shard);
            entries += shard.entries.len();
            bytes += shard.bytes;
        }
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            computes: load(&self.counters.computes),
            waits: load(&self.counters.waits),
            evictions: load(&self.counters.evictions),
            cancellations: load(&self.counters.cancellations),
            failures: load(&self.counters.failures),
            hash_hits: load(&self.counters.hash_hits),
            hash_misses: load(&self.counters.hash_misses),
            entries,
            bytes,
            in_flight: self.in_flight.len(),
        }
    }
}

/// Winner-side registration of an in-flight fingerprint.
///
/// Completing removes the registry entry and then fulfils the promise. If the
/// winner unwinds before completing, waiters receive
/// [`EvalError::Abandoned`] rather than blocking forever.
struct InFlight<'c> {
    cache: &'c CacheService,
    fingerprint: Fingerprint,
    promise: Arc<Promise<Outcome>>,
    completed: bool,
}

impl InFlight<'_> {
    fn complete(mut self, outcome: Outcome) {
        self.finish(outcome);
    }

    fn finish(&mut self, outcome: Outcome) {
        self.completed = true;
        self.cache
            .in_flight
            .remove_if(&self.fingerprint, |_, p| Arc::ptr_eq(p, &self.promise));
        self.promise.fulfil(outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(fingerprint = %self.fingerprint, "in-flight computation abandoned");
            self.finish(Err(EvalError::Abandoned));
        }
    }
}
