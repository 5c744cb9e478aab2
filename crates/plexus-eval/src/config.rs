//! Configuration for the cache service and for individual evaluations.

use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;

/// Environment variable overriding [`CacheConfig::byte_budget`].
pub const ENV_CACHE_BYTES: &str = "PLEXUS_CACHE_BYTES";
/// Environment variable overriding [`CacheConfig::hash_entry_budget`].
pub const ENV_HASH_CACHE_ENTRIES: &str = "PLEXUS_HASH_CACHE_ENTRIES";
/// Environment variable overriding [`CacheConfig::shards`].
pub const ENV_CACHE_SHARDS: &str = "PLEXUS_CACHE_SHARDS";

/// Sizing of a [`CacheService`](crate::cache::CacheService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Upper bound on the approximate bytes held by completed values.
    pub byte_budget: usize,
    /// Upper bound on memoized fingerprints.
    pub hash_entry_budget: usize,
    /// Number of independently locked buckets. Values above 1 let unrelated
    /// lookups proceed without contending on one lock.
    pub shards: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            byte_budget: 512 * 1024 * 1024,
            hash_entry_budget: 250_000,
            shards: 16,
        }
    }
}

impl CacheConfig {
    /// Defaults, overridden by `PLEXUS_*` environment variables where set
    /// and parseable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`CacheConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = CacheConfig::default();
        let read = |key: &str, default: usize| -> usize {
            match lookup(key) {
                None => default,
                Some(raw) => match raw.trim().parse::<usize>() {
                    Ok(v) if v > 0 => v,
                    _ => {
                        tracing::warn!(%key, value = %raw, "ignoring invalid cache setting");
                        default
                    }
                },
            }
        };
        CacheConfig {
            byte_budget: read(ENV_CACHE_BYTES, defaults.byte_budget),
            hash_entry_budget: read(ENV_HASH_CACHE_ENTRIES, defaults.hash_entry_budget),
            shards: read(ENV_CACHE_SHARDS, defaults.shards),
        }
    }

    /// Shard count clamped to at least one.
    pub fn shard_count(&self) -> usize {
        self.shards.max(1)
    }
}

/// Per-evaluation options.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    /// Token polled by every computation started on behalf of this
    /// evaluation.
    pub token: CancellationToken,
    /// When a computation this evaluation was waiting on is cancelled by
    /// *someone else's* token, retry it instead of reporting `Cancelled`.
    pub retry_foreign_cancellation: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions {
            token: CancellationToken::new(),
            retry_foreign_cancellation: true,
        }
    }
}

impl EvalOptions {
    pub fn with_token(token: CancellationToken) -> Self {
        EvalOptions {
            token,
            ..EvalOptions::default()
        }
    }
}
