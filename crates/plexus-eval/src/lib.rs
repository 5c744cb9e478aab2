//! Lazy, cached evaluation of plexus graphs.
//!
//! - [`cache::CacheService`]: the shared, bounded store of computed values
//!   with per-fingerprint deduplication of concurrent requests.
//! - [`engine::Evaluator`]: `hash` and `get_value` over a borrowed graph.
//! - [`process`]: the per-thread stack used for cycle detection and token
//!   inheritance.
//! - [`cancel::CancellationToken`] and [`background::BackgroundTask`] for
//!   abandoning stale work.

pub mod background;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod nodes;
pub mod process;
pub mod promise;

// Re-export commonly used types
pub use background::{BackgroundError, BackgroundTask};
pub use cache::{CacheService, CacheStats, HashKey, Outcome};
pub use cancel::CancellationToken;
pub use config::{CacheConfig, EvalOptions};
pub use engine::Evaluator;
pub use process::{FrameKind, Process, ProcessFrame};
pub use promise::Promise;
