//! # Mnemo Core Library
//!
//! Concurrent, sharded, cached, conflict-aware memory store for AI agents.
//!
//! The [`ConcurrentMemoryManager`] is the single entry point:
//!
//! - **Sharding** — records are hash-partitioned by id across a fixed set of
//!   [`MemoryShard`]s; a record never moves once placed.
//! - **Caching** — three TTL+LRU caches front the shards: records by id,
//!   per-user id lists, and conflict resolutions by fingerprint.
//! - **Conflict resolution** — the [`ConflictResolver`] compares new content
//!   against a user's existing memories before every write and decides to
//!   merge, replace, ignore, or create.
//! - **Lifecycle** — background tasks sweep expired records and flag shard
//!   imbalance; shutdown is bounded and idempotent.
//!
//! Persistence and vector similarity live behind the [`MemoryPipeline`]
//! trait; the crate ships an in-process default so the store works without
//! any external backend.
//!
//! ## Concurrency Contract
//!
//! Every public operation is safe to call from any number of tasks. Shard
//! locks are never held across an await, reads bump access metadata without
//! taking a write lock, and cache/shard mutation happens only after the
//! pipeline call for the operation has resolved.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod cache;
pub mod config;
pub mod conflict;
pub mod error;
pub mod manager;
pub mod pipeline;
pub mod shard;
pub mod types;

pub use cache::{CacheStats, TtlCache};
pub use config::MnemoConfig;
pub use conflict::{ConflictResolution, ConflictResolver, ConflictStrategy, ConflictType};
pub use error::{MnemoError, Result};
pub use manager::{ConcurrentMemoryManager, HealthReport, ManagerStats};
pub use pipeline::{ConcurrencyController, MemoryPipeline, PerformanceMonitor};
pub use shard::{MemoryShard, ShardStats};
pub use types::*;
