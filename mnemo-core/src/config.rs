//! Configuration for the mnemo memory store.
//!
//! Plain structs with defaults, loadable from TOML. Construction from code is
//! the primary path; `from_file` exists for deployments that ship a config.

use serde::{Deserialize, Serialize};

/// Top-level mnemo configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MnemoConfig {
    /// Shard partitioning settings.
    #[serde(default)]
    pub shards: ShardConfig,
    /// The three front-end caches.
    #[serde(default)]
    pub caches: CachesConfig,
    /// Background lifecycle tasks.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Conflict detection thresholds.
    #[serde(default)]
    pub conflict: ConflictConfig,
    /// Health check thresholds.
    #[serde(default)]
    pub health: HealthConfig,
}

impl MnemoConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `MnemoError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::MnemoError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Shard partitioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Number of partitions. Fixed for the lifetime of the manager.
    #[serde(default = "default_16")]
    pub shard_count: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self { shard_count: 16 }
    }
}

/// Capacity and TTL for one cache instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before the least-recently-used is evicted.
    pub capacity: usize,
    /// Entry time-to-live in milliseconds.
    pub ttl_ms: u64,
}

/// Configuration for the three independently-sized caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachesConfig {
    /// `MemoryRecord` by id.
    #[serde(default = "default_record_cache")]
    pub records: CacheConfig,
    /// Per-user id lists.
    #[serde(default = "default_user_cache")]
    pub user_lists: CacheConfig,
    /// Conflict resolutions by fingerprint.
    #[serde(default = "default_conflict_cache")]
    pub conflicts: CacheConfig,
}

impl Default for CachesConfig {
    fn default() -> Self {
        Self {
            records: default_record_cache(),
            user_lists: default_user_cache(),
            conflicts: default_conflict_cache(),
        }
    }
}

/// Background lifecycle task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Stored-memory time-to-live in milliseconds. Records older than this
    /// are removed by the sweep and filtered from similarity results.
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_ms: u64,
    /// How often the expiry sweep runs, in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
    /// How often the rebalance check runs, in milliseconds.
    #[serde(default = "default_rebalance_interval")]
    pub rebalance_interval_ms: u64,
    /// Shards above the mean live count by more than this ratio are flagged.
    #[serde(default = "default_0_2")]
    pub rebalance_threshold: f64,
    /// Bounded timeout when joining batch user-group futures, in milliseconds.
    #[serde(default = "default_batch_timeout")]
    pub batch_join_timeout_ms: u64,
    /// Bounded wait for background tasks during shutdown, in milliseconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            memory_ttl_ms: default_memory_ttl(),
            sweep_interval_ms: default_sweep_interval(),
            rebalance_interval_ms: default_rebalance_interval(),
            rebalance_threshold: 0.2,
            batch_join_timeout_ms: default_batch_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

/// Conflict detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Jaccard similarity at or above which two contents conflict.
    #[serde(default = "default_0_85")]
    pub similarity_threshold: f64,
    /// Contents shorter than this (in characters) never match.
    #[serde(default = "default_min_content_len")]
    pub min_content_len: usize,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            min_content_len: default_min_content_len(),
        }
    }
}

/// Health check thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// A shard holding more live records than this is flagged.
    #[serde(default = "default_shard_ceiling")]
    pub max_records_per_shard: u64,
    /// Record-cache hit rate below this is flagged.
    #[serde(default = "default_0_7")]
    pub min_record_cache_hit_rate: f64,
    /// Record-cache lookups required before the hit-rate check applies.
    #[serde(default = "default_min_lookups")]
    pub min_cache_lookups: u64,
    /// Resolved-conflicts over total writes above this ratio is flagged.
    #[serde(default = "default_0_1")]
    pub max_conflict_ratio: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_records_per_shard: default_shard_ceiling(),
            min_record_cache_hit_rate: 0.7,
            min_cache_lookups: default_min_lookups(),
            max_conflict_ratio: 0.1,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_record_cache() -> CacheConfig {
    CacheConfig {
        capacity: 50_000,
        ttl_ms: 24 * 60 * 60 * 1000,
    }
}
fn default_user_cache() -> CacheConfig {
    CacheConfig {
        capacity: 10_000,
        ttl_ms: 30 * 60 * 1000,
    }
}
fn default_conflict_cache() -> CacheConfig {
    CacheConfig {
        capacity: 1_000,
        ttl_ms: 60 * 60 * 1000,
    }
}

fn default_0_1() -> f64 { 0.1 }
fn default_0_2() -> f64 { 0.2 }
fn default_0_7() -> f64 { 0.7 }
fn default_0_85() -> f64 { 0.85 }
fn default_16() -> usize { 16 }
fn default_min_content_len() -> usize { 10 }
fn default_memory_ttl() -> u64 { 30 * 24 * 60 * 60 * 1000 }
fn default_sweep_interval() -> u64 { 60 * 60 * 1000 }
fn default_rebalance_interval() -> u64 { 5 * 60 * 1000 }
fn default_batch_timeout() -> u64 { 30 * 1000 }
fn default_shutdown_timeout() -> u64 { 5 * 1000 }
fn default_shard_ceiling() -> u64 { 1_000_000 }
fn default_min_lookups() -> u64 { 1_000 }
