//! The public façade over shards, caches, and conflict resolution.
//!
//! [`ConcurrentMemoryManager`] hashes every request to a deterministic shard,
//! front-ends the shards with three TTL caches, consults the
//! [`ConflictResolver`] before writes, fans batch requests out per user, and
//! runs the background lifecycle tasks (expiry sweep, rebalance check).
//!
//! Locking discipline: the manager holds no lock of its own — it composes
//! already-thread-safe shards and caches, and no shard lock is ever held
//! across a pipeline await. Shard and cache mutation happens strictly after
//! the pipeline call resolves.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::config::MnemoConfig;
use crate::conflict::{ConflictResolution, ConflictResolver, ConflictStrategy};
use crate::error::{MnemoError, Result};
use crate::pipeline::{
    ConcurrencyController, LocalPipeline, MemoryPipeline, NoopMonitor, PerformanceMonitor,
    Unrestricted,
};
use crate::shard::{MemoryShard, ShardStats};
use crate::types::{CreationRequest, MemoryId, MemoryRecord};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Lock-free manager-level counters, shared with the background tasks.
#[derive(Debug, Default)]
struct ManagerCounters {
    total_created: AtomicU64,
    total_updated: AtomicU64,
    total_deleted: AtomicU64,
    conflicts_resolved: AtomicU64,
    total_expired: AtomicU64,
    rebalance_flags: AtomicU64,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Concurrent, sharded, cached, conflict-aware memory store.
///
/// Must be constructed inside a Tokio runtime: the background lifecycle
/// tasks are spawned at construction and stopped by [`Self::shutdown`].
pub struct ConcurrentMemoryManager {
    config: MnemoConfig,
    shards: Arc<Vec<MemoryShard>>,
    record_cache: Arc<TtlCache<MemoryId, MemoryRecord>>,
    user_cache: Arc<TtlCache<String, Vec<MemoryId>>>,
    conflict_cache: Arc<TtlCache<u64, ConflictResolution>>,
    resolver: ConflictResolver,
    pipeline: Arc<dyn MemoryPipeline>,
    controller: Arc<dyn ConcurrencyController>,
    monitor: Arc<dyn PerformanceMonitor>,
    counters: Arc<ManagerCounters>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl ConcurrentMemoryManager {
    /// Create a manager with in-process defaults for all collaborators.
    #[must_use]
    pub fn new(config: MnemoConfig) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(LocalPipeline),
            Arc::new(Unrestricted),
            Arc::new(NoopMonitor),
        )
    }

    /// Create a manager wired to external collaborators.
    #[must_use]
    pub fn with_collaborators(
        config: MnemoConfig,
        pipeline: Arc<dyn MemoryPipeline>,
        controller: Arc<dyn ConcurrencyController>,
        monitor: Arc<dyn PerformanceMonitor>,
    ) -> Self {
        let shard_count = config.shards.shard_count.max(1);
        let shards: Arc<Vec<MemoryShard>> =
            Arc::new((0..shard_count).map(MemoryShard::new).collect());
        let record_cache = Arc::new(TtlCache::new(
            config.caches.records.capacity,
            Duration::from_millis(config.caches.records.ttl_ms),
        ));
        let user_cache = Arc::new(TtlCache::new(
            config.caches.user_lists.capacity,
            Duration::from_millis(config.caches.user_lists.ttl_ms),
        ));
        let conflict_cache = Arc::new(TtlCache::new(
            config.caches.conflicts.capacity,
            Duration::from_millis(config.caches.conflicts.ttl_ms),
        ));
        let counters = Arc::new(ManagerCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let manager = Self {
            resolver: ConflictResolver::new(config.conflict.clone()),
            config,
            shards,
            record_cache,
            user_cache,
            conflict_cache,
            pipeline,
            controller,
            monitor,
            counters,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        };
        manager.spawn_background_tasks(shutdown_rx);
        info!(shard_count, "memory manager started");
        manager
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    /// Deterministic shard index for a memory id. Pure function of the id:
    /// repeated calls always route to the same shard.
    #[must_use]
    pub fn shard_index(&self, id: &MemoryId) -> usize {
        let mut hasher = std::hash::DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard_for(&self, id: &MemoryId) -> &MemoryShard {
        &self.shards[self.shard_index(id)]
    }

    /// The weak conflict fingerprint: user id plus a plain hash of the raw
    /// content. Collision-prone by design; cached resolutions re-validate
    /// the record they name before acting.
    fn conflict_fingerprint(user_id: &str, content: &str) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        user_id.hash(&mut hasher);
        content.hash(&mut hasher);
        hasher.finish()
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Create a memory, resolving semantic conflicts against the user's
    /// existing records first. Returns the id of the record that represents
    /// the content afterwards (a new one, or the surviving existing one).
    pub async fn create_memory(
        &self,
        content: &str,
        user_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId> {
        self.ensure_running()?;
        self.controller.admit(user_id, "create_memory").await?;
        let start = Instant::now();
        self.monitor.increment("create_memory");

        let fingerprint = Self::conflict_fingerprint(user_id, content);
        let resolution = match self.conflict_cache.get(&fingerprint) {
            Some(cached) => Some(cached),
            None => {
                let existing = self.load_user_memories(user_id);
                let best = self.most_similar(content, &existing);
                best.map(|record| {
                    let resolution =
                        self.resolver.resolve_creation_conflict(content, user_id, record);
                    self.conflict_cache.put(fingerprint, resolution.clone());
                    resolution
                })
            }
        };

        let id = match resolution {
            Some(resolution) => self.apply_creation_resolution(resolution, user_id, metadata).await?,
            None => self.create_record(content, user_id, metadata).await?,
        };

        self.monitor.record_duration("create_memory", start.elapsed());
        Ok(id)
    }

    /// Create a batch of memories, fanned out per user group.
    ///
    /// Groups run concurrently against the pipeline with a bounded join
    /// timeout; a failed or timed-out group is logged and excluded from the
    /// combined result (partial success).
    pub async fn create_memories_batch(
        &self,
        requests: Vec<CreationRequest>,
    ) -> Result<Vec<MemoryId>> {
        self.ensure_running()?;
        self.controller.admit("batch", "create_memories_batch").await?;
        let start = Instant::now();
        self.monitor.increment("create_memories_batch");

        // Partition by user so conflict checks stay local to one user.
        let mut groups: HashMap<String, Vec<CreationRequest>> = HashMap::new();
        for request in requests {
            groups.entry(request.user_id.clone()).or_default().push(request);
        }

        let mut results = Vec::new();
        let mut join_set = JoinSet::new();
        let join_timeout = Duration::from_millis(self.config.lifecycle.batch_join_timeout_ms);

        'groups: for (user_id, group) in groups {
            // Resolve conflicts before anything is sent to the pipeline.
            let existing = self.load_user_memories(&user_id);
            let contents: Vec<String> = group.iter().map(|r| r.content.clone()).collect();
            let resolutions =
                self.resolver.resolve_batch_conflicts(&contents, &user_id, &existing);

            // Group-local outcomes; only committed once the whole group
            // resolves, so a failed group is excluded wholesale.
            let mut group_ids: Vec<MemoryId> = Vec::new();
            let mut conflicts: u64 = 0;
            let mut to_create: Vec<CreationRequest> = Vec::new();
            for (request, resolution) in group.into_iter().zip(resolutions) {
                match resolution.strategy {
                    ConflictStrategy::Ignore => {
                        if let Some(id) = resolution.existing_memory_id {
                            conflicts += 1;
                            group_ids.push(id);
                        }
                    }
                    ConflictStrategy::Replace => {
                        if let Some(id) = resolution.existing_memory_id {
                            if let Err(err) = self.remove_everywhere(id).await {
                                warn!(
                                    user_id = %user_id,
                                    %err,
                                    "batch group replace failed; excluded from result"
                                );
                                continue 'groups;
                            }
                            conflicts += 1;
                        }
                        to_create.push(CreationRequest {
                            content: resolution.merged_content,
                            ..request
                        });
                    }
                    ConflictStrategy::Merge => {
                        conflicts += 1;
                        to_create.push(CreationRequest {
                            content: resolution.merged_content,
                            ..request
                        });
                    }
                    ConflictStrategy::CreateNew => to_create.push(request),
                }
            }

            self.counters.conflicts_resolved.fetch_add(conflicts, Ordering::Relaxed);
            results.append(&mut group_ids);
            if to_create.is_empty() {
                continue;
            }
            let pipeline = Arc::clone(&self.pipeline);
            join_set.spawn(async move {
                let outcome =
                    tokio::time::timeout(join_timeout, pipeline.create_memories_batch(to_create.clone()))
                        .await;
                (user_id, to_create, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (user_id, group, outcome) = match joined {
                Ok(triple) => triple,
                Err(err) => {
                    warn!(%err, "batch group task failed to join");
                    continue;
                }
            };
            match outcome {
                Ok(Ok(ids)) => {
                    for (request, id) in group.into_iter().zip(ids) {
                        let record = self.store_created(id, request.content, &user_id, request.metadata);
                        results.push(record.id);
                    }
                    self.user_cache.remove(&user_id);
                }
                Ok(Err(err)) => {
                    warn!(user_id = %user_id, %err, "batch group failed; excluded from result");
                }
                Err(_) => {
                    let err = MnemoError::Timeout {
                        operation: "create_memories_batch".to_string(),
                        elapsed_ms: join_timeout.as_millis() as u64,
                    };
                    warn!(user_id = %user_id, %err, "batch group timed out; excluded from result");
                }
            }
        }

        self.monitor.record_duration("create_memories_batch", start.elapsed());
        Ok(results)
    }

    /// Update a memory's content and metadata.
    ///
    /// Returns `false` without side effects when the id is unknown. When the
    /// new content is similar to the current content, an update-conflict
    /// resolution (merge or replace) decides what is actually stored.
    pub async fn update_memory(
        &self,
        id: MemoryId,
        new_content: &str,
        new_metadata: HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        self.ensure_running()?;
        self.controller.admit(&id.to_string(), "update_memory").await?;
        let start = Instant::now();
        self.monitor.increment("update_memory");

        let Some(existing) = self.load_record(&id) else {
            return Ok(false);
        };

        let content = if self.resolver.is_similar_content(new_content, &existing.content) {
            let resolution = self.resolver.resolve_update_conflict(id, new_content, &existing);
            self.counters.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
            match resolution.strategy {
                ConflictStrategy::Merge => resolution.merged_content,
                // Replace and the remaining strategies store the new text.
                ConflictStrategy::Replace
                | ConflictStrategy::Ignore
                | ConflictStrategy::CreateNew => new_content.to_string(),
            }
        } else {
            new_content.to_string()
        };

        if !self.pipeline.update_memory(id, &content, &new_metadata).await? {
            return Ok(false);
        }

        let mut updated = existing;
        updated.content = content;
        updated.metadata = new_metadata;
        updated.updated_at = Utc::now();
        self.shard_for(&id).add(updated.clone());
        self.record_cache.put(id, updated);
        self.counters.total_updated.fetch_add(1, Ordering::Relaxed);

        self.monitor.record_duration("update_memory", start.elapsed());
        Ok(true)
    }

    /// Delete a memory. Deleting an absent id is a successful no-op,
    /// observably identical to deleting it twice.
    pub async fn delete_memory(&self, id: MemoryId) -> Result<bool> {
        self.ensure_running()?;
        self.controller.admit(&id.to_string(), "delete_memory").await?;
        let start = Instant::now();
        self.monitor.increment("delete_memory");

        self.pipeline.delete_memory(id).await?;
        if let Some(removed) = self.shard_for(&id).remove(&id) {
            self.user_cache.remove(&removed.user_id);
            self.counters.total_deleted.fetch_add(1, Ordering::Relaxed);
        }
        self.record_cache.remove(&id);

        self.monitor.record_duration("delete_memory", start.elapsed());
        Ok(true)
    }

    /// Fetch a memory by id: cache-first, falling through to the owning
    /// shard and repopulating the cache on a shard hit.
    pub async fn get_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>> {
        self.ensure_running()?;
        self.controller.admit(&id.to_string(), "get_memory").await?;
        self.monitor.increment("get_memory");
        Ok(self.load_record(&id))
    }

    /// Fetch all of a user's memories. Cache-first on the id list; a miss
    /// scans every shard (a user's records are spread by id-hash).
    pub async fn get_user_memories(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        self.ensure_running()?;
        self.controller.admit(user_id, "get_user_memories").await?;
        self.monitor.increment("get_user_memories");
        Ok(self.load_user_memories(user_id))
    }

    /// Similarity search, delegated to the pipeline and post-filtered:
    /// ownership is enforced as a safety net, expired records are dropped,
    /// and results are ordered most-recently-accessed first.
    pub async fn search_similar_memories(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<MemoryRecord>> {
        self.ensure_running()?;
        self.controller.admit(user_id, "search_similar_memories").await?;
        let start = Instant::now();
        self.monitor.increment("search_similar_memories");

        let mut results = self
            .pipeline
            .search_similar(query, user_id, limit, threshold)
            .await?;

        let now = Utc::now();
        let ttl_ms = self.config.lifecycle.memory_ttl_ms;
        results.retain(|record| record.user_id == user_id && record.age_ms(now) <= ttl_ms);
        results.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        results.truncate(limit);

        self.monitor.record_duration("search_similar_memories", start.elapsed());
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Stats, health, shutdown
    // -----------------------------------------------------------------------

    /// Aggregate statistics across shards and caches. Computed on demand.
    #[must_use]
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            total_created: self.counters.total_created.load(Ordering::Relaxed),
            total_updated: self.counters.total_updated.load(Ordering::Relaxed),
            total_deleted: self.counters.total_deleted.load(Ordering::Relaxed),
            conflicts_resolved: self.counters.conflicts_resolved.load(Ordering::Relaxed),
            total_expired: self.counters.total_expired.load(Ordering::Relaxed),
            rebalance_flags: self.counters.rebalance_flags.load(Ordering::Relaxed),
            total_memories: self.shards.iter().map(MemoryShard::len).sum(),
            shards: self.shards.iter().map(MemoryShard::stats).collect(),
            record_cache: self.record_cache.stats(),
            user_cache: self.user_cache.stats(),
            conflict_cache: self.conflict_cache.stats(),
        }
    }

    /// Health check against the configured thresholds.
    #[must_use]
    pub fn check_health(&self) -> HealthReport {
        let health = &self.config.health;
        let mut issues = Vec::new();

        for shard in self.shards.iter() {
            if shard.len() > health.max_records_per_shard {
                issues.push(format!(
                    "shard {} holds {} records (ceiling {})",
                    shard.id(),
                    shard.len(),
                    health.max_records_per_shard
                ));
            }
        }

        let cache_stats = self.record_cache.stats();
        let lookups = cache_stats.hits + cache_stats.misses;
        if lookups >= health.min_cache_lookups
            && cache_stats.hit_rate < health.min_record_cache_hit_rate
        {
            issues.push(format!(
                "record cache hit rate {:.2} below {:.2}",
                cache_stats.hit_rate, health.min_record_cache_hit_rate
            ));
        }

        let writes = self.counters.total_created.load(Ordering::Relaxed)
            + self.counters.total_updated.load(Ordering::Relaxed);
        let conflicts = self.counters.conflicts_resolved.load(Ordering::Relaxed);
        if writes > 0 {
            let ratio = conflicts as f64 / writes as f64;
            if ratio > health.max_conflict_ratio {
                issues.push(format!(
                    "conflict ratio {:.2} above {:.2}",
                    ratio, health.max_conflict_ratio
                ));
            }
        }

        HealthReport {
            healthy: issues.is_empty(),
            issues,
        }
    }

    /// Stop background tasks, shut the caches down, and clear every shard.
    /// Idempotent; safe to call once at process teardown.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let deadline = Duration::from_millis(self.config.lifecycle.shutdown_timeout_ms);
        for handle in handles {
            if tokio::time::timeout(deadline, handle).await.is_err() {
                warn!("background task did not stop within the shutdown deadline");
            }
        }

        self.record_cache.shutdown();
        self.user_cache.shutdown();
        self.conflict_cache.shutdown();
        for shard in self.shards.iter() {
            shard.clear();
        }
        info!("memory manager shut down");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            Err(MnemoError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Cache-then-shard record lookup; repopulates the cache on a shard hit.
    fn load_record(&self, id: &MemoryId) -> Option<MemoryRecord> {
        if let Some(record) = self.record_cache.get(id) {
            return Some(record);
        }
        let record = self.shard_for(id).get(id)?;
        self.record_cache.put(*id, record.clone());
        Some(record)
    }

    /// Cache-then-scan per-user lookup; caches the resulting id list.
    fn load_user_memories(&self, user_id: &str) -> Vec<MemoryRecord> {
        if let Some(ids) = self.user_cache.get(&user_id.to_string()) {
            // Ids deleted since the list was cached are silently skipped.
            return ids.iter().filter_map(|id| self.load_record(id)).collect();
        }
        let mut records = Vec::new();
        for shard in self.shards.iter() {
            records.extend(shard.user_memories(user_id));
        }
        let ids: Vec<MemoryId> = records.iter().map(|r| r.id).collect();
        self.user_cache.put(user_id.to_string(), ids);
        for record in &records {
            self.record_cache.put(record.id, record.clone());
        }
        records
    }

    /// The user's most similar existing record, if any clears the
    /// similarity threshold.
    fn most_similar<'a>(
        &self,
        content: &str,
        existing: &'a [MemoryRecord],
    ) -> Option<&'a MemoryRecord> {
        existing
            .iter()
            .filter(|record| self.resolver.is_similar_content(content, &record.content))
            .max_by(|a, b| {
                self.resolver
                    .similarity(content, &a.content)
                    .partial_cmp(&self.resolver.similarity(content, &b.content))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Act on a creation-conflict resolution. Every strategy is handled
    /// here; cached resolutions re-validate the record they name, falling
    /// back to a plain create when it no longer exists.
    async fn apply_creation_resolution(
        &self,
        resolution: ConflictResolution,
        user_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId> {
        match resolution.strategy {
            ConflictStrategy::Ignore => {
                if let Some(id) = resolution.existing_memory_id {
                    if self.load_record(&id).is_some() {
                        self.counters.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
                        debug!(%id, user_id, "duplicate content ignored; returning existing id");
                        return Ok(id);
                    }
                }
                // The record the resolution named is gone; store fresh.
                self.create_record(&resolution.merged_content, user_id, metadata).await
            }
            ConflictStrategy::Replace => {
                if let Some(id) = resolution.existing_memory_id {
                    if self.load_record(&id).is_some() {
                        self.remove_everywhere(id).await?;
                    }
                }
                self.counters.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
                self.create_record(&resolution.merged_content, user_id, metadata).await
            }
            ConflictStrategy::Merge => {
                self.counters.conflicts_resolved.fetch_add(1, Ordering::Relaxed);
                self.create_record(&resolution.merged_content, user_id, metadata).await
            }
            ConflictStrategy::CreateNew => {
                self.create_record(&resolution.merged_content, user_id, metadata).await
            }
        }
    }

    /// Delegate creation to the pipeline, then store the record in its shard
    /// and refresh the caches.
    async fn create_record(
        &self,
        content: &str,
        user_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId> {
        let id = self.pipeline.create_memory(content, user_id, &metadata).await?;
        let record = self.store_created(id, content.to_string(), user_id, metadata);
        self.user_cache.remove(&user_id.to_string());
        Ok(record.id)
    }

    /// Write a freshly created record into its shard and the record cache.
    fn store_created(
        &self,
        id: MemoryId,
        content: String,
        user_id: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> MemoryRecord {
        let now = Utc::now();
        let record = MemoryRecord {
            id,
            content,
            user_id: user_id.to_string(),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata,
        };
        self.shard_for(&id).add(record.clone());
        self.record_cache.put(id, record.clone());
        self.counters.total_created.fetch_add(1, Ordering::Relaxed);
        record
    }

    /// Pipeline delete plus shard/cache removal.
    async fn remove_everywhere(&self, id: MemoryId) -> Result<()> {
        self.pipeline.delete_memory(id).await?;
        if let Some(removed) = self.shard_for(&id).remove(&id) {
            self.user_cache.remove(&removed.user_id);
            self.counters.total_deleted.fetch_add(1, Ordering::Relaxed);
        }
        self.record_cache.remove(&id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Background tasks
    // -----------------------------------------------------------------------

    fn spawn_background_tasks(&self, shutdown_rx: watch::Receiver<bool>) {
        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_sweep_task(shutdown_rx.clone()));
        tasks.push(self.spawn_rebalance_task(shutdown_rx));
    }

    /// Periodic TTL sweep: removes expired records from every shard and
    /// purges expired cache entries. A slow pass skips missed ticks instead
    /// of piling up overlapping runs.
    fn spawn_sweep_task(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let shards = Arc::clone(&self.shards);
        let record_cache = Arc::clone(&self.record_cache);
        let user_cache = Arc::clone(&self.user_cache);
        let conflict_cache = Arc::clone(&self.conflict_cache);
        let counters = Arc::clone(&self.counters);
        let ttl = Duration::from_millis(self.config.lifecycle.memory_ttl_ms);
        let period = Duration::from_millis(self.config.lifecycle.sweep_interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // First tick completes immediately; skip it.
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        let mut expired = 0usize;
                        for shard in shards.iter() {
                            let removed = shard.cleanup_expired(ttl);
                            if removed > 0 {
                                debug!(shard_id = shard.id(), removed, "expired memories removed");
                            }
                            expired += removed;
                        }
                        counters.total_expired.fetch_add(expired as u64, Ordering::Relaxed);
                        record_cache.purge_expired();
                        user_cache.purge_expired();
                        conflict_cache.purge_expired();
                    }
                }
            }
        })
    }

    /// Periodic rebalance check: flags shards whose live count exceeds the
    /// mean by more than the configured threshold. Detection only — records
    /// never move between shards.
    fn spawn_rebalance_task(&self, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let shards = Arc::clone(&self.shards);
        let counters = Arc::clone(&self.counters);
        let threshold = self.config.lifecycle.rebalance_threshold;
        let period = Duration::from_millis(self.config.lifecycle.rebalance_interval_ms.max(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        let counts: Vec<u64> = shards.iter().map(MemoryShard::len).collect();
                        let total: u64 = counts.iter().sum();
                        if total == 0 {
                            continue;
                        }
                        let mean = total as f64 / counts.len() as f64;
                        let ceiling = mean * (1.0 + threshold);
                        for (index, count) in counts.iter().enumerate() {
                            if *count as f64 > ceiling {
                                counters.rebalance_flags.fetch_add(1, Ordering::Relaxed);
                                warn!(
                                    shard_id = index,
                                    count = *count,
                                    mean,
                                    "shard imbalance detected (no migration performed)"
                                );
                            }
                        }
                    }
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Aggregate statistics across the whole manager.
#[derive(Debug, Clone)]
pub struct ManagerStats {
    /// Records created since startup.
    pub total_created: u64,
    /// Records updated since startup.
    pub total_updated: u64,
    /// Records deleted since startup.
    pub total_deleted: u64,
    /// Conflicts resolved (merge/replace/ignore outcomes) since startup.
    pub conflicts_resolved: u64,
    /// Records removed by the TTL sweep since startup.
    pub total_expired: u64,
    /// Imbalance flags raised by the rebalance check since startup.
    pub rebalance_flags: u64,
    /// Live records across all shards.
    pub total_memories: u64,
    /// Per-shard snapshots.
    pub shards: Vec<ShardStats>,
    /// Record-by-id cache statistics.
    pub record_cache: CacheStats,
    /// Per-user id-list cache statistics.
    pub user_cache: CacheStats,
    /// Conflict-resolution cache statistics.
    pub conflict_cache: CacheStats,
}

/// Outcome of [`ConcurrentMemoryManager::check_health`].
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Whether every check passed.
    pub healthy: bool,
    /// Human-readable descriptions of failed checks.
    pub issues: Vec<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
