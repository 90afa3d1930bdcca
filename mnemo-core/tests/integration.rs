//! Integration tests — end-to-end memory store flows.
//!
//! These tests exercise complete lifecycles through the public manager API:
//! conflict-aware creation, cache-coherent reads after mutation, batch
//! fan-out, TTL expiry, and shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use mnemo_core::config::MnemoConfig;
use mnemo_core::error::{MnemoError, Result};
use mnemo_core::manager::ConcurrentMemoryManager;
use mnemo_core::pipeline::{
    ConcurrencyController, LocalPipeline, MemoryPipeline, NoopMonitor,
};
use mnemo_core::types::{CreationRequest, MemoryId, MemoryRecord};

fn manager() -> ConcurrentMemoryManager {
    ConcurrentMemoryManager::new(MnemoConfig::default())
}

fn no_meta() -> HashMap<String, serde_json::Value> {
    HashMap::new()
}

// ---------------------------------------------------------------------------
// Creation and conflict resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_creation_collapses_to_one_record() {
    let m = manager();
    let first = m
        .create_memory("I like coffee", "u1", no_meta())
        .await
        .expect("first create");
    let second = m
        .create_memory("I like coffee", "u1", no_meta())
        .await
        .expect("second create");

    assert_eq!(first, second);
    assert_eq!(m.stats().total_memories, 1);
    let records = m.get_user_memories("u1").await.expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].content, "I like coffee");
    m.shutdown().await;
}

#[tokio::test]
async fn same_content_for_different_users_stays_separate() {
    let m = manager();
    let a = m
        .create_memory("I like coffee", "u1", no_meta())
        .await
        .expect("create u1");
    let b = m
        .create_memory("I like coffee", "u2", no_meta())
        .await
        .expect("create u2");

    assert_ne!(a, b);
    assert_eq!(m.stats().total_memories, 2);
    m.shutdown().await;
}

#[tokio::test]
async fn repeated_duplicate_creates_hit_the_conflict_cache() {
    let m = manager();
    m.create_memory("I like coffee", "u1", no_meta())
        .await
        .expect("create");
    for _ in 0..3 {
        m.create_memory("I like coffee", "u1", no_meta())
            .await
            .expect("duplicate create");
    }

    let stats = m.stats();
    assert_eq!(stats.total_memories, 1);
    // First duplicate resolves and caches; the remaining two hit the cache.
    assert!(stats.conflict_cache.hits >= 2);
    m.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 10)]
async fn fifty_concurrent_creates_all_land() {
    let m = Arc::new(manager());
    let mut handles = Vec::new();
    for i in 0..50 {
        let m = Arc::clone(&m);
        handles.push(tokio::spawn(async move {
            m.create_memory(
                &format!("distinct fact number {i} concerning subject {i}"),
                "u1",
                no_meta(),
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("create");
    }

    assert_eq!(m.stats().total_memories, 50);
    assert_eq!(m.get_user_memories("u1").await.expect("list").len(), 50);
    m.shutdown().await;
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn meaningful_update_replaces_content() {
    let m = manager();
    let id = m
        .create_memory("likes coffee from brazil", "u1", no_meta())
        .await
        .expect("create");
    let before = m.get_memory(id).await.expect("get").expect("present");

    tokio::time::sleep(Duration::from_millis(5)).await;
    let new_content =
        "likes coffee from brazil and now prefers a double espresso every morning before work";
    assert!(m.update_memory(id, new_content, no_meta()).await.expect("update"));

    let after = m.get_memory(id).await.expect("get").expect("present");
    assert_eq!(after.content, new_content);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at > before.updated_at);
    assert_eq!(m.stats().total_memories, 1);
    m.shutdown().await;
}

#[tokio::test]
async fn update_of_unknown_id_reports_false() {
    let m = manager();
    let updated = m
        .update_memory(MemoryId::new(), "anything at all", no_meta())
        .await
        .expect("update call");
    assert!(!updated);
    m.shutdown().await;
}

#[tokio::test]
async fn reads_after_update_never_see_stale_content() {
    let m = manager();
    let id = m
        .create_memory("original note about the garden", "u1", no_meta())
        .await
        .expect("create");
    // Warm the record cache.
    m.get_memory(id).await.expect("get");

    assert!(
        m.update_memory(id, "completely rewritten note on carpentry", no_meta())
            .await
            .expect("update")
    );
    let record = m.get_memory(id).await.expect("get").expect("present");
    assert_eq!(record.content, "completely rewritten note on carpentry");
    m.shutdown().await;
}

// ---------------------------------------------------------------------------
// Deletion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_twice_is_indistinguishable_from_once() {
    let m = manager();
    let id = m
        .create_memory("short lived note", "u1", no_meta())
        .await
        .expect("create");
    // Warm both caches before deleting.
    m.get_memory(id).await.expect("get");
    m.get_user_memories("u1").await.expect("list");

    assert!(m.delete_memory(id).await.expect("first delete"));
    assert!(m.delete_memory(id).await.expect("second delete"));

    assert!(m.get_memory(id).await.expect("get").is_none());
    assert!(m.get_user_memories("u1").await.expect("list").is_empty());
    assert_eq!(m.stats().total_deleted, 1);
    m.shutdown().await;
}

// ---------------------------------------------------------------------------
// Batch creation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_fans_out_per_user() {
    let m = manager();
    let requests = vec![
        CreationRequest::new("alice enjoys gardening on weekends", "alice"),
        CreationRequest::new("alice recently adopted a rescue dog", "alice"),
        CreationRequest::new("bob collects vintage mechanical watches", "bob"),
        CreationRequest::new("bob is training for a spring marathon", "bob"),
        CreationRequest::new("bob prefers tea over any kind of soda", "bob"),
    ];
    let ids = m.create_memories_batch(requests).await.expect("batch");

    assert_eq!(ids.len(), 5);
    assert_eq!(m.stats().total_memories, 5);
    assert_eq!(m.get_user_memories("alice").await.expect("alice").len(), 2);
    assert_eq!(m.get_user_memories("bob").await.expect("bob").len(), 3);
    m.shutdown().await;
}

#[tokio::test]
async fn batch_resolves_duplicates_against_existing_records() {
    let m = manager();
    let existing = m
        .create_memory("carol plays the violin", "carol", no_meta())
        .await
        .expect("create");

    let ids = m
        .create_memories_batch(vec![
            CreationRequest::new("carol plays the violin", "carol"),
            CreationRequest::new("carol studied painting in florence", "carol"),
        ])
        .await
        .expect("batch");

    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&existing), "duplicate maps to the existing id");
    assert_eq!(m.stats().total_memories, 2);
    m.shutdown().await;
}

#[tokio::test]
async fn user_listing_collects_records_from_every_shard() {
    let m = manager();
    let requests: Vec<CreationRequest> = (0..1600)
        .map(|i| {
            CreationRequest::new(
                format!("note {i} filed under ledger {}", i * 31),
                format!("user-{}", i % 100),
            )
        })
        .collect();
    let ids = m.create_memories_batch(requests).await.expect("batch");
    assert_eq!(ids.len(), 1600);
    assert_eq!(m.stats().total_memories, 1600);

    for user in 0..100 {
        let user_id = format!("user-{user}");
        let records = m.get_user_memories(&user_id).await.expect("list");
        assert_eq!(records.len(), 16, "wrong count for {user_id}");
        assert!(records.iter().all(|r| r.user_id == user_id));
    }
    m.shutdown().await;
}

// ---------------------------------------------------------------------------
// Lifecycle: TTL sweep
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn sweep_removes_expired_records() {
    let config = MnemoConfig::from_toml(
        r#"
        [lifecycle]
        memory_ttl_ms = 50
        sweep_interval_ms = 50

        [caches.records]
        capacity = 1000
        ttl_ms = 50

        [caches.user_lists]
        capacity = 1000
        ttl_ms = 50
        "#,
    )
    .expect("valid toml");
    let m = ConcurrentMemoryManager::new(config);

    let id = m
        .create_memory("ephemeral observation", "u1", no_meta())
        .await
        .expect("create");
    assert!(m.get_memory(id).await.expect("get").is_some());

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(m.get_memory(id).await.expect("get").is_none());
    assert!(m.get_user_memories("u1").await.expect("list").is_empty());
    let stats = m.stats();
    assert_eq!(stats.total_memories, 0);
    assert!(stats.total_expired >= 1);
    m.shutdown().await;
}

// ---------------------------------------------------------------------------
// Collaborator boundaries
// ---------------------------------------------------------------------------

struct RejectEverything;

#[async_trait]
impl ConcurrencyController for RejectEverything {
    async fn admit(&self, routing_key: &str, operation: &str) -> Result<()> {
        Err(MnemoError::Rejected {
            operation: operation.to_string(),
            routing_key: routing_key.to_string(),
        })
    }
}

#[tokio::test]
async fn rejected_admission_leaves_no_trace() {
    let m = ConcurrentMemoryManager::with_collaborators(
        MnemoConfig::default(),
        Arc::new(LocalPipeline),
        Arc::new(RejectEverything),
        Arc::new(NoopMonitor),
    );

    let err = m
        .create_memory("never admitted", "u1", no_meta())
        .await
        .unwrap_err();
    assert!(matches!(err, MnemoError::Rejected { .. }));
    assert_eq!(m.stats().total_memories, 0);
    m.shutdown().await;
}

struct FailingPipeline;

#[async_trait]
impl MemoryPipeline for FailingPipeline {
    async fn create_memory(
        &self,
        _content: &str,
        _user_id: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId> {
        Err(MnemoError::pipeline("create_memory", "backend unavailable"))
    }

    async fn update_memory(
        &self,
        _id: MemoryId,
        _content: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        Err(MnemoError::pipeline("update_memory", "backend unavailable"))
    }

    async fn delete_memory(&self, _id: MemoryId) -> Result<bool> {
        Err(MnemoError::pipeline("delete_memory", "backend unavailable"))
    }

    async fn search_similar(
        &self,
        _query: &str,
        _user_id: &str,
        _limit: usize,
        _threshold: f64,
    ) -> Result<Vec<MemoryRecord>> {
        Err(MnemoError::pipeline("search_similar", "backend unavailable"))
    }

    async fn create_memories_batch(
        &self,
        _requests: Vec<CreationRequest>,
    ) -> Result<Vec<MemoryId>> {
        Err(MnemoError::pipeline("create_memories_batch", "backend unavailable"))
    }
}

#[tokio::test]
async fn failed_pipeline_create_mutates_nothing() {
    let m = ConcurrentMemoryManager::with_collaborators(
        MnemoConfig::default(),
        Arc::new(FailingPipeline),
        Arc::new(mnemo_core::pipeline::Unrestricted),
        Arc::new(NoopMonitor),
    );

    let err = m
        .create_memory("content that never lands", "u1", no_meta())
        .await
        .unwrap_err();
    assert!(matches!(err, MnemoError::Pipeline { .. }));
    assert_eq!(m.stats().total_memories, 0);
    assert!(m.get_user_memories("u1").await.expect("list").is_empty());
    m.shutdown().await;
}

#[tokio::test]
async fn failed_batch_group_is_excluded_not_fatal() {
    let m = ConcurrentMemoryManager::with_collaborators(
        MnemoConfig::default(),
        Arc::new(FailingPipeline),
        Arc::new(mnemo_core::pipeline::Unrestricted),
        Arc::new(NoopMonitor),
    );

    let ids = m
        .create_memories_batch(vec![
            CreationRequest::new("first doomed request", "u1"),
            CreationRequest::new("second doomed request", "u2"),
        ])
        .await
        .expect("batch call itself succeeds");
    assert!(ids.is_empty());
    assert_eq!(m.stats().total_memories, 0);
    m.shutdown().await;
}

/// A pipeline that behaves normally except for failing every delete.
struct DeleteFails;

#[async_trait]
impl MemoryPipeline for DeleteFails {
    async fn create_memory(
        &self,
        _content: &str,
        _user_id: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId> {
        Ok(MemoryId::new())
    }

    async fn update_memory(
        &self,
        _id: MemoryId,
        _content: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn delete_memory(&self, _id: MemoryId) -> Result<bool> {
        Err(MnemoError::pipeline("delete_memory", "backend unavailable"))
    }

    async fn search_similar(
        &self,
        _query: &str,
        _user_id: &str,
        _limit: usize,
        _threshold: f64,
    ) -> Result<Vec<MemoryRecord>> {
        Ok(Vec::new())
    }

    async fn create_memories_batch(
        &self,
        requests: Vec<CreationRequest>,
    ) -> Result<Vec<MemoryId>> {
        Ok(requests.iter().map(|_| MemoryId::new()).collect())
    }
}

#[tokio::test]
async fn batch_survives_a_failed_replace_in_one_group() {
    let m = ConcurrentMemoryManager::with_collaborators(
        MnemoConfig::default(),
        Arc::new(DeleteFails),
        Arc::new(mnemo_core::pipeline::Unrestricted),
        Arc::new(NoopMonitor),
    );
    let kept = m
        .create_memory(
            "bob enjoys drinking strong coffee every single day",
            "u1",
            no_meta(),
        )
        .await
        .expect("seed create");

    // The u1 entry contradicts the seeded record and is longer, so its
    // resolution deletes the old record before creating; that delete fails
    // and must take down only u1's group.
    let ids = m
        .create_memories_batch(vec![
            CreationRequest::new(
                "bob does not enjoys drinking strong coffee every single day",
                "u1",
            ),
            CreationRequest::new("carla keeps a small vegetable garden", "u2"),
        ])
        .await
        .expect("batch must partially succeed");

    assert_eq!(ids.len(), 1, "only u2's group lands");
    assert_eq!(m.get_user_memories("u2").await.expect("u2").len(), 1);

    // u1's group was excluded wholesale: the seeded record survives unchanged.
    let u1 = m.get_user_memories("u1").await.expect("u1");
    assert_eq!(u1.len(), 1);
    assert_eq!(u1[0].id, kept);
    assert_eq!(
        u1[0].content,
        "bob enjoys drinking strong coffee every single day"
    );
    m.shutdown().await;
}

/// A pipeline whose batch creation never completes.
struct HangingBatch;

#[async_trait]
impl MemoryPipeline for HangingBatch {
    async fn create_memory(
        &self,
        _content: &str,
        _user_id: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId> {
        Ok(MemoryId::new())
    }

    async fn update_memory(
        &self,
        _id: MemoryId,
        _content: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn delete_memory(&self, _id: MemoryId) -> Result<bool> {
        Ok(true)
    }

    async fn search_similar(
        &self,
        _query: &str,
        _user_id: &str,
        _limit: usize,
        _threshold: f64,
    ) -> Result<Vec<MemoryRecord>> {
        Ok(Vec::new())
    }

    async fn create_memories_batch(
        &self,
        _requests: Vec<CreationRequest>,
    ) -> Result<Vec<MemoryId>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn timed_out_batch_group_is_excluded_not_fatal() {
    let config = MnemoConfig::from_toml(
        r#"
        [lifecycle]
        batch_join_timeout_ms = 50
        "#,
    )
    .expect("valid toml");
    let m = ConcurrentMemoryManager::with_collaborators(
        config,
        Arc::new(HangingBatch),
        Arc::new(mnemo_core::pipeline::Unrestricted),
        Arc::new(NoopMonitor),
    );

    let ids = m
        .create_memories_batch(vec![CreationRequest::new(
            "a request the backend never answers",
            "u1",
        )])
        .await
        .expect("batch call itself succeeds");
    assert!(ids.is_empty());
    assert_eq!(m.stats().total_memories, 0);
    m.shutdown().await;
}

/// A pipeline whose similarity search returns canned records, including ones
/// the manager must filter out.
struct CannedSearch {
    results: Vec<MemoryRecord>,
}

#[async_trait]
impl MemoryPipeline for CannedSearch {
    async fn create_memory(
        &self,
        _content: &str,
        _user_id: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId> {
        Ok(MemoryId::new())
    }

    async fn update_memory(
        &self,
        _id: MemoryId,
        _content: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn delete_memory(&self, _id: MemoryId) -> Result<bool> {
        Ok(true)
    }

    async fn search_similar(
        &self,
        _query: &str,
        _user_id: &str,
        _limit: usize,
        _threshold: f64,
    ) -> Result<Vec<MemoryRecord>> {
        Ok(self.results.clone())
    }

    async fn create_memories_batch(
        &self,
        requests: Vec<CreationRequest>,
    ) -> Result<Vec<MemoryId>> {
        Ok(requests.iter().map(|_| MemoryId::new()).collect())
    }
}

#[tokio::test]
async fn search_filters_ownership_and_expiry_and_orders_by_recency() {
    let now = Utc::now();

    let mut old_hit = MemoryRecord::new("visited the coast last summer", "u1", no_meta());
    old_hit.last_accessed_at = now - chrono::Duration::hours(2);

    let mut fresh_hit = MemoryRecord::new("planning another coastal trip", "u1", no_meta());
    fresh_hit.last_accessed_at = now;

    let mut foreign = MemoryRecord::new("someone else's coastal memory", "u2", no_meta());
    foreign.last_accessed_at = now;

    let mut expired = MemoryRecord::new("a coastal memory from long ago", "u1", no_meta());
    expired.created_at = now - chrono::Duration::days(365);
    expired.last_accessed_at = now;

    let m = ConcurrentMemoryManager::with_collaborators(
        MnemoConfig::default(),
        Arc::new(CannedSearch {
            results: vec![old_hit.clone(), foreign, expired, fresh_hit.clone()],
        }),
        Arc::new(mnemo_core::pipeline::Unrestricted),
        Arc::new(NoopMonitor),
    );

    let results = m
        .search_similar_memories("coast", "u1", 10, 0.5)
        .await
        .expect("search");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, fresh_hit.id, "most recently accessed first");
    assert_eq!(results[1].id, old_hit.id);

    let limited = m
        .search_similar_memories("coast", "u1", 1, 0.5)
        .await
        .expect("search");
    assert_eq!(limited.len(), 1);
    m.shutdown().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn operations_after_shutdown_are_refused() {
    let m = manager();
    m.create_memory("stored before teardown", "u1", no_meta())
        .await
        .expect("create");
    m.shutdown().await;
    m.shutdown().await;

    assert!(matches!(
        m.create_memory("late arrival", "u1", no_meta()).await,
        Err(MnemoError::ShuttingDown)
    ));
    assert!(matches!(
        m.get_memory(MemoryId::new()).await,
        Err(MnemoError::ShuttingDown)
    ));
    assert_eq!(m.stats().total_memories, 0);
}
