//! External collaborator boundaries.
//!
//! The manager delegates every persistence/embedding mutation to a
//! [`MemoryPipeline`], gates every public operation through a
//! [`ConcurrencyController`], and reports timings to a [`PerformanceMonitor`].
//! All three are independently-synchronized collaborators: the manager never
//! wraps them in its own locking, never retries a rejection internally, and
//! never requires the monitor for correctness.
//!
//! In-process defaults ([`LocalPipeline`], [`Unrestricted`], [`NoopMonitor`])
//! keep the store usable without any external backend and carry the test
//! suite.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{CreationRequest, MemoryId, MemoryRecord};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// The persistence/embedding backend.
///
/// All operations are asynchronous and may take arbitrary time; failures
/// surface as `Err`, never as a panic crossing the manager boundary. The
/// manager mutates shards and caches strictly *after* a pipeline call
/// resolves successfully.
#[async_trait]
pub trait MemoryPipeline: Send + Sync {
    /// Persist a new memory, returning its assigned id.
    async fn create_memory(
        &self,
        content: &str,
        user_id: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<MemoryId>;

    /// Persist new content/metadata for an existing memory.
    async fn update_memory(
        &self,
        id: MemoryId,
        content: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<bool>;

    /// Delete a memory. Deleting an unknown id is a successful no-op.
    async fn delete_memory(&self, id: MemoryId) -> Result<bool>;

    /// Rank stored memories by similarity to `query`.
    async fn search_similar(
        &self,
        query: &str,
        user_id: &str,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<MemoryRecord>>;

    /// Persist a batch of memories for one user group, returning ids in
    /// request order.
    async fn create_memories_batch(
        &self,
        requests: Vec<CreationRequest>,
    ) -> Result<Vec<MemoryId>>;
}

/// Admission control applied before any public operation runs.
///
/// `admit` may delay (queueing/throttling) or reject; a rejection is
/// propagated to the caller unchanged as [`crate::MnemoError::Rejected`].
#[async_trait]
pub trait ConcurrencyController: Send + Sync {
    /// Gate one operation. Returning `Ok(())` admits it.
    async fn admit(&self, routing_key: &str, operation: &str) -> Result<()>;
}

/// Observability hooks around every public operation. Purely advisory —
/// implementations must never affect control flow.
pub trait PerformanceMonitor: Send + Sync {
    /// Count one occurrence of `counter`.
    fn increment(&self, counter: &str);
    /// Record how long `operation` took.
    fn record_duration(&self, operation: &str, elapsed: Duration);
}

// ---------------------------------------------------------------------------
// In-process defaults
// ---------------------------------------------------------------------------

/// A pipeline with no external backend: ids are allocated locally, mutations
/// always succeed, and similarity search returns nothing (ranking requires a
/// real vector backend).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPipeline;

#[async_trait]
impl MemoryPipeline for LocalPipeline {
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
        requests: Vec<CreationRequest>,
    ) -> Result<Vec<MemoryId>> {
        Ok(requests.iter().map(|_| MemoryId::new()).collect())
    }
}

/// A controller that admits everything immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unrestricted;

#[async_trait]
impl ConcurrencyController for Unrestricted {
    async fn admit(&self, _routing_key: &str, _operation: &str) -> Result<()> {
        Ok(())
    }
}

/// A monitor that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl PerformanceMonitor for NoopMonitor {
    fn increment(&self, _counter: &str) {}
    fn record_duration(&self, _operation: &str, _elapsed: Duration) {}
}
