//! Core type definitions for the mnemo memory store.
//!
//! All types are serializable; records cross the pipeline boundary and may be
//! echoed back by external backends.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique identifier for a memory record. Globally unique across all shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random memory ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MemoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Memory record
// ---------------------------------------------------------------------------

/// A single memory item owned by one user.
///
/// Created by the manager on a successful create, mutated in place on update
/// (content and metadata replaced, `updated_at` bumped), removed on delete or
/// TTL expiry. Once assigned to a shard by id-hash a record never moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Globally unique identifier.
    pub id: MemoryId,
    /// The memory content (required, never empty for stored records).
    pub content: String,
    /// Owning user (required).
    pub user_id: String,
    /// Creation time. Never changes after creation.
    pub created_at: DateTime<Utc>,
    /// Last update time. Bumped on every content/metadata change.
    pub updated_at: DateTime<Utc>,
    /// Last read time. A hint, not a correctness-critical value — concurrent
    /// readers race benignly on it (last writer wins).
    pub last_accessed_at: DateTime<Utc>,
    /// How many times this record has been read.
    pub access_count: u64,
    /// Free-form metadata attached by the caller.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl MemoryRecord {
    /// Create a fresh record with a random id and current timestamps.
    #[must_use]
    pub fn new(
        content: impl Into<String>,
        user_id: impl Into<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MemoryId::new(),
            content: content.into(),
            user_id: user_id.into(),
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata,
        }
    }

    /// Age of this record relative to `now`, in milliseconds.
    /// Clamps to zero for records with a future `created_at`.
    #[must_use]
    pub fn age_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.created_at).num_milliseconds().max(0) as u64
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// One entry of a batch creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationRequest {
    /// The content to store.
    pub content: String,
    /// Owning user.
    pub user_id: String,
    /// Metadata to attach.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CreationRequest {
    /// Create a request with empty metadata.
    #[must_use]
    pub fn new(content: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            user_id: user_id.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Filter criteria for the shard-level linear-scan search.
///
/// This is the fallback/diagnostic path; similarity search lives in the
/// external pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Restrict to one user's records.
    pub user_id: Option<String>,
    /// Match records whose content contains any keyword (case-insensitive).
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Only records created at or after this instant.
    pub created_after: Option<DateTime<Utc>>,
    /// Only records created at or before this instant.
    pub created_before: Option<DateTime<Utc>>,
    /// Exact-match metadata filters (all must match).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl SearchCriteria {
    /// Criteria matching everything for one user.
    #[must_use]
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Whether `record` passes every filter in this criteria set.
    #[must_use]
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        if let Some(user) = &self.user_id {
            if record.user_id != *user {
                return false;
            }
        }
        if !self.keywords.is_empty() {
            let content = record.content.to_lowercase();
            if !self
                .keywords
                .iter()
                .any(|k| content.contains(&k.to_lowercase()))
            {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if record.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if record.created_at > before {
                return false;
            }
        }
        for (key, value) in &self.metadata {
            if record.metadata.get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}
