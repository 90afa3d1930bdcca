//! One partition of the memory keyspace.
//!
//! A shard owns a disjoint subset of records (selected by id-hash in the
//! manager) plus a secondary user→ids index restricted to its own records.
//! Both maps live behind one `parking_lot::RwLock`: mutations take the write
//! lock, reads take the read lock. The access-time bump inside [`MemoryShard::get`]
//! happens through per-record atomics so it stays on the read lock; the
//! resulting race is benign (the access time is a hint, last writer wins).
//!
//! Invariant: every id in the user index exists in the record map, and the
//! index is updated in the same critical section as the record map. A user's
//! index entry is removed when their last record in the shard goes away.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;

use crate::types::{MemoryId, MemoryRecord, SearchCriteria};

/// A record at rest inside a shard.
///
/// The cold fields live in `record`; the hot access metadata is atomic so
/// reads can bump it without the write lock.
struct StoredRecord {
    record: MemoryRecord,
    access_count: AtomicU64,
    last_accessed_ms: AtomicU64,
}

impl StoredRecord {
    fn new(record: MemoryRecord) -> Self {
        let access_count = AtomicU64::new(record.access_count);
        let last_accessed_ms =
            AtomicU64::new(record.last_accessed_at.timestamp_millis().max(0) as u64);
        Self {
            record,
            access_count,
            last_accessed_ms,
        }
    }

    /// Record the read in the atomic hot fields.
    fn touch(&self, now: DateTime<Utc>) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed_ms
            .store(now.timestamp_millis().max(0) as u64, Ordering::Relaxed);
    }

    /// Clone out a `MemoryRecord` with the hot fields folded back in.
    fn snapshot(&self) -> MemoryRecord {
        let mut record = self.record.clone();
        record.access_count = self.access_count.load(Ordering::Relaxed);
        record.last_accessed_at = millis_to_datetime(self.last_accessed_ms.load(Ordering::Relaxed));
        record
    }
}

struct ShardInner {
    records: HashMap<MemoryId, StoredRecord>,
    user_index: HashMap<String, HashSet<MemoryId>>,
}

/// Thread-safe CRUD and secondary indexing for one keyspace partition.
pub struct MemoryShard {
    id: usize,
    inner: RwLock<ShardInner>,
    memory_count: AtomicU64,
    total_accesses: AtomicU64,
    last_access_ms: AtomicU64,
}

impl MemoryShard {
    /// Create an empty shard with the given partition id.
    #[must_use]
    pub fn new(id: usize) -> Self {
        Self {
            id,
            inner: RwLock::new(ShardInner {
                records: HashMap::new(),
                user_index: HashMap::new(),
            }),
            memory_count: AtomicU64::new(0),
            total_accesses: AtomicU64::new(0),
            last_access_ms: AtomicU64::new(0),
        }
    }

    /// This shard's partition id.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.memory_count.load(Ordering::Relaxed)
    }

    /// Whether the shard holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Upsert a record by id.
    ///
    /// Inserting a brand-new id increments the live count; overwriting keeps
    /// it. The user index is updated in the same critical section, including
    /// the case where an upsert moves an id between users.
    pub fn add(&self, record: MemoryRecord) {
        let mut inner = self.inner.write();
        let id = record.id;
        let user_id = record.user_id.clone();

        if let Some(previous) = inner.records.get(&id) {
            let previous_user = previous.record.user_id.clone();
            if previous_user != user_id {
                remove_from_index(&mut inner.user_index, &previous_user, id);
            }
        } else {
            self.memory_count.fetch_add(1, Ordering::Relaxed);
        }

        inner.records.insert(id, StoredRecord::new(record));
        inner.user_index.entry(user_id).or_default().insert(id);
        drop(inner);
        self.record_access(Utc::now());
    }

    /// Fetch a record by id, bumping its access metadata as a side effect.
    /// Absent ids return `None`, never an error.
    #[must_use]
    pub fn get(&self, id: &MemoryId) -> Option<MemoryRecord> {
        let inner = self.inner.read();
        let stored = inner.records.get(id)?;
        let now = Utc::now();
        stored.touch(now);
        let snapshot = stored.snapshot();
        drop(inner);
        self.record_access(now);
        Some(snapshot)
    }

    /// Remove a record, returning it if it was present.
    ///
    /// Prunes the user's index entry when it becomes empty; the live count
    /// only drops when something was actually removed.
    pub fn remove(&self, id: &MemoryId) -> Option<MemoryRecord> {
        let mut inner = self.inner.write();
        let stored = inner.records.remove(id)?;
        remove_from_index(&mut inner.user_index, &stored.record.user_id, *id);
        self.memory_count.fetch_sub(1, Ordering::Relaxed);
        Some(stored.snapshot())
    }

    /// Snapshot all live records for one user. Touches access counters for
    /// every returned record; unknown users get an empty list.
    #[must_use]
    pub fn user_memories(&self, user_id: &str) -> Vec<MemoryRecord> {
        let inner = self.inner.read();
        let Some(ids) = inner.user_index.get(user_id) else {
            return Vec::new();
        };
        let now = Utc::now();
        let records: Vec<MemoryRecord> = ids
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|stored| {
                stored.touch(now);
                stored.snapshot()
            })
            .collect();
        drop(inner);
        if !records.is_empty() {
            self.record_access(now);
        }
        records
    }

    /// Full snapshot of the shard. Administrative/aggregation use only —
    /// O(shard size) and does not touch access counters.
    #[must_use]
    pub fn all_memories(&self) -> Vec<MemoryRecord> {
        let inner = self.inner.read();
        inner.records.values().map(StoredRecord::snapshot).collect()
    }

    /// Remove every record older than `ttl`, returning how many were removed.
    /// Safe to run concurrently with reads and writes (single write-lock pass).
    pub fn cleanup_expired(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let ttl_ms = ttl.as_millis().min(u128::from(u64::MAX)) as u64;
        let mut inner = self.inner.write();
        let expired: Vec<MemoryId> = inner
            .records
            .iter()
            .filter(|(_, stored)| stored.record.age_ms(now) > ttl_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if let Some(stored) = inner.records.remove(id) {
                remove_from_index(&mut inner.user_index, &stored.record.user_id, *id);
                self.memory_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
        expired.len()
    }

    /// Linear-scan search over this shard's records. Fallback/diagnostic
    /// path; does not touch access counters.
    #[must_use]
    pub fn search(&self, criteria: &SearchCriteria) -> Vec<MemoryRecord> {
        let limit = criteria.limit.unwrap_or(usize::MAX);
        let inner = self.inner.read();
        inner
            .records
            .values()
            .filter(|stored| criteria.matches(&stored.record))
            .take(limit)
            .map(StoredRecord::snapshot)
            .collect()
    }

    /// Compute a statistics snapshot for this shard.
    #[must_use]
    pub fn stats(&self) -> ShardStats {
        let now = Utc::now();
        let inner = self.inner.read();
        let count = inner.records.len();
        let total_age_ms: u128 = inner
            .records
            .values()
            .map(|stored| u128::from(stored.record.age_ms(now)))
            .sum();
        let mut histogram = UserHistogram::default();
        for ids in inner.user_index.values() {
            histogram.bump(ids.len());
        }
        let user_count = inner.user_index.len();
        drop(inner);

        let last_access_ms = self.last_access_ms.load(Ordering::Relaxed);
        ShardStats {
            shard_id: self.id,
            memory_count: count as u64,
            user_count: user_count as u64,
            total_accesses: self.total_accesses.load(Ordering::Relaxed),
            last_access: (last_access_ms > 0).then(|| millis_to_datetime(last_access_ms)),
            avg_age_ms: if count == 0 {
                0
            } else {
                (total_age_ms / count as u128) as u64
            },
            records_per_user: histogram,
        }
    }

    /// Drop every record and index entry. Used by manager shutdown.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.records.clear();
        inner.user_index.clear();
        self.memory_count.store(0, Ordering::Relaxed);
    }

    fn record_access(&self, now: DateTime<Utc>) {
        self.total_accesses.fetch_add(1, Ordering::Relaxed);
        self.last_access_ms
            .store(now.timestamp_millis().max(0) as u64, Ordering::Relaxed);
    }
}

fn remove_from_index(
    index: &mut HashMap<String, HashSet<MemoryId>>,
    user_id: &str,
    id: MemoryId,
) {
    if let Some(ids) = index.get_mut(user_id) {
        ids.remove(&id);
        if ids.is_empty() {
            index.remove(user_id);
        }
    }
}

fn millis_to_datetime(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time statistics for one shard.
#[derive(Debug, Clone)]
pub struct ShardStats {
    /// Partition id.
    pub shard_id: usize,
    /// Live record count.
    pub memory_count: u64,
    /// Distinct users with at least one record here.
    pub user_count: u64,
    /// Total read/write accesses since creation.
    pub total_accesses: u64,
    /// When the shard was last touched, if ever.
    pub last_access: Option<DateTime<Utc>>,
    /// Mean record age in milliseconds.
    pub avg_age_ms: u64,
    /// Distribution of records-per-user.
    pub records_per_user: UserHistogram,
}

/// Histogram of how many records each user holds in this shard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserHistogram {
    /// Users with exactly one record.
    pub one: u64,
    /// Users with 2–5 records.
    pub two_to_five: u64,
    /// Users with 6–10 records.
    pub six_to_ten: u64,
    /// Users with 11–50 records.
    pub eleven_to_fifty: u64,
    /// Users with 51–100 records.
    pub fifty_one_to_hundred: u64,
    /// Users with more than 100 records.
    pub over_hundred: u64,
}

impl UserHistogram {
    fn bump(&mut self, records: usize) {
        match records {
            0 => {}
            1 => self.one += 1,
            2..=5 => self.two_to_five += 1,
            6..=10 => self.six_to_ten += 1,
            11..=50 => self.eleven_to_fifty += 1,
            51..=100 => self.fifty_one_to_hundred += 1,
            _ => self.over_hundred += 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn record(content: &str, user: &str) -> MemoryRecord {
        MemoryRecord::new(content, user, StdHashMap::new())
    }

    #[test]
    fn add_then_get_round_trips() {
        let shard = MemoryShard::new(0);
        let rec = record("hello", "u1");
        let id = rec.id;
        shard.add(rec);

        let fetched = shard.get(&id).expect("present");
        assert_eq!(fetched.content, "hello");
        assert_eq!(fetched.user_id, "u1");
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn get_bumps_access_count() {
        let shard = MemoryShard::new(0);
        let rec = record("hello", "u1");
        let id = rec.id;
        shard.add(rec);

        shard.get(&id);
        shard.get(&id);
        let fetched = shard.get(&id).expect("present");
        assert_eq!(fetched.access_count, 3);
    }

    #[test]
    fn get_missing_returns_none() {
        let shard = MemoryShard::new(0);
        assert!(shard.get(&MemoryId::new()).is_none());
    }

    #[test]
    fn upsert_does_not_double_count() {
        let shard = MemoryShard::new(0);
        let rec = record("v1", "u1");
        let id = rec.id;
        shard.add(rec.clone());

        let mut updated = rec;
        updated.content = "v2".to_string();
        shard.add(updated);

        assert_eq!(shard.len(), 1);
        assert_eq!(shard.get(&id).expect("present").content, "v2");
    }

    #[test]
    fn upsert_moving_user_reindexes() {
        let shard = MemoryShard::new(0);
        let rec = record("content", "u1");
        let id = rec.id;
        shard.add(rec.clone());

        let mut moved = rec;
        moved.user_id = "u2".to_string();
        shard.add(moved);

        assert!(shard.user_memories("u1").is_empty());
        let u2 = shard.user_memories("u2");
        assert_eq!(u2.len(), 1);
        assert_eq!(u2[0].id, id);
    }

    #[test]
    fn remove_returns_record_and_prunes_index() {
        let shard = MemoryShard::new(0);
        let rec = record("bye", "u1");
        let id = rec.id;
        shard.add(rec);

        let removed = shard.remove(&id).expect("was present");
        assert_eq!(removed.content, "bye");
        assert_eq!(shard.len(), 0);
        assert!(shard.user_memories("u1").is_empty());
        assert_eq!(shard.stats().user_count, 0);
    }

    #[test]
    fn remove_absent_is_noop() {
        let shard = MemoryShard::new(0);
        let rec = record("keep", "u1");
        shard.add(rec);

        assert!(shard.remove(&MemoryId::new()).is_none());
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn user_index_survives_partial_removal() {
        let shard = MemoryShard::new(0);
        let first = record("one", "u1");
        let second = record("two", "u1");
        let first_id = first.id;
        shard.add(first);
        shard.add(second);

        shard.remove(&first_id);
        let remaining = shard.user_memories("u1");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].content, "two");
    }

    #[test]
    fn cleanup_removes_only_expired() {
        let shard = MemoryShard::new(0);
        let mut old = record("ancient", "u1");
        old.created_at = Utc::now() - chrono::Duration::days(2);
        let old_id = old.id;
        let fresh = record("fresh", "u1");
        let fresh_id = fresh.id;
        shard.add(old);
        shard.add(fresh);

        let removed = shard.cleanup_expired(Duration::from_secs(24 * 3600));
        assert_eq!(removed, 1);
        assert!(shard.get(&old_id).is_none());
        assert!(shard.get(&fresh_id).is_some());
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn search_applies_all_filters() {
        let shard = MemoryShard::new(0);
        shard.add(record("I enjoy hiking in the alps", "u1"));
        shard.add(record("grocery list: milk and eggs", "u1"));
        shard.add(record("I enjoy hiking in the andes", "u2"));

        let criteria = SearchCriteria {
            user_id: Some("u1".to_string()),
            keywords: vec!["hiking".to_string()],
            ..SearchCriteria::default()
        };
        let results = shard.search(&criteria);
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("alps"));
    }

    #[test]
    fn search_respects_limit() {
        let shard = MemoryShard::new(0);
        for i in 0..10 {
            shard.add(record(&format!("note number {i}"), "u1"));
        }
        let criteria = SearchCriteria {
            limit: Some(3),
            ..SearchCriteria::default()
        };
        assert_eq!(shard.search(&criteria).len(), 3);
    }

    #[test]
    fn stats_histogram_buckets() {
        let shard = MemoryShard::new(7);
        shard.add(record("solo", "single"));
        for i in 0..4 {
            shard.add(record(&format!("note {i}"), "quad"));
        }
        for i in 0..12 {
            shard.add(record(&format!("note {i}"), "dozen"));
        }

        let stats = shard.stats();
        assert_eq!(stats.shard_id, 7);
        assert_eq!(stats.memory_count, 17);
        assert_eq!(stats.user_count, 3);
        assert_eq!(stats.records_per_user.one, 1);
        assert_eq!(stats.records_per_user.two_to_five, 1);
        assert_eq!(stats.records_per_user.eleven_to_fifty, 1);
        assert!(stats.last_access.is_some());
    }

    #[test]
    fn concurrent_reads_and_writes_keep_counts_consistent() {
        use std::sync::Arc;
        let shard = Arc::new(MemoryShard::new(0));
        let mut handles = Vec::new();
        for t in 0..8 {
            let shard = Arc::clone(&shard);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    shard.add(record(&format!("thread {t} note {i}"), &format!("u{t}")));
                }
                shard.user_memories(&format!("u{t}")).len()
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().expect("no panic"), 50);
        }
        assert_eq!(shard.len(), 400);
        assert_eq!(shard.stats().user_count, 8);
    }
}
