//! Semantic conflict detection and resolution between memory contents.
//!
//! A pure, stateless function library — safe to share across all shards
//! without locking. Runs on the hot write path, so it never errors:
//! null-ish/short inputs degrade to "not similar" instead of failing the
//! request.
//!
//! Similarity is Jaccard over lowercased, stop-word-filtered token sets
//! (English and Chinese). The strategy enum is exhaustively matched at every
//! call site in the manager.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::ConflictConfig;
use crate::types::{MemoryId, MemoryRecord};

// ---------------------------------------------------------------------------
// Resolution types
// ---------------------------------------------------------------------------

/// What to do about a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStrategy {
    /// Combine the new and existing content into one record.
    Merge,
    /// Discard the existing record in favor of the new content.
    Replace,
    /// Keep the existing record; the new content adds nothing.
    Ignore,
    /// No real conflict — store the new content as its own record.
    CreateNew,
}

/// How two contents relate, as classified by similarity and shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictType {
    /// Near-identical content (similarity > 0.95).
    Duplicate,
    /// Same topic with changed details.
    SimilarWithUpdates,
    /// One side negates the other.
    Contradictory,
    /// One side asks, the other answers.
    Complementary,
    /// Unrelated content (similarity ≤ 0.70).
    Different,
}

/// The outcome of conflict resolution, consumed by the manager before a
/// write. Transient — cached briefly by fingerprint but never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// The chosen strategy.
    pub strategy: ConflictStrategy,
    /// The existing record this resolution refers to, when one is involved.
    pub existing_memory_id: Option<MemoryId>,
    /// Content to store when the strategy is `Merge` (or the surviving
    /// content for `Ignore`/`Replace`).
    pub merged_content: String,
}

impl ConflictResolution {
    /// A resolution that stores the new content untouched.
    #[must_use]
    pub fn create_new(content: &str) -> Self {
        Self {
            strategy: ConflictStrategy::CreateNew,
            existing_memory_id: None,
            merged_content: content.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Classification thresholds
// ---------------------------------------------------------------------------

/// Above this similarity two contents are duplicates.
const DUPLICATE_THRESHOLD: f64 = 0.95;
/// Below (or at) this similarity two contents are simply different.
const DIFFERENT_THRESHOLD: f64 = 0.70;
/// Below this similarity an update is always meaningful enough to replace.
const UPDATE_REPLACE_SIMILARITY: f64 = 0.80;
/// Length ratio bounds within which an update is a minor edit.
const UPDATE_RATIO_BOUNDS: (f64, f64) = (0.5, 2.0);

/// English stop words dropped before similarity scoring.
const STOP_WORDS_EN: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "am", "i",
    "me", "my", "we", "our", "you", "your", "he", "she", "it", "they", "them",
    "of", "to", "in", "on", "at", "for", "with", "and", "or", "but", "as",
    "by", "that", "this", "these", "those", "do", "does", "did", "have",
    "has", "had", "will", "would", "can", "could", "so", "very",
];

/// Chinese stop words dropped before similarity scoring.
const STOP_WORDS_ZH: &[&str] = &[
    "的", "了", "是", "我", "你", "他", "她", "它", "们", "在", "有", "和",
    "就", "都", "而", "及", "与", "这", "那", "也", "很", "到", "说", "要",
    "去", "会", "着", "没", "看", "好", "自", "己", "过",
];

/// Tokens that flag a negated statement (for contradiction detection).
const NEGATION_TOKENS_EN: &[&str] = &[
    "not", "no", "never", "none", "neither", "nor", "cannot", "can't",
    "don't", "doesn't", "didn't", "won't", "isn't", "aren't", "wasn't",
];

/// Chinese negation markers (substring match against the raw content).
const NEGATION_MARKERS_ZH: &[&str] = &["不", "没有", "从不", "并非", "无法"];

/// Interrogative lead words (for question/answer detection).
const QUESTION_WORDS_EN: &[&str] = &[
    "what", "who", "where", "when", "why", "how", "which", "whose",
];

/// Chinese question markers (substring match against the raw content).
const QUESTION_MARKERS_ZH: &[&str] = &["吗", "呢", "什么", "为什么", "怎么", "哪里", "谁"];

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Stateless similarity scoring and conflict-strategy selection.
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    config: ConflictConfig,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(ConflictConfig::default())
    }
}

impl ConflictResolver {
    /// Create a resolver with the given thresholds.
    #[must_use]
    pub fn new(config: ConflictConfig) -> Self {
        Self { config }
    }

    /// Jaccard similarity of the two contents' token sets, in [0, 1].
    ///
    /// Identical strings score 1.0 regardless of length; two empty token
    /// sets score 0.0 (nothing in common is claimable).
    #[must_use]
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        if a == b && !a.is_empty() {
            return 1.0;
        }
        let tokens_a = tokenize(a);
        let tokens_b = tokenize(b);
        if tokens_a.is_empty() || tokens_b.is_empty() {
            return 0.0;
        }
        let intersection = tokens_a.intersection(&tokens_b).count();
        let union = tokens_a.union(&tokens_b).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }

    /// Whether two contents are close enough to be treated as a conflict.
    ///
    /// Exact equality always matches; contents shorter than the configured
    /// minimum never match; otherwise Jaccard vs the similarity threshold.
    /// Symmetric: `is_similar_content(a, b) == is_similar_content(b, a)`.
    #[must_use]
    pub fn is_similar_content(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }
        if a.chars().count() < self.config.min_content_len
            || b.chars().count() < self.config.min_content_len
        {
            return false;
        }
        self.similarity(a, b) >= self.config.similarity_threshold
    }

    /// Classify the relationship between a candidate and an existing content.
    #[must_use]
    pub fn analyze_conflict_type(&self, new: &str, existing: &str) -> ConflictType {
        let similarity = self.similarity(new, existing);
        if similarity > DUPLICATE_THRESHOLD {
            return ConflictType::Duplicate;
        }
        if similarity <= DIFFERENT_THRESHOLD {
            return ConflictType::Different;
        }
        // Mid-band: shape decides.
        let new_negated = has_negation(new);
        let existing_negated = has_negation(existing);
        if new_negated != existing_negated {
            return ConflictType::Contradictory;
        }
        if is_question(new) != is_question(existing) {
            return ConflictType::Complementary;
        }
        ConflictType::SimilarWithUpdates
    }

    /// Decide what to do when a create collides with an existing record.
    #[must_use]
    pub fn resolve_creation_conflict(
        &self,
        new_content: &str,
        user_id: &str,
        existing: &MemoryRecord,
    ) -> ConflictResolution {
        let conflict_type = self.analyze_conflict_type(new_content, &existing.content);
        tracing::debug!(
            user_id,
            existing_id = %existing.id,
            ?conflict_type,
            "resolving creation conflict"
        );
        match conflict_type {
            ConflictType::Duplicate => ConflictResolution {
                strategy: ConflictStrategy::Ignore,
                existing_memory_id: Some(existing.id),
                merged_content: existing.content.clone(),
            },
            ConflictType::SimilarWithUpdates => ConflictResolution {
                strategy: ConflictStrategy::Merge,
                existing_memory_id: Some(existing.id),
                merged_content: merge_token_union(&existing.content, new_content),
            },
            ConflictType::Complementary => ConflictResolution {
                strategy: ConflictStrategy::Merge,
                existing_memory_id: Some(existing.id),
                merged_content: format!("{}\n[related] {new_content}", existing.content),
            },
            ConflictType::Contradictory => {
                // Heuristic for "more recent information": longer text wins.
                if new_content.chars().count() > existing.content.chars().count() {
                    ConflictResolution {
                        strategy: ConflictStrategy::Replace,
                        existing_memory_id: Some(existing.id),
                        merged_content: new_content.to_string(),
                    }
                } else {
                    ConflictResolution {
                        strategy: ConflictStrategy::Ignore,
                        existing_memory_id: Some(existing.id),
                        merged_content: existing.content.clone(),
                    }
                }
            }
            ConflictType::Different => ConflictResolution::create_new(new_content),
        }
    }

    /// Decide what to do when an update collides with the record's current
    /// content: replace on a meaningful rewrite, merge on a minor edit.
    #[must_use]
    pub fn resolve_update_conflict(
        &self,
        id: MemoryId,
        new_content: &str,
        existing: &MemoryRecord,
    ) -> ConflictResolution {
        let new_len = new_content.chars().count().max(1) as f64;
        let existing_len = existing.content.chars().count().max(1) as f64;
        let ratio = new_len / existing_len;
        let similarity = self.similarity(new_content, &existing.content);

        let meaningful = ratio < UPDATE_RATIO_BOUNDS.0
            || ratio > UPDATE_RATIO_BOUNDS.1
            || similarity < UPDATE_REPLACE_SIMILARITY;

        if meaningful {
            ConflictResolution {
                strategy: ConflictStrategy::Replace,
                existing_memory_id: Some(id),
                merged_content: new_content.to_string(),
            }
        } else {
            ConflictResolution {
                strategy: ConflictStrategy::Merge,
                existing_memory_id: Some(id),
                merged_content: merge_append_unique(&existing.content, new_content),
            }
        }
    }

    /// Resolve a batch of candidate contents against a set of existing
    /// memories. Each candidate is matched to its most similar existing
    /// record; only matches clearing the similarity threshold are treated as
    /// conflicts.
    ///
    /// O(candidates × existing); both sides are bounded by caller limits.
    #[must_use]
    pub fn resolve_batch_conflicts(
        &self,
        new_contents: &[String],
        user_id: &str,
        existing_memories: &[MemoryRecord],
    ) -> Vec<ConflictResolution> {
        new_contents
            .iter()
            .map(|content| {
                let best = existing_memories
                    .iter()
                    .map(|record| (self.similarity(content, &record.content), record))
                    .max_by(|(a, _), (b, _)| {
                        a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                    });
                match best {
                    Some((similarity, record))
                        if similarity >= self.config.similarity_threshold =>
                    {
                        self.resolve_creation_conflict(content, user_id, record)
                    }
                    _ => ConflictResolution::create_new(content),
                }
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Lowercased, stop-word-filtered token set.
///
/// Latin-script runs split on non-alphanumeric boundaries; CJK characters
/// are taken as single-character tokens (no whitespace segmentation exists).
fn tokenize(text: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    let mut current = String::new();
    for ch in text.chars() {
        if is_cjk(ch) {
            if !current.is_empty() {
                push_token(&mut tokens, &current);
                current.clear();
            }
            push_token(&mut tokens, &ch.to_string());
        } else if ch.is_alphanumeric() || ch == '\'' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            push_token(&mut tokens, &current);
            current.clear();
        }
    }
    if !current.is_empty() {
        push_token(&mut tokens, &current);
    }
    tokens
}

fn push_token(tokens: &mut HashSet<String>, token: &str) {
    if STOP_WORDS_EN.contains(&token) || STOP_WORDS_ZH.contains(&token) {
        return;
    }
    tokens.insert(token.to_string());
}

/// CJK Unified Ideographs (basic plane plus extension A).
fn is_cjk(ch: char) -> bool {
    matches!(ch, '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}')
}

/// Whether the content carries a negation-style token.
fn has_negation(content: &str) -> bool {
    let lower = content.to_lowercase();
    if NEGATION_MARKERS_ZH.iter().any(|m| lower.contains(m)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .any(|word| NEGATION_TOKENS_EN.contains(&word))
}

/// Whether the content looks like a question.
fn is_question(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.ends_with('?') || trimmed.ends_with('？') {
        return true;
    }
    if QUESTION_MARKERS_ZH.iter().any(|m| trimmed.contains(m)) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    QUESTION_WORDS_EN
        .iter()
        .any(|w| lower.starts_with(w) && lower[w.len()..].starts_with([' ', '\'']))
}

/// Merge by token union: the existing content followed by whichever words of
/// the new content it does not already contain, in their original order.
fn merge_token_union(existing: &str, new: &str) -> String {
    let existing_tokens = tokenize(existing);
    let mut merged = existing.trim_end().to_string();
    let mut appended = HashSet::new();
    for word in new.split_whitespace() {
        let key: String = word
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();
        if key.is_empty()
            || STOP_WORDS_EN.contains(&key.as_str())
            || STOP_WORDS_ZH.contains(&key.as_str())
            || existing_tokens.contains(&key)
            || !appended.insert(key)
        {
            continue;
        }
        merged.push(' ');
        merged.push_str(word);
    }
    merged
}

/// Merge for minor updates: append the sentences of the new content that the
/// existing content does not already include.
fn merge_append_unique(existing: &str, new: &str) -> String {
    let mut merged = existing.trim_end().to_string();
    for sentence in new.split(['.', '!', '?', '。', '！', '？']) {
        let sentence = sentence.trim();
        if sentence.is_empty() || existing.contains(sentence) {
            continue;
        }
        if !merged.is_empty() {
            merged.push_str(". ");
        }
        merged.push_str(sentence);
    }
    merged
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
