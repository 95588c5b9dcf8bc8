//! Core data model for the recommendation engine and scheduler.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// USERS & HISTORY
// =============================================================================

/// A platform user as seen by the recommendation engine.
///
/// Owned by the user-management collaborator; the engine reads it and never
/// mutates identity fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    /// Whether the account is active on the platform.
    pub active: bool,
    /// Whether the user has opted into recommendation generation.
    pub recommendations_enabled: bool,
    /// Per-user hybrid weight overrides (JSONB in storage).
    pub weight_overrides: Option<HybridWeights>,
    pub created_at: DateTime<Utc>,
}

/// One consumed item in a user's reading history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingRecord {
    pub user_id: Uuid,
    pub book_id: Uuid,
    pub finished_at: DateTime<Utc>,
    /// Optional 0.0-5.0 star rating.
    pub rating: Option<f32>,
}

// =============================================================================
// CATALOG
// =============================================================================

/// A catalog item eligible for recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    /// Subject/tag labels used for content vectorization.
    pub subjects: Vec<String>,
    pub published_at: DateTime<Utc>,
}

/// A numeric feature vector for one catalog item.
///
/// Recomputed on a schedule by the similarity pipeline; treated as a
/// replaceable cache, not authoritative data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemVector {
    pub book_id: Uuid,
    pub vector: Vec<f32>,
    pub updated_at: DateTime<Utc>,
}

/// Global popularity signal for one item (recent completions/interactions),
/// identical for all users at a point in time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PopularityScore {
    pub book_id: Uuid,
    /// Normalized to [0,1] relative to the most popular item.
    pub score: f32,
}

// =============================================================================
// SIMILARITY MATRIX
// =============================================================================

/// Sparse item-item similarity scores, rebuilt wholesale on a schedule.
///
/// Pair keys are normalized (smaller UUID first) so `(a, b)` and `(b, a)`
/// address the same entry. Read-only once built; publication swaps whole
/// versions atomically so readers never observe a partial matrix.
#[derive(Debug, Clone, Default)]
pub struct SimilarityMatrix {
    /// Monotonically increasing version, assigned at publication.
    pub version: u64,
    pub built_at: Option<DateTime<Utc>>,
    scores: HashMap<(Uuid, Uuid), f32>,
}

impl SimilarityMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a pair key so lookups are order-independent.
    fn key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// Record the similarity for an item pair. Scores are clamped to [0,1].
    pub fn insert(&mut self, a: Uuid, b: Uuid, score: f32) {
        self.scores.insert(Self::key(a, b), score.clamp(0.0, 1.0));
    }

    /// Similarity for an item pair, if recorded.
    pub fn get(&self, a: Uuid, b: Uuid) -> Option<f32> {
        self.scores.get(&Self::key(a, b)).copied()
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Iterate over all recorded pairs with their scores. Keys come out
    /// normalized (smaller UUID first).
    pub fn iter(&self) -> impl Iterator<Item = (Uuid, Uuid, f32)> + '_ {
        self.scores.iter().map(|(&(a, b), &score)| (a, b, score))
    }
}

// =============================================================================
// RECOMMENDATION SETS
// =============================================================================

/// One recommended item with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub book_id: Uuid,
    pub score: f32,
}

/// The output entity of a generation run. Immutable once created; a new
/// generation creates a new set rather than mutating an old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub algorithm: Algorithm,
    /// Ordered by score descending.
    pub entries: Vec<ScoredItem>,
    /// Generation context label ("daily_batch", "on_demand", ...).
    pub context: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// ALGORITHMS & WEIGHTS
// =============================================================================

/// Recommendation algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    ContentBased,
    Collaborative,
    Popularity,
    Hybrid,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::ContentBased => "content_based",
            Algorithm::Collaborative => "collaborative",
            Algorithm::Popularity => "popularity",
            Algorithm::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "content_based" => Ok(Algorithm::ContentBased),
            "collaborative" => Ok(Algorithm::Collaborative),
            "popularity" => Ok(Algorithm::Popularity),
            "hybrid" => Ok(Algorithm::Hybrid),
            other => Err(Error::InvalidAlgorithm(other.to_string())),
        }
    }
}

/// Tolerance for validating that hybrid weights sum to 1.0.
pub const WEIGHT_SUM_TOLERANCE: f32 = 1e-6;

/// Strategy weights for the hybrid algorithm, expected to sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HybridWeights {
    pub content: f32,
    pub collaborative: f32,
    pub popularity: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            content: 0.4,
            collaborative: 0.4,
            popularity: 0.2,
        }
    }
}

impl HybridWeights {
    /// Validate that the weights are non-negative and sum to 1.0 ± 1e-6.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.content < 0.0 || self.collaborative < 0.0 || self.popularity < 0.0 {
            return Err(Error::InvalidInput(
                "hybrid weights must be non-negative".to_string(),
            ));
        }
        let sum = self.content + self.collaborative + self.popularity;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::InvalidInput(format!(
                "hybrid weights must sum to 1.0 (got {sum})"
            )));
        }
        Ok(())
    }

    /// Redistribute the weight of absent strategies proportionally among the
    /// remaining ones.
    ///
    /// A strategy that yields no candidates keeps no weight; its share is
    /// split among the participating strategies in proportion to their
    /// configured weights, so the effective weights still sum to 1.0.
    /// Returns `None` when no participating strategy carries weight.
    pub fn redistribute(
        &self,
        has_content: bool,
        has_collaborative: bool,
        has_popularity: bool,
    ) -> Option<HybridWeights> {
        let content = if has_content { self.content } else { 0.0 };
        let collaborative = if has_collaborative {
            self.collaborative
        } else {
            0.0
        };
        let popularity = if has_popularity { self.popularity } else { 0.0 };

        let remaining = content + collaborative + popularity;
        if remaining <= 0.0 {
            return None;
        }

        Some(HybridWeights {
            content: content / remaining,
            collaborative: collaborative / remaining,
            popularity: popularity / remaining,
        })
    }
}

// =============================================================================
// QUEUES & TASKS
// =============================================================================

/// Named queues of the scheduler. Fixed and small; queues are processed
/// independently so backlog on one never blocks another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Interactive and batch recommendation generation.
    Recommendations,
    /// Similarity matrix rebuilds and other O(n²) work.
    HeavyComputation,
    Analytics,
    Maintenance,
    Notifications,
    Monitoring,
    /// Fallback for unrouted task names.
    Default,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Recommendations => "recommendations",
            QueueName::HeavyComputation => "heavy_computation",
            QueueName::Analytics => "analytics",
            QueueName::Maintenance => "maintenance",
            QueueName::Notifications => "notifications",
            QueueName::Monitoring => "monitoring",
            QueueName::Default => "default",
        }
    }

    /// All queues, in a stable order.
    pub const ALL: [QueueName; 7] = [
        QueueName::Recommendations,
        QueueName::HeavyComputation,
        QueueName::Analytics,
        QueueName::Maintenance,
        QueueName::Notifications,
        QueueName::Monitoring,
        QueueName::Default,
    ];
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    /// Failed with retries remaining; re-queued after the retry delay.
    FailedRetryable,
    /// Failed with no retries remaining; surfaced for operator visibility.
    FailedTerminal,
}

/// A task instance inside the scheduler. Ephemeral: created at submission,
/// consumed and discarded by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Registered task name, e.g. `recommendations.generate_user`.
    pub name: String,
    pub queue: QueueName,
    /// 1-9; higher runs first when multiple tasks are ready on one queue.
    pub priority: u8,
    pub payload: JsonValue,
    pub retry_count: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Delayed visibility for retries; workers skip the task until then.
    pub not_before: Option<DateTime<Utc>>,
}

impl Task {
    /// Whether the task is visible to workers at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }
}

/// Token-bucket rate limit for one task type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum invocations per period (bucket capacity).
    pub max_calls: u32,
    /// Refill period.
    pub per: Duration,
}

impl RateLimit {
    pub fn per_minute(max_calls: u32) -> Self {
        Self {
            max_calls,
            per: Duration::from_secs(60),
        }
    }

    pub fn per_hour(max_calls: u32) -> Self {
        Self {
            max_calls,
            per: Duration::from_secs(3600),
        }
    }
}
