//! Repository and collaborator traits forming the persistence boundary.
//!
//! The engine consumes read interfaces for profiles, history, vectors, and
//! popularity, and a write interface for recommendation sets. Concrete
//! implementations live in `liber-db`; the engine itself never touches
//! storage directly, which keeps the scoring paths pure and testable.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Book, ItemVector, PopularityScore, ReadingRecord, RecommendationSet, SimilarityMatrix,
    UserProfile,
};

/// Read access to user profiles and reading history.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// Get a user by id.
    async fn get(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Get a user by username.
    async fn get_by_username(&self, username: &str) -> Result<Option<UserProfile>>;

    /// All users with recommendations enabled.
    async fn list_all(&self) -> Result<Vec<UserProfile>>;

    /// Active users with recommendations enabled.
    async fn list_active(&self) -> Result<Vec<UserProfile>>;

    /// A user's reading history, most recently finished first.
    async fn history(&self, user_id: Uuid) -> Result<Vec<ReadingRecord>>;
}

/// Read/write access to the catalog and its derived feature vectors.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// All catalog items.
    async fn list_books(&self) -> Result<Vec<Book>>;

    /// The feature vector for one item, if computed.
    async fn item_vector(&self, book_id: Uuid) -> Result<Option<ItemVector>>;

    /// All computed feature vectors.
    async fn all_vectors(&self) -> Result<Vec<ItemVector>>;

    /// Replace the feature vector for one item.
    async fn upsert_vector(&self, vector: &ItemVector) -> Result<()>;

    /// Global popularity scores, normalized to [0,1].
    async fn popularity(&self) -> Result<Vec<PopularityScore>>;
}

/// Append-only persistence for recommendation output.
#[async_trait]
pub trait RecommendationRepository: Send + Sync {
    /// Persist a new recommendation set. Sets are immutable once written.
    async fn insert(&self, set: &RecommendationSet) -> Result<()>;

    /// Creation time of the user's most recent set, if any. Feeds the
    /// freshness policy.
    async fn latest_created_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>>;

    /// The user's most recent set, if any.
    async fn latest(&self, user_id: Uuid) -> Result<Option<RecommendationSet>>;
}

/// Durable storage for published similarity matrices.
///
/// The rebuild pipeline saves each published version; a starting process
/// loads the most recent one so content-based scoring works immediately
/// instead of waiting for the next scheduled rebuild.
#[async_trait]
pub trait SimilarityRepository: Send + Sync {
    /// Persist a published matrix under its version.
    async fn save(&self, matrix: &SimilarityMatrix) -> Result<()>;

    /// The most recently published matrix, if any.
    async fn load_latest(&self) -> Result<Option<SimilarityMatrix>>;
}

/// External collaborative-signal collaborator.
///
/// The contract is only that scores are in [0,1] per candidate; how the
/// backend aggregates overlapping-history behavior is its own business.
#[async_trait]
pub trait CollaborativeSignal: Send + Sync {
    /// Candidate scores for one user, keyed by book id. An empty map means
    /// the backend has no signal for this user (e.g. cold start).
    async fn scores_for(&self, user_id: Uuid) -> Result<HashMap<Uuid, f32>>;
}
