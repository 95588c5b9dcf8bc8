//! In-memory repository implementations for deterministic testing.
//!
//! Always compiled (not gated behind `cfg(test)`) so dependent crates can
//! use them from their own unit and integration tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use liber_core::{
    Book, CatalogRepository, ItemVector, PopularityScore, ProfileRepository, ReadingRecord,
    RecommendationRepository, RecommendationSet, Result, SimilarityMatrix, SimilarityRepository,
    UserProfile,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory [`ProfileRepository`].
#[derive(Default)]
pub struct MemoryProfileRepository {
    users: Mutex<HashMap<Uuid, UserProfile>>,
    history: Mutex<Vec<ReadingRecord>>,
}

impl MemoryProfileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserProfile) {
        lock(&self.users).insert(user.id, user);
    }

    pub fn add_history(&self, record: ReadingRecord) {
        lock(&self.history).push(record);
    }
}

#[async_trait]
impl ProfileRepository for MemoryProfileRepository {
    async fn get(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        Ok(lock(&self.users).get(&user_id).cloned())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        Ok(lock(&self.users)
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<UserProfile>> {
        let mut users: Vec<UserProfile> = lock(&self.users)
            .values()
            .filter(|u| u.recommendations_enabled)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn list_active(&self) -> Result<Vec<UserProfile>> {
        let mut users: Vec<UserProfile> = lock(&self.users)
            .values()
            .filter(|u| u.active && u.recommendations_enabled)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.created_at);
        Ok(users)
    }

    async fn history(&self, user_id: Uuid) -> Result<Vec<ReadingRecord>> {
        let mut records: Vec<ReadingRecord> = lock(&self.history)
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        Ok(records)
    }
}

/// In-memory [`CatalogRepository`].
#[derive(Default)]
pub struct MemoryCatalogRepository {
    books: Mutex<HashMap<Uuid, Book>>,
    vectors: Mutex<HashMap<Uuid, ItemVector>>,
    popularity: Mutex<Vec<PopularityScore>>,
}

impl MemoryCatalogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_book(&self, book: Book) {
        lock(&self.books).insert(book.id, book);
    }

    pub fn set_popularity(&self, scores: Vec<PopularityScore>) {
        *lock(&self.popularity) = scores;
    }
}

#[async_trait]
impl CatalogRepository for MemoryCatalogRepository {
    async fn list_books(&self) -> Result<Vec<Book>> {
        let mut books: Vec<Book> = lock(&self.books).values().cloned().collect();
        books.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(books)
    }

    async fn item_vector(&self, book_id: Uuid) -> Result<Option<ItemVector>> {
        Ok(lock(&self.vectors).get(&book_id).cloned())
    }

    async fn all_vectors(&self) -> Result<Vec<ItemVector>> {
        let mut vectors: Vec<ItemVector> = lock(&self.vectors).values().cloned().collect();
        vectors.sort_by_key(|v| v.book_id);
        Ok(vectors)
    }

    async fn upsert_vector(&self, vector: &ItemVector) -> Result<()> {
        lock(&self.vectors).insert(vector.book_id, vector.clone());
        Ok(())
    }

    async fn popularity(&self) -> Result<Vec<PopularityScore>> {
        Ok(lock(&self.popularity).clone())
    }
}

/// In-memory [`RecommendationRepository`].
#[derive(Default)]
pub struct MemoryRecommendationRepository {
    sets: Mutex<Vec<RecommendationSet>>,
}

impl MemoryRecommendationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted sets for one user (test assertion helper).
    pub fn count_for(&self, user_id: Uuid) -> usize {
        lock(&self.sets)
            .iter()
            .filter(|s| s.user_id == user_id)
            .count()
    }
}

#[async_trait]
impl RecommendationRepository for MemoryRecommendationRepository {
    async fn insert(&self, set: &RecommendationSet) -> Result<()> {
        lock(&self.sets).push(set.clone());
        Ok(())
    }

    async fn latest_created_at(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(lock(&self.sets)
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.created_at)
            .max())
    }

    async fn latest(&self, user_id: Uuid) -> Result<Option<RecommendationSet>> {
        Ok(lock(&self.sets)
            .iter()
            .filter(|s| s.user_id == user_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }
}

/// In-memory [`SimilarityRepository`].
#[derive(Default)]
pub struct MemorySimilarityRepository {
    matrices: Mutex<Vec<SimilarityMatrix>>,
}

impl MemorySimilarityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted matrix versions (test assertion helper).
    pub fn version_count(&self) -> usize {
        lock(&self.matrices).len()
    }
}

#[async_trait]
impl SimilarityRepository for MemorySimilarityRepository {
    async fn save(&self, matrix: &SimilarityMatrix) -> Result<()> {
        lock(&self.matrices).push(matrix.clone());
        Ok(())
    }

    async fn load_latest(&self) -> Result<Option<SimilarityMatrix>> {
        Ok(lock(&self.matrices)
            .iter()
            .max_by_key(|m| m.version)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liber_core::Algorithm;

    fn profile(username: &str, active: bool) -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            username: username.into(),
            active,
            recommendations_enabled: true,
            weight_overrides: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_profile_lookup_by_id_and_username() {
        let repo = MemoryProfileRepository::new();
        let user = profile("ada", true);
        repo.add_user(user.clone());

        assert_eq!(repo.get(user.id).await.unwrap().unwrap().username, "ada");
        assert_eq!(
            repo.get_by_username("ada").await.unwrap().unwrap().id,
            user.id
        );
        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_active_filters_inactive() {
        let repo = MemoryProfileRepository::new();
        repo.add_user(profile("active", true));
        repo.add_user(profile("dormant", false));

        assert_eq!(repo.list_all().await.unwrap().len(), 2);
        let active = repo.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].username, "active");
    }

    #[tokio::test]
    async fn test_history_sorted_most_recent_first() {
        let repo = MemoryProfileRepository::new();
        let user = Uuid::new_v4();
        let old = Utc::now() - chrono::Duration::days(10);
        let new = Utc::now();
        for finished_at in [old, new] {
            repo.add_history(ReadingRecord {
                user_id: user,
                book_id: Uuid::new_v4(),
                finished_at,
                rating: None,
            });
        }

        let history = repo.history(user).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].finished_at, new);
    }

    #[tokio::test]
    async fn test_recommendation_latest_tracks_newest() {
        let repo = MemoryRecommendationRepository::new();
        let user = Uuid::new_v4();
        assert!(repo.latest_created_at(user).await.unwrap().is_none());

        let older = Utc::now() - chrono::Duration::hours(2);
        let newer = Utc::now();
        for created_at in [older, newer] {
            repo.insert(&RecommendationSet {
                id: Uuid::new_v4(),
                user_id: user,
                algorithm: Algorithm::Popularity,
                entries: vec![],
                context: "test".into(),
                created_at,
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.latest_created_at(user).await.unwrap(), Some(newer));
        assert_eq!(repo.latest(user).await.unwrap().unwrap().created_at, newer);
        assert_eq!(repo.count_for(user), 2);
    }

    #[tokio::test]
    async fn test_similarity_load_latest_picks_highest_version() {
        let repo = MemorySimilarityRepository::new();
        assert!(repo.load_latest().await.unwrap().is_none());

        for version in [1u64, 2] {
            let mut m = SimilarityMatrix::new();
            m.version = version;
            m.built_at = Some(Utc::now());
            m.insert(Uuid::new_v4(), Uuid::new_v4(), 0.4);
            repo.save(&m).await.unwrap();
        }

        let latest = repo.load_latest().await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.len(), 1);
        assert_eq!(repo.version_count(), 2);
    }

    #[tokio::test]
    async fn test_catalog_vector_upsert_replaces() {
        let repo = MemoryCatalogRepository::new();
        let book_id = Uuid::new_v4();
        for value in [1.0f32, 2.0] {
            repo.upsert_vector(&ItemVector {
                book_id,
                vector: vec![value],
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let v = repo.item_vector(book_id).await.unwrap().unwrap();
        assert_eq!(v.vector, vec![2.0]);
        assert_eq!(repo.all_vectors().await.unwrap().len(), 1);
    }
}
