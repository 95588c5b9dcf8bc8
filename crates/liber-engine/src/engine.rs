//! The recommendation engine: algorithm dispatch and fallback behavior.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use liber_core::{
    Algorithm, Book, CatalogRepository, CollaborativeSignal, HybridWeights, ProfileRepository,
    Result, ScoredItem, UserProfile,
};

use crate::hybrid::blend;
use crate::similarity::SimilarityStore;
use crate::strategy::{
    collaborative_scores, content_based_scores, popularity_scores, rank_candidates,
};

/// Produces ranked recommendation sets for one user at a time.
///
/// Pure with respect to storage: reads catalog, history, and the similarity
/// snapshot; never writes. Persisting the result is the caller's job, which
/// keeps the engine directly testable.
pub struct RecommendationEngine {
    profiles: Arc<dyn ProfileRepository>,
    catalog: Arc<dyn CatalogRepository>,
    signal: Arc<dyn CollaborativeSignal>,
    similarity: Arc<SimilarityStore>,
    default_weights: HybridWeights,
}

impl RecommendationEngine {
    pub fn new(
        profiles: Arc<dyn ProfileRepository>,
        catalog: Arc<dyn CatalogRepository>,
        signal: Arc<dyn CollaborativeSignal>,
        similarity: Arc<SimilarityStore>,
    ) -> Self {
        Self {
            profiles,
            catalog,
            signal,
            similarity,
            default_weights: HybridWeights::default(),
        }
    }

    /// Override the default hybrid weights (users may still carry their own).
    pub fn with_default_weights(mut self, weights: HybridWeights) -> Self {
        self.default_weights = weights;
        self
    }

    /// Generate up to `count` recommendations for `user`.
    ///
    /// Returns an empty sequence (not an error) when no candidates exist
    /// after the popularity fallback. `context` is a label for logging and
    /// the persisted set; it does not influence scoring.
    #[instrument(skip(self, user), fields(user_id = %user.id, algorithm = %algorithm))]
    pub async fn generate(
        &self,
        user: &UserProfile,
        algorithm: Algorithm,
        count: usize,
        context: &str,
    ) -> Result<Vec<ScoredItem>> {
        let start = Instant::now();

        let books = self.catalog.list_books().await?;
        let history = self.profiles.history(user.id).await?;
        let consumed: HashSet<Uuid> = history.iter().map(|r| r.book_id).collect();

        let books_by_id: HashMap<Uuid, Book> = books.into_iter().map(|b| (b.id, b)).collect();
        let candidates: HashSet<Uuid> = books_by_id
            .keys()
            .filter(|id| !consumed.contains(id))
            .copied()
            .collect();

        if candidates.is_empty() {
            debug!("No candidates after filtering consumed items");
            return Ok(Vec::new());
        }

        let scores = match algorithm {
            Algorithm::ContentBased => {
                let scores = self.content_scores(&history, &candidates);
                self.with_popularity_fallback(scores, &candidates).await?
            }
            Algorithm::Collaborative => {
                let scores = self.collab_scores(user.id, &history, &candidates).await?;
                self.with_popularity_fallback(scores, &candidates).await?
            }
            Algorithm::Popularity => {
                let popularity = self.catalog.popularity().await?;
                popularity_scores(&popularity, &candidates)
            }
            Algorithm::Hybrid => {
                let weights = user.weight_overrides.unwrap_or(self.default_weights);
                weights.validate()?;

                let content = self.content_scores(&history, &candidates);
                let collaborative = self.collab_scores(user.id, &history, &candidates).await?;
                let popularity = self.catalog.popularity().await?;
                let popularity = popularity_scores(&popularity, &candidates);

                blend(&weights, &content, &collaborative, &popularity)
            }
        };

        let candidate_count = scores.len();
        let ranked = rank_candidates(scores, &books_by_id, count);

        info!(
            context,
            candidate_count,
            result_count = ranked.len(),
            matrix_version = self.similarity.current_version(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Recommendation generation complete"
        );
        Ok(ranked)
    }

    fn content_scores(
        &self,
        history: &[liber_core::ReadingRecord],
        candidates: &HashSet<Uuid>,
    ) -> HashMap<Uuid, f32> {
        let snapshot = self.similarity.snapshot();
        content_based_scores(history, candidates, &snapshot)
    }

    async fn collab_scores(
        &self,
        user_id: Uuid,
        history: &[liber_core::ReadingRecord],
        candidates: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, f32>> {
        // Cold start: the collaborative contract is defined over overlapping
        // history, so a user with none has no signal by definition.
        if history.is_empty() {
            return Ok(HashMap::new());
        }
        let raw = self.signal.scores_for(user_id).await?;
        Ok(collaborative_scores(raw, candidates))
    }

    /// Fall back to popularity when a personalized strategy yields nothing
    /// (cold start or empty candidate intersection).
    async fn with_popularity_fallback(
        &self,
        scores: HashMap<Uuid, f32>,
        candidates: &HashSet<Uuid>,
    ) -> Result<HashMap<Uuid, f32>> {
        if !scores.is_empty() {
            return Ok(scores);
        }
        debug!("Personalized strategy empty, falling back to popularity");
        let popularity = self.catalog.popularity().await?;
        Ok(popularity_scores(&popularity, candidates))
    }
}
