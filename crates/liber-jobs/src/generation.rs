//! Generation service and the registered task handlers.
//!
//! The service is the single write path for recommendation sets: it applies
//! the freshness policy, holds the per-user in-flight lock across the engine
//! call and the persist, and appends the resulting set. Task handlers wrap
//! it for the scheduler; the CLI calls it directly.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use liber_core::defaults::{
    CONTEXT_DAILY_BATCH, CONTEXT_ON_DEMAND, GENERATION_RATE_PER_MINUTE, RECOMMENDATION_COUNT,
    SIMILARITY_REBUILD_RATE_PER_HOUR, TASK_PRIORITY_BACKGROUND, TASK_PRIORITY_INTERACTIVE,
};
use liber_core::{
    Algorithm, CatalogRepository, Error, ProfileRepository, QueueName, RateLimit,
    RecommendationRepository, RecommendationSet, Result, SimilarityMatrix, SimilarityRepository,
    UserProfile,
};
use liber_engine::similarity::{RebuildProgress, RebuildState};
use liber_engine::{vectorize, FreshnessPolicy, RecommendationEngine, SimilarityComputation, SimilarityStore};

use crate::batch::{BatchMode, BatchOptions, BatchOrchestrator};
use crate::handler::{TaskContext, TaskHandler, TaskOutcome};
use crate::policy::TaskPolicy;
use crate::registry::TaskRegistry;

/// Registered task names.
pub const TASK_GENERATE_USER: &str = "recommendations.generate_user";
pub const TASK_GENERATE_BATCH: &str = "recommendations.generate_batch";
pub const TASK_GENERATE_ALL: &str = "recommendations.generate_all";
pub const TASK_SIMILARITY_REBUILD: &str = "similarity.rebuild";

// =============================================================================
// IN-FLIGHT LOCK
// =============================================================================

/// At most one generation in flight per user. A second caller gets a
/// `Conflict` instead of queueing behind the first; by the time the first
/// finishes, its fresh set makes the duplicate pointless anyway.
#[derive(Default)]
pub struct InFlightRegistry {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the user's slot. The returned guard releases it on drop, so
    /// the slot is freed on both success and error paths.
    pub fn try_begin(&self, user_id: Uuid) -> Result<InFlightGuard> {
        if !self.lock().insert(user_id) {
            return Err(Error::Conflict(format!(
                "generation already in flight for user {user_id}"
            )));
        }
        Ok(InFlightGuard {
            inner: self.inner.clone(),
            user_id,
        })
    }

    pub fn is_in_flight(&self, user_id: Uuid) -> bool {
        self.lock().contains(&user_id)
    }
}

#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<Mutex<HashSet<Uuid>>>,
    user_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.user_id);
    }
}

// =============================================================================
// GENERATION SERVICE
// =============================================================================

/// Outcome of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationStatus {
    /// A new set was generated and persisted.
    Generated { set_id: Uuid, count: usize },
    /// The user's latest set is still inside the freshness window.
    SkippedFresh,
    /// Dry run: the user would be generated, nothing was computed.
    DryRun,
}

/// Orchestrates one user's generation: freshness check, in-flight lock,
/// engine invocation, persistence.
pub struct GenerationService {
    engine: Arc<RecommendationEngine>,
    recommendations: Arc<dyn RecommendationRepository>,
    freshness: FreshnessPolicy,
    in_flight: InFlightRegistry,
}

impl GenerationService {
    pub fn new(
        engine: Arc<RecommendationEngine>,
        recommendations: Arc<dyn RecommendationRepository>,
    ) -> Self {
        Self {
            engine,
            recommendations,
            freshness: FreshnessPolicy::default(),
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn with_freshness(mut self, policy: FreshnessPolicy) -> Self {
        self.freshness = policy;
        self
    }

    /// Whether the freshness policy would admit a generation for this user.
    pub async fn needs_generation(&self, user_id: Uuid, force: bool) -> Result<bool> {
        let latest = self.recommendations.latest_created_at(user_id).await?;
        Ok(self.freshness.needs_generation(latest, force, Utc::now()))
    }

    /// Generate and persist a recommendation set for one user.
    ///
    /// Fails with `Conflict` when another generation for the same user is
    /// already in flight.
    #[instrument(skip(self, user), fields(user_id = %user.id, algorithm = %algorithm, context))]
    pub async fn generate_for_user(
        &self,
        user: &UserProfile,
        algorithm: Algorithm,
        count: usize,
        context: &str,
        force: bool,
        dry_run: bool,
    ) -> Result<GenerationStatus> {
        if !self.needs_generation(user.id, force).await? {
            debug!("Latest set still fresh, skipping");
            return Ok(GenerationStatus::SkippedFresh);
        }
        if dry_run {
            info!("Dry run: would generate");
            return Ok(GenerationStatus::DryRun);
        }

        let _guard = self.in_flight.try_begin(user.id)?;

        let entries = self.engine.generate(user, algorithm, count, context).await?;
        let set = RecommendationSet {
            id: Uuid::new_v4(),
            user_id: user.id,
            algorithm,
            entries,
            context: context.to_string(),
            created_at: Utc::now(),
        };
        self.recommendations.insert(&set).await?;

        info!(result_count = set.entries.len(), "Recommendation set persisted");
        Ok(GenerationStatus::Generated {
            set_id: set.id,
            count: set.entries.len(),
        })
    }
}

// =============================================================================
// TASK HANDLERS
// =============================================================================

/// Shared argument parsing for generation payloads.
fn generation_args(ctx: &TaskContext, default_context: &str) -> Result<(Algorithm, usize, String, bool)> {
    let algorithm = match ctx.arg_opt::<String>("algorithm")? {
        Some(s) => s.parse()?,
        None => Algorithm::Hybrid,
    };
    let count = ctx.arg_opt::<usize>("count")?.unwrap_or(RECOMMENDATION_COUNT);
    let context = ctx
        .arg_opt::<String>("context")?
        .unwrap_or_else(|| default_context.to_string());
    let force = ctx.arg_opt::<bool>("force")?.unwrap_or(false);
    Ok((algorithm, count, context, force))
}

/// `recommendations.generate_user`: one user, interactive priority.
pub struct GenerateUserHandler {
    profiles: Arc<dyn ProfileRepository>,
    service: Arc<GenerationService>,
}

impl GenerateUserHandler {
    pub fn new(profiles: Arc<dyn ProfileRepository>, service: Arc<GenerationService>) -> Self {
        Self { profiles, service }
    }

    async fn run(&self, ctx: &TaskContext) -> Result<serde_json::Value> {
        let user_id: Uuid = ctx.arg("user_id")?;
        let (algorithm, count, context, force) = generation_args(ctx, CONTEXT_ON_DEMAND)?;

        let user = self
            .profiles
            .get(user_id)
            .await?
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
        if !user.recommendations_enabled {
            return Ok(json!({ "status": "skipped", "reason": "recommendations_disabled" }));
        }

        let status = self
            .service
            .generate_for_user(&user, algorithm, count, &context, force, false)
            .await?;
        Ok(match status {
            GenerationStatus::Generated { set_id, count } => {
                json!({ "status": "generated", "set_id": set_id, "count": count })
            }
            GenerationStatus::SkippedFresh => json!({ "status": "skipped", "reason": "fresh" }),
            GenerationStatus::DryRun => json!({ "status": "dry_run" }),
        })
    }
}

#[async_trait]
impl TaskHandler for GenerateUserHandler {
    fn name(&self) -> &str {
        TASK_GENERATE_USER
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        match self.run(&ctx).await {
            Ok(result) => TaskOutcome::Success(Some(result)),
            Err(e) => TaskOutcome::from_error(&e),
        }
    }
}

/// `recommendations.generate_batch`: one chunk of a deferred batch.
///
/// Users inside a chunk are isolated: a failure is recorded and the rest of
/// the chunk still runs.
pub struct GenerateBatchHandler {
    profiles: Arc<dyn ProfileRepository>,
    service: Arc<GenerationService>,
}

impl GenerateBatchHandler {
    pub fn new(profiles: Arc<dyn ProfileRepository>, service: Arc<GenerationService>) -> Self {
        Self { profiles, service }
    }

    async fn run(&self, ctx: &TaskContext) -> Result<serde_json::Value> {
        let user_ids: Vec<Uuid> = ctx.arg("user_ids")?;
        let (algorithm, count, context, force) = generation_args(ctx, CONTEXT_DAILY_BATCH)?;

        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut skipped = 0usize;
        for user_id in user_ids {
            // Lookup failures count against the one user, like generation
            // failures; the rest of the chunk still runs.
            let user = match self.profiles.get(user_id).await {
                Ok(Some(u)) if u.recommendations_enabled => u,
                Ok(_) => {
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Batch chunk user lookup failed");
                    failed += 1;
                    continue;
                }
            };
            match self
                .service
                .generate_for_user(&user, algorithm, count, &context, force, false)
                .await
            {
                Ok(GenerationStatus::Generated { .. }) => succeeded += 1,
                Ok(_) => skipped += 1,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Batch chunk user failed");
                    failed += 1;
                }
            }
        }

        info!(succeeded, failed, skipped, "Batch chunk complete");
        Ok(json!({ "succeeded": succeeded, "failed": failed, "skipped": skipped }))
    }
}

#[async_trait]
impl TaskHandler for GenerateBatchHandler {
    fn name(&self) -> &str {
        TASK_GENERATE_BATCH
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        match self.run(&ctx).await {
            Ok(result) => TaskOutcome::Success(Some(result)),
            Err(e) => TaskOutcome::from_error(&e),
        }
    }
}

/// `recommendations.generate_all`: the nightly fan-out over every eligible
/// user, fired by the periodic clock.
pub struct GenerateAllHandler {
    profiles: Arc<dyn ProfileRepository>,
    orchestrator: Arc<BatchOrchestrator>,
}

impl GenerateAllHandler {
    pub fn new(profiles: Arc<dyn ProfileRepository>, orchestrator: Arc<BatchOrchestrator>) -> Self {
        Self {
            profiles,
            orchestrator,
        }
    }

    async fn run(&self, ctx: &TaskContext) -> Result<serde_json::Value> {
        let active_only = ctx.arg_opt::<bool>("active_only")?.unwrap_or(true);
        let (algorithm, count, context, force) = generation_args(ctx, CONTEXT_DAILY_BATCH)?;

        let users = if active_only {
            self.profiles.list_active().await?
        } else {
            self.profiles.list_all().await?
        };

        let options = BatchOptions {
            algorithm,
            count,
            context,
            force,
            mode: BatchMode::Sync,
            ..BatchOptions::default()
        };
        let outcome = self.orchestrator.run(&users, &options).await?;
        Ok(json!({
            "selected": outcome.selected,
            "succeeded": outcome.succeeded,
            "failed": outcome.failed,
            "skipped": outcome.skipped,
        }))
    }
}

#[async_trait]
impl TaskHandler for GenerateAllHandler {
    fn name(&self) -> &str {
        TASK_GENERATE_ALL
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        match self.run(&ctx).await {
            Ok(result) => TaskOutcome::Success(Some(result)),
            Err(e) => TaskOutcome::from_error(&e),
        }
    }
}

/// `similarity.rebuild`: refresh item vectors, recompute the pair matrix,
/// publish a new version, persist it.
///
/// The O(n²) scan checkpoints at the soft time limit: the partial state is
/// parked and the attempt reports a retryable failure, so the scheduler's
/// retry resumes the scan instead of starting over. The scan itself runs on
/// the blocking pool; the handler future only awaits it, so the worker's
/// hard-limit timeout stays enforceable and runtime threads stay free.
pub struct SimilarityRebuildHandler {
    catalog: Arc<dyn CatalogRepository>,
    repo: Arc<dyn SimilarityRepository>,
    computation: SimilarityComputation,
    store: Arc<SimilarityStore>,
    checkpoint: Arc<Mutex<Option<RebuildState>>>,
}

/// Outcome of one blocking drive call.
enum Drive {
    Complete(SimilarityMatrix),
    /// Checkpointed; carries the completed fraction of the pair scan.
    Checkpointed(f32),
}

impl SimilarityRebuildHandler {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        store: Arc<SimilarityStore>,
        repo: Arc<dyn SimilarityRepository>,
    ) -> Self {
        Self {
            catalog,
            repo,
            computation: SimilarityComputation::new(),
            store,
            checkpoint: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_computation(mut self, computation: SimilarityComputation) -> Self {
        self.computation = computation;
        self
    }

    fn take_checkpoint(&self) -> Option<RebuildState> {
        self.checkpoint
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn refresh_vectors(&self) -> Result<()> {
        let books = self.catalog.list_books().await?;
        let total = books.len();
        for book in &books {
            self.catalog.upsert_vector(&vectorize(book)).await?;
        }
        debug!(result_count = total, "Item vectors refreshed");
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for SimilarityRebuildHandler {
    fn name(&self) -> &str {
        TASK_SIMILARITY_REBUILD
    }

    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        // A parked checkpoint means this attempt resumes a paused scan;
        // vectors were already refreshed by the first attempt.
        let state = match self.take_checkpoint() {
            Some(state) => state,
            None => {
                if let Err(e) = self.refresh_vectors().await {
                    return TaskOutcome::from_error(&e);
                }
                RebuildState::new()
            }
        };

        let mut corpus = match self.catalog.all_vectors().await {
            Ok(corpus) => corpus,
            Err(e) => return TaskOutcome::from_error(&e),
        };
        // Resume depends on a stable scan order across attempts.
        corpus.sort_by_key(|v| v.book_id);
        let total = corpus.len();

        // The closure parks its own checkpoint: even if this future is
        // dropped by the hard-limit timeout mid-scan, the partial state
        // survives for the retry attempt.
        let computation = self.computation.clone();
        let parked = Arc::clone(&self.checkpoint);
        let soft_deadline = ctx.soft_deadline();
        let drive = tokio::task::spawn_blocking(move || -> Result<Drive> {
            let should_pause =
                || soft_deadline.map_or(false, |deadline| std::time::Instant::now() >= deadline);
            match computation.drive(&corpus, state, should_pause)? {
                RebuildProgress::Complete(matrix) => Ok(Drive::Complete(matrix)),
                RebuildProgress::Paused(state) => {
                    let fraction = state.progress_fraction(total);
                    *parked
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(state);
                    Ok(Drive::Checkpointed(fraction))
                }
            }
        });

        match drive.await {
            Ok(Ok(Drive::Complete(matrix))) => {
                let pairs = matrix.len();
                let version = self.store.publish(matrix);
                // This handler is the sole publisher, so the snapshot is
                // exactly the matrix published above.
                if let Err(e) = self.repo.save(&self.store.snapshot()).await {
                    warn!(matrix_version = version, error = %e, "Matrix publish not persisted");
                    return TaskOutcome::from_error(&e);
                }
                TaskOutcome::Success(Some(json!({
                    "status": "published",
                    "matrix_version": version,
                    "items": total,
                    "pairs": pairs,
                })))
            }
            Ok(Ok(Drive::Checkpointed(fraction))) => {
                ctx.report_progress((fraction * 100.0) as i32, Some("checkpointed"));
                TaskOutcome::Failed(format!(
                    "soft time limit reached at {:.0}% of pair scan, checkpointed for resume",
                    fraction * 100.0
                ))
            }
            Ok(Err(e)) => TaskOutcome::from_error(&e),
            Err(join_err) => TaskOutcome::Failed(format!("pair scan worker: {join_err}")),
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Register the standard task set with its routing and policies.
pub fn register_default_tasks(
    registry: &mut TaskRegistry,
    profiles: Arc<dyn ProfileRepository>,
    catalog: Arc<dyn CatalogRepository>,
    service: Arc<GenerationService>,
    orchestrator: Arc<BatchOrchestrator>,
    store: Arc<SimilarityStore>,
    similarity: Arc<dyn SimilarityRepository>,
) -> Result<()> {
    registry.register(
        GenerateUserHandler::new(profiles.clone(), service.clone()),
        TaskPolicy::new(QueueName::Recommendations)
            .with_priority(TASK_PRIORITY_INTERACTIVE)
            .with_rate_limit(RateLimit::per_minute(GENERATION_RATE_PER_MINUTE)),
    )?;
    registry.register(
        GenerateBatchHandler::new(profiles.clone(), service),
        TaskPolicy::new(QueueName::Recommendations),
    )?;
    registry.register(
        GenerateAllHandler::new(profiles, orchestrator),
        TaskPolicy::new(QueueName::Recommendations)
            .with_time_limits(
                std::time::Duration::from_secs(3300),
                std::time::Duration::from_secs(3600),
            ),
    )?;
    registry.register(
        SimilarityRebuildHandler::new(catalog, store, similarity),
        TaskPolicy::new(QueueName::HeavyComputation)
            .with_priority(TASK_PRIORITY_BACKGROUND)
            .with_rate_limit(RateLimit::per_hour(SIMILARITY_REBUILD_RATE_PER_HOUR)),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    use liber_core::{Book, PopularityScore, QueueName, ReadingRecord, Task};
    use liber_db::memory::{
        MemoryCatalogRepository, MemoryProfileRepository, MemoryRecommendationRepository,
        MemorySimilarityRepository,
    };
    use liber_engine::StaticCollaborativeSignal;

    struct Fixture {
        profiles: Arc<MemoryProfileRepository>,
        catalog: Arc<MemoryCatalogRepository>,
        recommendations: Arc<MemoryRecommendationRepository>,
        store: Arc<SimilarityStore>,
        similarity: Arc<MemorySimilarityRepository>,
        service: Arc<GenerationService>,
    }

    impl Fixture {
        fn new() -> Self {
            let profiles = Arc::new(MemoryProfileRepository::new());
            let catalog = Arc::new(MemoryCatalogRepository::new());
            let recommendations = Arc::new(MemoryRecommendationRepository::new());
            let store = Arc::new(SimilarityStore::new());
            let similarity = Arc::new(MemorySimilarityRepository::new());
            let engine = Arc::new(RecommendationEngine::new(
                profiles.clone(),
                catalog.clone(),
                Arc::new(StaticCollaborativeSignal::new()),
                store.clone(),
            ));
            let service = Arc::new(GenerationService::new(engine, recommendations.clone()));
            Self {
                profiles,
                catalog,
                recommendations,
                store,
                similarity,
                service,
            }
        }

        fn add_user(&self) -> UserProfile {
            let user = UserProfile {
                id: Uuid::new_v4(),
                username: "reader".into(),
                active: true,
                recommendations_enabled: true,
                weight_overrides: None,
                created_at: Utc::now(),
            };
            self.profiles.add_user(user.clone());
            user
        }

        fn add_book(&self, title: &str, subjects: &[&str]) -> Book {
            let book = Book {
                id: Uuid::new_v4(),
                title: title.into(),
                subjects: subjects.iter().map(|s| s.to_string()).collect(),
                published_at: Utc::now(),
            };
            self.catalog.add_book(book.clone());
            book
        }

        fn seed_popularity(&self, books: &[&Book]) {
            self.catalog.set_popularity(
                books
                    .iter()
                    .enumerate()
                    .map(|(i, b)| PopularityScore {
                        book_id: b.id,
                        score: 1.0 - i as f32 * 0.1,
                    })
                    .collect(),
            );
        }
    }

    fn ctx_for(name: &str, payload: serde_json::Value) -> TaskContext {
        TaskContext::new(Task {
            id: Uuid::new_v4(),
            name: name.into(),
            queue: QueueName::Recommendations,
            priority: 5,
            payload,
            retry_count: 0,
            max_retries: 3,
            enqueued_at: Utc::now(),
            not_before: None,
        })
    }

    #[tokio::test]
    async fn test_generate_persists_set() {
        let fx = Fixture::new();
        let user = fx.add_user();
        let b1 = fx.add_book("one", &["fantasy"]);
        let b2 = fx.add_book("two", &["scifi"]);
        fx.seed_popularity(&[&b1, &b2]);

        let status = fx
            .service
            .generate_for_user(&user, Algorithm::Popularity, 10, "test", false, false)
            .await
            .unwrap();
        assert!(matches!(status, GenerationStatus::Generated { count: 2, .. }));
        assert_eq!(fx.recommendations.count_for(user.id), 1);
    }

    #[tokio::test]
    async fn test_fresh_set_skips_unless_forced() {
        let fx = Fixture::new();
        let user = fx.add_user();
        let b1 = fx.add_book("one", &["fantasy"]);
        fx.seed_popularity(&[&b1]);

        fx.service
            .generate_for_user(&user, Algorithm::Popularity, 10, "test", false, false)
            .await
            .unwrap();

        let status = fx
            .service
            .generate_for_user(&user, Algorithm::Popularity, 10, "test", false, false)
            .await
            .unwrap();
        assert_eq!(status, GenerationStatus::SkippedFresh);
        assert_eq!(fx.recommendations.count_for(user.id), 1);

        let status = fx
            .service
            .generate_for_user(&user, Algorithm::Popularity, 10, "test", true, false)
            .await
            .unwrap();
        assert!(matches!(status, GenerationStatus::Generated { .. }));
        assert_eq!(fx.recommendations.count_for(user.id), 2);
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let fx = Fixture::new();
        let user = fx.add_user();
        let b1 = fx.add_book("one", &["fantasy"]);
        fx.seed_popularity(&[&b1]);

        let status = fx
            .service
            .generate_for_user(&user, Algorithm::Popularity, 10, "test", false, true)
            .await
            .unwrap();
        assert_eq!(status, GenerationStatus::DryRun);
        assert_eq!(fx.recommendations.count_for(user.id), 0);
    }

    #[test]
    fn test_in_flight_conflict_and_release() {
        let registry = InFlightRegistry::new();
        let user_id = Uuid::new_v4();

        let guard = registry.try_begin(user_id).unwrap();
        assert!(registry.is_in_flight(user_id));
        let err = registry.try_begin(user_id).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // A different user is unaffected.
        let other = registry.try_begin(Uuid::new_v4()).unwrap();
        drop(other);

        drop(guard);
        assert!(!registry.is_in_flight(user_id));
        registry.try_begin(user_id).unwrap();
    }

    #[tokio::test]
    async fn test_generate_user_handler_missing_user_is_terminal() {
        let fx = Fixture::new();
        let handler = GenerateUserHandler::new(fx.profiles.clone(), fx.service.clone());
        let outcome = handler
            .execute(ctx_for(
                TASK_GENERATE_USER,
                json!({ "user_id": Uuid::new_v4() }),
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::Terminal(_)));
    }

    #[tokio::test]
    async fn test_generate_user_handler_bad_algorithm_is_terminal() {
        let fx = Fixture::new();
        let user = fx.add_user();
        let handler = GenerateUserHandler::new(fx.profiles.clone(), fx.service.clone());
        let outcome = handler
            .execute(ctx_for(
                TASK_GENERATE_USER,
                json!({ "user_id": user.id, "algorithm": "trending" }),
            ))
            .await;
        assert!(matches!(outcome, TaskOutcome::Terminal(msg) if msg.contains("trending")));
    }

    #[tokio::test]
    async fn test_batch_chunk_isolates_failures() {
        let fx = Fixture::new();
        let b1 = fx.add_book("one", &["fantasy"]);
        fx.seed_popularity(&[&b1]);

        let good = fx.add_user();
        // Invalid weight overrides make the hybrid path fail for this user.
        let mut bad = fx.add_user();
        bad.weight_overrides = Some(liber_core::HybridWeights {
            content: 0.9,
            collaborative: 0.9,
            popularity: 0.9,
        });
        fx.profiles.add_user(bad.clone());

        let handler = GenerateBatchHandler::new(fx.profiles.clone(), fx.service.clone());
        let outcome = handler
            .execute(ctx_for(
                TASK_GENERATE_BATCH,
                json!({ "user_ids": [good.id, bad.id], "algorithm": "hybrid" }),
            ))
            .await;

        match outcome {
            TaskOutcome::Success(Some(result)) => {
                assert_eq!(result["succeeded"], 1);
                assert_eq!(result["failed"], 1);
            }
            other => panic!("expected success with counts, got {other:?}"),
        }
        assert_eq!(fx.recommendations.count_for(good.id), 1);
        assert_eq!(fx.recommendations.count_for(bad.id), 0);
    }

    /// Delegates to the in-memory repository, but fails lookups for one
    /// user id, like a transient backend error mid-chunk.
    struct FaultyProfiles {
        inner: Arc<MemoryProfileRepository>,
        failing: Uuid,
    }

    #[async_trait]
    impl ProfileRepository for FaultyProfiles {
        async fn get(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
            if user_id == self.failing {
                return Err(Error::Internal("profile backend unavailable".into()));
            }
            self.inner.get(user_id).await
        }

        async fn get_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
            self.inner.get_by_username(username).await
        }

        async fn list_all(&self) -> Result<Vec<UserProfile>> {
            self.inner.list_all().await
        }

        async fn list_active(&self) -> Result<Vec<UserProfile>> {
            self.inner.list_active().await
        }

        async fn history(&self, user_id: Uuid) -> Result<Vec<ReadingRecord>> {
            self.inner.history(user_id).await
        }
    }

    #[tokio::test]
    async fn test_batch_chunk_survives_profile_lookup_error() {
        let fx = Fixture::new();
        let b1 = fx.add_book("one", &["fantasy"]);
        fx.seed_popularity(&[&b1]);
        let good = fx.add_user();
        let broken = Uuid::new_v4();

        let profiles = Arc::new(FaultyProfiles {
            inner: fx.profiles.clone(),
            failing: broken,
        });
        let handler = GenerateBatchHandler::new(profiles, fx.service.clone());

        // The failing user comes first; the rest of the chunk still runs.
        let outcome = handler
            .execute(ctx_for(
                TASK_GENERATE_BATCH,
                json!({ "user_ids": [broken, good.id], "algorithm": "popularity" }),
            ))
            .await;

        match outcome {
            TaskOutcome::Success(Some(result)) => {
                assert_eq!(result["succeeded"], 1);
                assert_eq!(result["failed"], 1);
            }
            other => panic!("expected success with counts, got {other:?}"),
        }
        assert_eq!(fx.recommendations.count_for(good.id), 1);
    }

    #[tokio::test]
    async fn test_rebuild_persists_matrix_for_later_processes() {
        let fx = Fixture::new();
        fx.add_book("epic fantasy", &["fantasy", "epic"]);
        fx.add_book("epic tale", &["fantasy", "epic"]);

        let handler = SimilarityRebuildHandler::new(
            fx.catalog.clone(),
            fx.store.clone(),
            fx.similarity.clone(),
        );
        let outcome = handler
            .execute(ctx_for(TASK_SIMILARITY_REBUILD, json!({})))
            .await;
        assert!(matches!(outcome, TaskOutcome::Success(_)));
        assert_eq!(fx.similarity.version_count(), 1);

        // A later process restores the persisted matrix instead of
        // starting from an empty store.
        let store = SimilarityStore::new();
        let loaded = fx.similarity.load_latest().await.unwrap().unwrap();
        assert!(store.restore(loaded));
        assert_eq!(store.current_version(), 1);

        let published = fx.store.snapshot();
        let restored = store.snapshot();
        assert_eq!(restored.len(), published.len());
        for (a, b, score) in published.iter() {
            assert_eq!(restored.get(a, b), Some(score));
        }
    }

    #[tokio::test]
    async fn test_similarity_rebuild_publishes_new_version() {
        let fx = Fixture::new();
        fx.add_book("epic fantasy", &["fantasy", "epic"]);
        fx.add_book("epic tale", &["fantasy", "epic"]);
        fx.add_book("rockets", &["scifi"]);

        let handler = SimilarityRebuildHandler::new(
            fx.catalog.clone(),
            fx.store.clone(),
            fx.similarity.clone(),
        );
        assert_eq!(fx.store.current_version(), 0);

        let outcome = handler
            .execute(ctx_for(TASK_SIMILARITY_REBUILD, json!({})))
            .await;
        match outcome {
            TaskOutcome::Success(Some(result)) => {
                assert_eq!(result["status"], "published");
                assert_eq!(result["matrix_version"], 1);
                assert_eq!(result["items"], 3);
            }
            other => panic!("expected publication, got {other:?}"),
        }
        assert_eq!(fx.store.current_version(), 1);
        assert!(!fx.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_similarity_rebuild_checkpoints_and_resumes() {
        let fx = Fixture::new();
        for i in 0..6 {
            fx.add_book(&format!("book {i}"), &["fantasy"]);
        }

        let handler = SimilarityRebuildHandler::new(
            fx.catalog.clone(),
            fx.store.clone(),
            fx.similarity.clone(),
        )
        .with_computation(SimilarityComputation::new().with_block_size(1));

        // Soft deadline already in the past: the first attempt checkpoints
        // after its first block.
        let ctx = ctx_for(TASK_SIMILARITY_REBUILD, json!({}))
            .with_soft_deadline(std::time::Instant::now() - std::time::Duration::from_secs(1));
        let outcome = handler.execute(ctx).await;
        assert!(matches!(outcome, TaskOutcome::Failed(msg) if msg.contains("checkpointed")));
        assert_eq!(fx.store.current_version(), 0);

        // The retry attempt finishes the scan and publishes.
        let outcome = handler
            .execute(ctx_for(TASK_SIMILARITY_REBUILD, json!({})))
            .await;
        assert!(matches!(outcome, TaskOutcome::Success(_)));
        assert_eq!(fx.store.current_version(), 1);
    }

    #[tokio::test]
    async fn test_register_default_tasks_routing() {
        let fx = Fixture::new();
        let orchestrator = Arc::new(BatchOrchestrator::new(fx.service.clone()));
        let mut registry = TaskRegistry::new();
        register_default_tasks(
            &mut registry,
            fx.profiles.clone(),
            fx.catalog.clone(),
            fx.service.clone(),
            orchestrator,
            fx.store.clone(),
            fx.similarity.clone(),
        )
        .unwrap();

        assert_eq!(
            registry.route(TASK_GENERATE_USER).unwrap(),
            QueueName::Recommendations
        );
        assert_eq!(
            registry.route(TASK_SIMILARITY_REBUILD).unwrap(),
            QueueName::HeavyComputation
        );
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_generation_conflict() {
        let fx = Fixture::new();
        let user = fx.add_user();
        let b1 = fx.add_book("one", &["fantasy"]);
        fx.seed_popularity(&[&b1]);

        // Hold the slot as a competing generation would.
        let _guard = fx.service.in_flight.try_begin(user.id).unwrap();
        let err = fx
            .service
            .generate_for_user(&user, Algorithm::Popularity, 10, "test", true, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_freshness_window_boundary_via_service() {
        // Exactly the window boundary stays fresh; strictly past it is stale.
        let policy = FreshnessPolicy::default();
        let now = Utc::now();
        assert!(!policy.needs_generation(Some(now - Duration::hours(24)), false, now));
        assert!(policy.needs_generation(
            Some(now - Duration::hours(24) - Duration::seconds(1)),
            false,
            now
        ));
    }
}
