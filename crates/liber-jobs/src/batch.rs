//! Batch orchestration: chunked generation over many users.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use liber_core::defaults::{BATCH_CHUNK_SIZE, CONTEXT_DAILY_BATCH, RECOMMENDATION_COUNT};
use liber_core::{Algorithm, Error, Result, UserProfile};

use crate::generation::{GenerationService, GenerationStatus, TASK_GENERATE_BATCH};
use crate::scheduler::{Scheduler, TaskHandle};

/// How batch work is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Process chunks inline and return the final tally.
    Sync,
    /// Submit one `recommendations.generate_batch` task per chunk and
    /// return the task handles; workers do the processing.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub algorithm: Algorithm,
    pub count: usize,
    pub context: String,
    pub chunk_size: usize,
    /// Bypass the freshness filter.
    pub force: bool,
    /// Run selection and logging only; nothing is computed or persisted.
    pub dry_run: bool,
    pub mode: BatchMode,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Hybrid,
            count: RECOMMENDATION_COUNT,
            context: CONTEXT_DAILY_BATCH.to_string(),
            chunk_size: BATCH_CHUNK_SIZE,
            force: false,
            dry_run: false,
            mode: BatchMode::Sync,
        }
    }
}

/// Tally of one batch run.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Users that passed selection (eligible and stale, or forced).
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Users dropped by selection: opted out, or still fresh.
    pub skipped: usize,
    /// Per-user errors from a sync run.
    pub failures: Vec<(Uuid, String)>,
    /// Chunk tasks submitted by a deferred run.
    pub deferred: Vec<TaskHandle>,
}

/// Runs generation over a user population in chunks.
///
/// One user's failure never aborts the batch: it is tallied and the run
/// continues. Chunking bounds memory and gives natural progress/checkpoint
/// boundaries; in deferred mode each chunk becomes its own scheduler task.
pub struct BatchOrchestrator {
    service: Arc<GenerationService>,
    scheduler: Option<Arc<Scheduler>>,
}

impl BatchOrchestrator {
    pub fn new(service: Arc<GenerationService>) -> Self {
        Self {
            service,
            scheduler: None,
        }
    }

    /// Attach a scheduler, enabling deferred mode.
    pub fn with_scheduler(mut self, scheduler: Arc<Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[instrument(skip(self, users, options), fields(users = users.len(), context = %options.context))]
    pub async fn run(&self, users: &[UserProfile], options: &BatchOptions) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        let mut selected = Vec::new();
        for user in users {
            if !user.recommendations_enabled {
                outcome.skipped += 1;
                continue;
            }
            if self.service.needs_generation(user.id, options.force).await? {
                selected.push(user);
            } else {
                outcome.skipped += 1;
            }
        }
        outcome.selected = selected.len();

        if options.dry_run {
            info!(
                selected = outcome.selected,
                skipped = outcome.skipped,
                "Dry run: batch selection only"
            );
            return Ok(outcome);
        }

        match options.mode {
            BatchMode::Sync => self.run_sync(&selected, options, &mut outcome).await,
            BatchMode::Deferred => self.run_deferred(&selected, options, &mut outcome)?,
        }

        info!(
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            skipped = outcome.skipped,
            deferred = outcome.deferred.len(),
            "Batch run complete"
        );
        Ok(outcome)
    }

    async fn run_sync(
        &self,
        selected: &[&UserProfile],
        options: &BatchOptions,
        outcome: &mut BatchOutcome,
    ) {
        let chunk_size = options.chunk_size.max(1);
        for (chunk_index, chunk) in selected.chunks(chunk_size).enumerate() {
            for user in chunk {
                match self
                    .service
                    .generate_for_user(
                        user,
                        options.algorithm,
                        options.count,
                        &options.context,
                        options.force,
                        false,
                    )
                    .await
                {
                    Ok(GenerationStatus::Generated { .. }) => outcome.succeeded += 1,
                    // Another path generated for this user since selection.
                    Ok(_) => outcome.skipped += 1,
                    Err(e) => {
                        warn!(user_id = %user.id, error = %e, "Batch user failed");
                        outcome.failed += 1;
                        outcome.failures.push((user.id, e.to_string()));
                    }
                }
            }
            info!(
                chunk_index,
                succeeded = outcome.succeeded,
                failed = outcome.failed,
                "Batch chunk processed"
            );
        }
    }

    fn run_deferred(
        &self,
        selected: &[&UserProfile],
        options: &BatchOptions,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or_else(|| Error::Config("deferred batch requires a scheduler".to_string()))?;

        let chunk_size = options.chunk_size.max(1);
        for chunk in selected.chunks(chunk_size) {
            let user_ids: Vec<Uuid> = chunk.iter().map(|u| u.id).collect();
            let handle = scheduler.submit(
                TASK_GENERATE_BATCH,
                json!({
                    "user_ids": user_ids,
                    "algorithm": options.algorithm,
                    "count": options.count,
                    "context": options.context,
                    "force": options.force,
                }),
                None,
            )?;
            outcome.deferred.push(handle);
        }
        Ok(())
    }
}
