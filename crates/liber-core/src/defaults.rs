//! Centralized default constants for the Liber engine.
//!
//! **This module is the single source of truth** for shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// RECOMMENDATION GENERATION
// =============================================================================

/// Default number of items per recommendation set.
pub const RECOMMENDATION_COUNT: usize = 20;

/// Default generation context label for ad hoc runs.
pub const CONTEXT_ON_DEMAND: &str = "on_demand";

/// Generation context label for the periodic daily batch.
pub const CONTEXT_DAILY_BATCH: &str = "daily_batch";

/// Hours a recommendation set stays fresh. Exactly this boundary is still
/// fresh; strictly more elapsed time triggers regeneration.
pub const FRESHNESS_WINDOW_HOURS: i64 = 24;

// =============================================================================
// SIMILARITY PIPELINE
// =============================================================================

/// Dimension of the hashed bag-of-features item vectors.
pub const VECTOR_DIMENSION: usize = 128;

/// Items per block in the chunked similarity rebuild. Checkpoints are
/// possible between blocks.
pub const SIMILARITY_BLOCK_SIZE: usize = 256;

/// Pairs below this similarity are not stored (sparsity cutoff).
pub const SIMILARITY_MIN_SCORE: f32 = 0.05;

// =============================================================================
// BATCH ORCHESTRATION
// =============================================================================

/// Default users per batch chunk.
pub const BATCH_CHUNK_SIZE: usize = 50;

// =============================================================================
// TASK SCHEDULING
// =============================================================================

/// Default maximum retry count for failed tasks.
pub const TASK_MAX_RETRIES: u32 = 3;

/// Default fixed delay between retry attempts, in seconds.
pub const TASK_RETRY_DELAY_SECS: u64 = 60;

/// Default task priority (1 = background, 9 = latency-sensitive).
pub const TASK_PRIORITY: u8 = 5;

/// Priority used for in-app latency-sensitive generation.
pub const TASK_PRIORITY_INTERACTIVE: u8 = 9;

/// Priority used for heavy maintenance work.
pub const TASK_PRIORITY_BACKGROUND: u8 = 1;

/// Default soft time limit in seconds (cooperative checkpoint signal).
pub const TASK_SOFT_LIMIT_SECS: u64 = 240;

/// Default hard time limit in seconds (forced cancellation).
pub const TASK_HARD_LIMIT_SECS: u64 = 300;

/// Default worker count in the scheduler pool.
pub const WORKER_COUNT: usize = 4;

/// Worker poll interval in milliseconds when all queues are empty.
///
/// Workers are woken by a notify handle on enqueue; this interval is only a
/// safety net for delayed-visibility (`not_before`) tasks becoming ready.
pub const WORKER_POLL_INTERVAL_MS: u64 = 500;

/// Default scheduler event bus broadcast capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Default rate limit for generation tasks: invocations per minute.
pub const GENERATION_RATE_PER_MINUTE: u32 = 100;

/// Default rate limit for similarity rebuilds: invocations per hour.
pub const SIMILARITY_REBUILD_RATE_PER_HOUR: u32 = 2;
