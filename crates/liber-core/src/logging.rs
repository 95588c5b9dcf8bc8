//! Structured logging field name constants for the Liber engine.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback or retry applied |
//! | INFO  | Lifecycle events, operation completions, batch progress |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (candidate scoring, pair computation) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "engine", "scheduler", "db", "batch", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "generate", "rebuild", "submit", "dispatch"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// User UUID being operated on.
pub const USER_ID: &str = "user_id";

/// Book UUID being scored or vectorized.
pub const BOOK_ID: &str = "book_id";

/// Task UUID being processed.
pub const TASK_ID: &str = "task_id";

/// Registered task name.
pub const TASK_NAME: &str = "task_name";

/// Queue a task was routed to.
pub const QUEUE: &str = "queue";

/// Algorithm selector for a generation run.
pub const ALGORITHM: &str = "algorithm";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of recommendations produced by a run.
pub const RESULT_COUNT: &str = "result_count";

/// Number of candidates considered before truncation.
pub const CANDIDATE_COUNT: &str = "candidate_count";

/// Similarity matrix version in effect.
pub const MATRIX_VERSION: &str = "matrix_version";

/// Batch chunk index being processed.
pub const CHUNK_INDEX: &str = "chunk_index";

/// Users succeeded in a batch.
pub const SUCCEEDED: &str = "succeeded";

/// Users failed in a batch.
pub const FAILED: &str = "failed";

/// Users skipped (still fresh) in a batch.
pub const SKIPPED: &str = "skipped";

// ─── Scheduling fields ─────────────────────────────────────────────────────

/// Task priority (1-9).
pub const PRIORITY: &str = "priority";

/// Retry attempt number for a task execution.
pub const RETRY_COUNT: &str = "retry_count";

/// Seconds until a retried task becomes visible again.
pub const RETRY_DELAY_SECS: &str = "retry_delay_secs";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
