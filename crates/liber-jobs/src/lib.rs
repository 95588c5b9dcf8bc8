//! # liber-jobs
//!
//! Task scheduling and batch orchestration for the Liber engine.
//!
//! This crate provides:
//! - A task registry binding names to handlers and execution policies
//! - Per-queue priority ready-queues drained by a worker pool
//! - Token-bucket rate limiting applied at submission
//! - Soft/hard time limits and retry discipline per task type
//! - A periodic clock with fixed-interval and cron-like triggers
//! - The generation service and batch orchestrator built on `liber-engine`
//!
//! ## Example
//!
//! ```ignore
//! use liber_jobs::{Scheduler, SchedulerConfig, TaskRegistry};
//!
//! let mut registry = TaskRegistry::new();
//! liber_jobs::register_default_tasks(&mut registry, /* deps */)?;
//! let scheduler = Arc::new(Scheduler::new(registry, SchedulerConfig::from_env()));
//! let handle = scheduler.start();
//! scheduler.submit("recommendations.generate_user", payload, None)?;
//! ```

pub mod batch;
pub mod clock;
pub mod generation;
pub mod handler;
pub mod policy;
pub mod queue;
pub mod queues;
pub mod rate_limit;
pub mod registry;
pub mod scheduler;

pub use batch::{BatchMode, BatchOptions, BatchOrchestrator, BatchOutcome};
pub use clock::{default_schedule, Clock, ClockHandle, ScheduleEntry, Trigger};
pub use generation::{
    register_default_tasks, GenerationService, GenerationStatus, InFlightRegistry,
    TASK_GENERATE_ALL, TASK_GENERATE_BATCH, TASK_GENERATE_USER, TASK_SIMILARITY_REBUILD,
};
pub use handler::{TaskContext, TaskHandler, TaskOutcome};
pub use policy::{SchedulerConfig, TaskPolicy};
pub use queue::ReadyQueues;
pub use queues::{default_bindings, QueueBinding};
pub use rate_limit::{RateLimiters, TokenBucket};
pub use registry::TaskRegistry;
pub use scheduler::{Scheduler, SchedulerEvent, SchedulerHandle, TaskHandle};
