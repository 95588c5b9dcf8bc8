//! Per-task execution policy and scheduler configuration.

use std::time::Duration;

use liber_core::defaults::{
    EVENT_BUS_CAPACITY, TASK_HARD_LIMIT_SECS, TASK_MAX_RETRIES, TASK_PRIORITY,
    TASK_RETRY_DELAY_SECS, TASK_SOFT_LIMIT_SECS, WORKER_COUNT, WORKER_POLL_INTERVAL_MS,
};
use liber_core::{Error, QueueName, RateLimit, Result};

/// Execution policy for one task type, fixed at registration time.
///
/// Routing, priority, rate limit, time limits, and retry discipline all live
/// here rather than on individual task instances, so every invocation of a
/// task name behaves the same way.
#[derive(Debug, Clone)]
pub struct TaskPolicy {
    /// Queue this task name routes to.
    pub queue: QueueName,
    /// 1-9; higher runs first among ready tasks on the same queue.
    pub priority: u8,
    /// Optional token-bucket limit, applied at submission.
    pub rate_limit: Option<RateLimit>,
    /// Cooperative checkpoint signal; handlers poll it and pause.
    pub soft_limit: Duration,
    /// Forced cancellation; enforced by the worker with a timeout.
    pub hard_limit: Duration,
    pub max_retries: u32,
    /// Delay before each retry attempt; the last entry repeats when
    /// attempts outnumber entries.
    pub retry_delays: Vec<Duration>,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            queue: QueueName::Default,
            priority: TASK_PRIORITY,
            rate_limit: None,
            soft_limit: Duration::from_secs(TASK_SOFT_LIMIT_SECS),
            hard_limit: Duration::from_secs(TASK_HARD_LIMIT_SECS),
            max_retries: TASK_MAX_RETRIES,
            retry_delays: vec![Duration::from_secs(TASK_RETRY_DELAY_SECS)],
        }
    }
}

impl TaskPolicy {
    pub fn new(queue: QueueName) -> Self {
        Self {
            queue,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_rate_limit(mut self, limit: RateLimit) -> Self {
        self.rate_limit = Some(limit);
        self
    }

    pub fn with_time_limits(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_limit = soft;
        self.hard_limit = hard;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Validate invariants checked at registration time.
    pub fn validate(&self) -> Result<()> {
        if !(1..=9).contains(&self.priority) {
            return Err(Error::Config(format!(
                "task priority must be 1-9 (got {})",
                self.priority
            )));
        }
        if self.soft_limit >= self.hard_limit {
            return Err(Error::Config(format!(
                "soft limit ({:?}) must be below hard limit ({:?})",
                self.soft_limit, self.hard_limit
            )));
        }
        if self.retry_delays.is_empty() && self.max_retries > 0 {
            return Err(Error::Config(
                "retry_delays must be non-empty when retries are allowed".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay before retry attempt `attempt` (0-based). The last configured
    /// delay repeats for attempts beyond the sequence.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.retry_delays.len().saturating_sub(1));
        self.retry_delays
            .get(idx)
            .copied()
            .unwrap_or(Duration::from_secs(TASK_RETRY_DELAY_SECS))
    }
}

/// Configuration for the scheduler worker pool.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of workers pulling from the ready queues.
    pub worker_count: usize,
    /// Per-worker queue assignment, by worker index. A worker with no
    /// entry (or an empty one) scans every queue. Assigning a worker away
    /// from `heavy_computation` keeps long rebuilds from occupying the
    /// whole pool.
    pub worker_queues: Vec<Vec<QueueName>>,
    /// Polling interval in milliseconds when all queues are empty.
    pub poll_interval_ms: u64,
    /// Event bus broadcast capacity.
    pub event_capacity: usize,
    /// Whether to enable task processing.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: WORKER_COUNT,
            worker_queues: Vec::new(),
            poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            event_capacity: EVENT_BUS_CAPACITY,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SCHEDULER_ENABLED` | `true` | Enable/disable task processing |
    /// | `SCHEDULER_WORKERS` | `4` | Worker pool size |
    /// | `SCHEDULER_POLL_INTERVAL_MS` | `500` | Polling interval when queues are empty |
    pub fn from_env() -> Self {
        let enabled = std::env::var("SCHEDULER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let worker_count = std::env::var("SCHEDULER_WORKERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(WORKER_COUNT)
            .max(1);

        let poll_interval_ms = std::env::var("SCHEDULER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WORKER_POLL_INTERVAL_MS);

        Self {
            worker_count,
            poll_interval_ms,
            enabled,
            ..Self::default()
        }
    }

    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count.max(1);
        self
    }

    /// Assign queues per worker index; workers beyond the list scan every
    /// queue.
    pub fn with_worker_queues(mut self, assignments: Vec<Vec<QueueName>>) -> Self {
        self.worker_queues = assignments;
        self
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}
