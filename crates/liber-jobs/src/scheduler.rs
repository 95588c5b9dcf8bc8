//! Task scheduler: submission, dispatch, and the worker pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use liber_core::defaults::TASK_RETRY_DELAY_SECS;
use liber_core::{Error, QueueName, Result, Task};
use serde_json::Value as JsonValue;

use crate::handler::{TaskContext, TaskOutcome};
use crate::policy::SchedulerConfig;
use crate::queue::ReadyQueues;
use crate::rate_limit::RateLimiters;
use crate::registry::TaskRegistry;

/// Handle returned by a successful submission.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    pub id: Uuid,
    pub name: String,
    pub queue: QueueName,
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A task was accepted and placed on its queue.
    TaskQueued { task_id: Uuid, name: String, queue: QueueName },
    /// A worker began executing a task.
    TaskStarted { task_id: Uuid, name: String, worker: usize },
    /// A task completed successfully.
    TaskCompleted { task_id: Uuid, name: String },
    /// A task failed and was re-queued for retry.
    TaskFailed {
        task_id: Uuid,
        name: String,
        error: String,
        retry_in: Duration,
    },
    /// A task failed with no retries remaining (or deterministically).
    TaskTerminallyFailed {
        task_id: Uuid,
        name: String,
        error: String,
    },
    /// A worker entered its loop.
    WorkerStarted { worker: usize },
    /// A worker exited its loop.
    WorkerStopped { worker: usize },
}

/// Handle for controlling a running scheduler.
///
/// Dropping the handle also stops the workers; hold it for the lifetime of
/// the pool.
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
}

impl SchedulerHandle {
    /// Signal all workers to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Routes submissions to queues and runs the worker pool that drains them.
///
/// Everything is explicit, immutable configuration: the registry and config
/// are fixed at construction, so tests can instantiate independent
/// schedulers without process-wide state.
pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    queues: Arc<ReadyQueues>,
    limiters: RateLimiters,
    config: SchedulerConfig,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl Scheduler {
    pub fn new(registry: TaskRegistry, config: SchedulerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        Self {
            registry: Arc::new(registry),
            queues: Arc::new(ReadyQueues::new()),
            limiters: RateLimiters::new(),
            config,
            event_tx,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// The ready queues, exposed for inspection.
    pub fn queues(&self) -> &ReadyQueues {
        &self.queues
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Submit one task invocation.
    ///
    /// The name must be registered (`UnknownTask` otherwise) and its rate
    /// limit, if any, is charged here: an empty bucket rejects the
    /// submission with `RateLimited` instead of queueing it.
    pub fn submit(
        &self,
        name: &str,
        args: JsonValue,
        queue_override: Option<QueueName>,
    ) -> Result<TaskHandle> {
        let policy = self.registry.policy(name)?;
        self.limiters.check(name, policy.rate_limit.as_ref())?;

        let task = Task {
            id: Uuid::new_v4(),
            name: name.to_string(),
            queue: queue_override.unwrap_or(policy.queue),
            priority: policy.priority,
            payload: args,
            retry_count: 0,
            max_retries: policy.max_retries,
            enqueued_at: Utc::now(),
            not_before: None,
        };
        let handle = TaskHandle {
            id: task.id,
            name: task.name.clone(),
            queue: task.queue,
        };

        debug!(
            task_id = %task.id,
            task_name = %task.name,
            queue = %task.queue,
            priority = task.priority,
            "Task queued"
        );
        let _ = self.event_tx.send(SchedulerEvent::TaskQueued {
            task_id: task.id,
            name: task.name.clone(),
            queue: task.queue,
        });
        self.queues.push(task);
        Ok(handle)
    }

    /// Start the worker pool and return a handle for control.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, _) = broadcast::channel(1);
        let event_rx = self.event_tx.subscribe();

        if !self.config.enabled {
            info!("Scheduler is disabled, not starting workers");
            return SchedulerHandle {
                shutdown_tx,
                event_rx,
            };
        }

        info!(
            workers = self.config.worker_count,
            poll_interval_ms = self.config.poll_interval_ms,
            "Scheduler started"
        );
        for worker in 0..self.config.worker_count {
            let scheduler = self.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                scheduler.worker_loop(worker, shutdown_rx).await;
            });
        }

        SchedulerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    #[instrument(skip(self, shutdown_rx))]
    async fn worker_loop(&self, worker: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(worker, "Worker started");
        let _ = self.event_tx.send(SchedulerEvent::WorkerStarted { worker });
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        // Workers without an assignment (or with an empty one) scan every queue.
        let queues: &[QueueName] = match self.config.worker_queues.get(worker) {
            Some(assigned) if !assigned.is_empty() => assigned,
            _ => &QueueName::ALL,
        };

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(_) => {}
            }

            match self.queues.pop_ready(queues, Utc::now()) {
                Some(task) => self.execute(worker, task).await,
                None => {
                    // Queues empty: wake on enqueue, or poll for delayed
                    // tasks becoming visible.
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = self.queues.notified() => {}
                        _ = sleep(poll_interval) => {}
                    }
                }
            }
        }
        debug!(worker, "Worker stopped");
        let _ = self.event_tx.send(SchedulerEvent::WorkerStopped { worker });
    }

    async fn execute(&self, worker: usize, mut task: Task) {
        let Some((handler, policy)) = self.registry.get(&task.name) else {
            // Names are validated at submission; reaching this means the
            // task was enqueued through another path.
            error!(task_name = %task.name, "No handler for queued task");
            let _ = self.event_tx.send(SchedulerEvent::TaskTerminallyFailed {
                task_id: task.id,
                name: task.name.clone(),
                error: Error::UnknownTask(task.name.clone()).to_string(),
            });
            return;
        };
        let policy = policy.clone();

        info!(
            task_id = %task.id,
            task_name = %task.name,
            queue = %task.queue,
            retry_count = task.retry_count,
            worker,
            "Processing task"
        );
        let _ = self.event_tx.send(SchedulerEvent::TaskStarted {
            task_id: task.id,
            name: task.name.clone(),
            worker,
        });

        let start = Instant::now();
        let ctx = TaskContext::new(task.clone())
            .with_soft_deadline(start + policy.soft_limit);

        let outcome = match timeout(policy.hard_limit, handler.execute(ctx)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = Error::Timeout {
                    task: task.name.clone(),
                    limit: policy.hard_limit,
                };
                TaskOutcome::Failed(err.to_string())
            }
        };

        let elapsed = start.elapsed();
        if elapsed > policy.soft_limit {
            warn!(
                task_id = %task.id,
                task_name = %task.name,
                duration_ms = elapsed.as_millis() as u64,
                "Task ran past its soft time limit"
            );
        }

        match outcome {
            TaskOutcome::Success(_) => {
                info!(
                    task_id = %task.id,
                    task_name = %task.name,
                    duration_ms = elapsed.as_millis() as u64,
                    success = true,
                    "Task completed"
                );
                let _ = self.event_tx.send(SchedulerEvent::TaskCompleted {
                    task_id: task.id,
                    name: task.name.clone(),
                });
            }
            TaskOutcome::Failed(err) if task.retry_count < task.max_retries => {
                let delay = policy.retry_delay(task.retry_count);
                task.retry_count += 1;
                task.not_before = Some(
                    Utc::now()
                        + ChronoDuration::from_std(delay).unwrap_or_else(|_| {
                            ChronoDuration::seconds(TASK_RETRY_DELAY_SECS as i64)
                        }),
                );
                warn!(
                    task_id = %task.id,
                    task_name = %task.name,
                    error = %err,
                    retry_count = task.retry_count,
                    retry_delay_secs = delay.as_secs(),
                    "Task failed, re-queued for retry"
                );
                let event = SchedulerEvent::TaskFailed {
                    task_id: task.id,
                    name: task.name.clone(),
                    error: err,
                    retry_in: delay,
                };
                self.queues.push(task);
                let _ = self.event_tx.send(event);
            }
            TaskOutcome::Failed(err) | TaskOutcome::Terminal(err) => {
                error!(
                    task_id = %task.id,
                    task_name = %task.name,
                    error = %err,
                    retry_count = task.retry_count,
                    success = false,
                    "Task terminally failed"
                );
                let _ = self.event_tx.send(SchedulerEvent::TaskTerminallyFailed {
                    task_id: task.id,
                    name: task.name.clone(),
                    error: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::handler::{NoOpHandler, TaskHandler};
    use crate::policy::TaskPolicy;
    use liber_core::RateLimit;

    /// Succeeds after failing a configured number of times.
    struct FlakyHandler {
        name: String,
        fail_times: u32,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                TaskOutcome::Failed(format!("transient failure {call}"))
            } else {
                TaskOutcome::Success(None)
            }
        }
    }

    struct SlowHandler {
        name: String,
    }

    #[async_trait]
    impl TaskHandler for SlowHandler {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
            sleep(Duration::from_secs(60)).await;
            TaskOutcome::Success(None)
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig::default()
            .with_workers(1)
            .with_poll_interval(10)
    }

    /// Wait for the first event matching `pred`, with a test timeout.
    async fn wait_for<F>(rx: &mut broadcast::Receiver<SchedulerEvent>, mut pred: F) -> SchedulerEvent
    where
        F: FnMut(&SchedulerEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("event bus closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for scheduler event")
    }

    #[tokio::test]
    async fn test_submit_unknown_task() {
        let scheduler = Scheduler::new(TaskRegistry::new(), fast_config());
        let err = scheduler.submit("nope", json!({}), None).unwrap_err();
        assert!(matches!(err, Error::UnknownTask(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_submit_routes_by_policy() {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                NoOpHandler::new("similarity.rebuild"),
                TaskPolicy::new(QueueName::HeavyComputation),
            )
            .unwrap();
        let scheduler = Scheduler::new(registry, fast_config());

        let handle = scheduler.submit("similarity.rebuild", json!({}), None).unwrap();
        assert_eq!(handle.queue, QueueName::HeavyComputation);
        assert_eq!(scheduler.queues().len(QueueName::HeavyComputation), 1);
        assert_eq!(scheduler.queues().len(QueueName::Recommendations), 0);

        let handle = scheduler
            .submit("similarity.rebuild", json!({}), Some(QueueName::Maintenance))
            .unwrap();
        assert_eq!(handle.queue, QueueName::Maintenance);
        assert_eq!(scheduler.queues().len(QueueName::Maintenance), 1);
    }

    #[tokio::test]
    async fn test_submit_rate_limited() {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                NoOpHandler::new("t"),
                TaskPolicy::default().with_rate_limit(RateLimit::per_hour(2)),
            )
            .unwrap();
        let scheduler = Scheduler::new(registry, fast_config());

        scheduler.submit("t", json!({}), None).unwrap();
        scheduler.submit("t", json!({}), None).unwrap();
        let err = scheduler.submit("t", json!({}), None).unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        // Rejected submissions are not queued.
        assert_eq!(scheduler.queues().total_len(), 2);
    }

    #[tokio::test]
    async fn test_worker_executes_submitted_task() {
        let mut registry = TaskRegistry::new();
        registry
            .register(NoOpHandler::new("t"), TaskPolicy::default())
            .unwrap();
        let scheduler = Arc::new(Scheduler::new(registry, fast_config()));
        let handle = scheduler.start();
        let mut events = handle.events();

        let submitted = scheduler.submit("t", json!({}), None).unwrap();
        let event = wait_for(&mut events, |e| {
            matches!(e, SchedulerEvent::TaskCompleted { task_id, .. } if *task_id == submitted.id)
        })
        .await;
        assert!(matches!(event, SchedulerEvent::TaskCompleted { .. }));
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = TaskRegistry::new();
        registry
            .register(
                FlakyHandler {
                    name: "flaky".into(),
                    fail_times: 2,
                    calls: calls.clone(),
                },
                TaskPolicy::default()
                    .with_max_retries(3)
                    .with_retry_delays(vec![Duration::ZERO]),
            )
            .unwrap();
        let scheduler = Arc::new(Scheduler::new(registry, fast_config()));
        let handle = scheduler.start();
        let mut events = handle.events();

        let submitted = scheduler.submit("flaky", json!({}), None).unwrap();
        wait_for(&mut events, |e| {
            matches!(e, SchedulerEvent::TaskCompleted { task_id, .. } if *task_id == submitted.id)
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_terminal() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = TaskRegistry::new();
        registry
            .register(
                FlakyHandler {
                    name: "doomed".into(),
                    fail_times: u32::MAX,
                    calls: calls.clone(),
                },
                TaskPolicy::default()
                    .with_max_retries(2)
                    .with_retry_delays(vec![Duration::ZERO]),
            )
            .unwrap();
        let scheduler = Arc::new(Scheduler::new(registry, fast_config()));
        let handle = scheduler.start();
        let mut events = handle.events();

        let submitted = scheduler.submit("doomed", json!({}), None).unwrap();
        wait_for(&mut events, |e| {
            matches!(e, SchedulerEvent::TaskTerminallyFailed { task_id, .. } if *task_id == submitted.id)
        })
        .await;
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_hard_limit_cancels_task() {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                SlowHandler { name: "slow".into() },
                TaskPolicy::default()
                    .with_time_limits(Duration::from_millis(20), Duration::from_millis(50))
                    .with_max_retries(0),
            )
            .unwrap();
        let scheduler = Arc::new(Scheduler::new(registry, fast_config()));
        let handle = scheduler.start();
        let mut events = handle.events();

        let submitted = scheduler.submit("slow", json!({}), None).unwrap();
        let event = wait_for(&mut events, |e| {
            matches!(e, SchedulerEvent::TaskTerminallyFailed { task_id, .. } if *task_id == submitted.id)
        })
        .await;
        if let SchedulerEvent::TaskTerminallyFailed { error, .. } = event {
            assert!(error.contains("timed out"), "unexpected error: {error}");
        }
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_hard_limit_fires_on_offloaded_blocking_work() {
        /// Offloads CPU-bound work the way heavy handlers do.
        struct BlockingHandler {
            name: String,
        }

        #[async_trait]
        impl TaskHandler for BlockingHandler {
            fn name(&self) -> &str {
                &self.name
            }

            async fn execute(&self, _ctx: TaskContext) -> TaskOutcome {
                let work = tokio::task::spawn_blocking(|| {
                    std::thread::sleep(Duration::from_secs(60));
                });
                match work.await {
                    Ok(()) => TaskOutcome::Success(None),
                    Err(e) => TaskOutcome::Failed(e.to_string()),
                }
            }
        }

        let mut registry = TaskRegistry::new();
        registry
            .register(
                BlockingHandler { name: "crunch".into() },
                TaskPolicy::default()
                    .with_time_limits(Duration::from_millis(20), Duration::from_millis(50))
                    .with_max_retries(0),
            )
            .unwrap();
        let scheduler = Arc::new(Scheduler::new(registry, fast_config()));
        let handle = scheduler.start();
        let mut events = handle.events();

        let submitted = scheduler.submit("crunch", json!({}), None).unwrap();
        let event = wait_for(&mut events, |e| {
            matches!(e, SchedulerEvent::TaskTerminallyFailed { task_id, .. } if *task_id == submitted.id)
        })
        .await;
        if let SchedulerEvent::TaskTerminallyFailed { error, .. } = event {
            assert!(error.contains("timed out"), "unexpected error: {error}");
        }
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_worker_queue_assignment_isolates_queues() {
        let mut registry = TaskRegistry::new();
        registry
            .register(
                NoOpHandler::new("rec"),
                TaskPolicy::new(QueueName::Recommendations),
            )
            .unwrap();
        registry
            .register(
                NoOpHandler::new("heavy"),
                TaskPolicy::new(QueueName::HeavyComputation),
            )
            .unwrap();
        let config = fast_config()
            .with_worker_queues(vec![vec![QueueName::Recommendations]]);
        let scheduler = Arc::new(Scheduler::new(registry, config));
        let handle = scheduler.start();
        let mut events = handle.events();

        scheduler.submit("heavy", json!({}), None).unwrap();
        let rec = scheduler.submit("rec", json!({}), None).unwrap();
        wait_for(&mut events, |e| {
            matches!(e, SchedulerEvent::TaskCompleted { task_id, .. } if *task_id == rec.id)
        })
        .await;

        // The only worker is assigned away from heavy_computation, so that
        // submission stays queued.
        assert_eq!(scheduler.queues().len(QueueName::HeavyComputation), 1);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_disabled_scheduler_queues_without_processing() {
        let mut registry = TaskRegistry::new();
        registry
            .register(NoOpHandler::new("t"), TaskPolicy::default())
            .unwrap();
        let scheduler =
            Arc::new(Scheduler::new(registry, fast_config().with_enabled(false)));
        let _handle = scheduler.start();

        scheduler.submit("t", json!({}), None).unwrap();
        sleep(Duration::from_millis(50)).await;
        assert_eq!(scheduler.queues().total_len(), 1);
    }
}
