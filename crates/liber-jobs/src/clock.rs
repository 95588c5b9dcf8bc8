//! Periodic clock: fires schedule entries and submits the resulting tasks.
//!
//! Runs as a single logical leader per process. Triggers that elapsed while
//! no clock was running are not retroactively fired; after any gap only the
//! next matching trigger time counts (skip-missed semantics).

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc, Weekday};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use liber_core::{Error, QueueName, Result};

use crate::scheduler::Scheduler;

/// When a schedule entry fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed interval, measured from the previous fire (or clock start).
    Every(ChronoDuration),
    /// Cron-like wall-clock expression: fire at `hour:minute` UTC on the
    /// given weekdays (all days when `weekdays` is `None`).
    Cron {
        minute: u32,
        hour: u32,
        weekdays: Option<Vec<Weekday>>,
    },
}

impl Trigger {
    /// Every day at `hour:minute` UTC.
    pub fn daily_at(hour: u32, minute: u32) -> Self {
        Trigger::Cron {
            minute,
            hour,
            weekdays: None,
        }
    }

    /// Once a week at `hour:minute` UTC on `weekday`.
    pub fn weekly_at(weekday: Weekday, hour: u32, minute: u32) -> Self {
        Trigger::Cron {
            minute,
            hour,
            weekdays: Some(vec![weekday]),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::Every(interval) => {
                if *interval <= ChronoDuration::zero() {
                    return Err(Error::Config(
                        "interval trigger must be positive".to_string(),
                    ));
                }
            }
            Trigger::Cron {
                minute,
                hour,
                weekdays,
            } => {
                if *minute >= 60 || *hour >= 24 {
                    return Err(Error::Config(format!(
                        "cron trigger out of range: {hour:02}:{minute:02}"
                    )));
                }
                if matches!(weekdays, Some(days) if days.is_empty()) {
                    return Err(Error::Config(
                        "cron trigger weekday list must be non-empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The first fire time strictly after `after`.
    ///
    /// Computing from the current time rather than the previous fire time is
    /// what gives the skip-missed behavior: a trigger that elapsed three
    /// times during downtime yields exactly one next fire.
    pub fn next_fire_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Every(interval) => after + *interval,
            Trigger::Cron {
                minute,
                hour,
                weekdays,
            } => {
                for day_offset in 0..=7 {
                    let date = after.date_naive() + ChronoDuration::days(day_offset);
                    let Some(naive) = date.and_hms_opt(*hour, *minute, 0) else {
                        continue;
                    };
                    let candidate = Utc.from_utc_datetime(&naive);
                    if candidate <= after {
                        continue;
                    }
                    let day_matches = weekdays
                        .as_ref()
                        .map_or(true, |days| days.contains(&candidate.weekday()));
                    if day_matches {
                        return candidate;
                    }
                }
                // Unreachable for a validated trigger: an 8-day window
                // always contains every weekday.
                after + ChronoDuration::days(7)
            }
        }
    }
}

/// One line of the periodic schedule.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    /// Registered task name to submit.
    pub task: String,
    pub trigger: Trigger,
    /// Default arguments passed as the task payload.
    pub args: JsonValue,
    pub queue_override: Option<QueueName>,
}

impl ScheduleEntry {
    pub fn new(task: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            task: task.into(),
            trigger,
            args: JsonValue::Object(Default::default()),
            queue_override: None,
        }
    }

    pub fn with_args(mut self, args: JsonValue) -> Self {
        self.args = args;
        self
    }
}

/// The stock schedule: nightly batch generation, weekly matrix rebuild.
pub fn default_schedule() -> Vec<ScheduleEntry> {
    vec![
        ScheduleEntry::new(
            "recommendations.generate_all",
            Trigger::daily_at(2, 0),
        )
        .with_args(serde_json::json!({ "active_only": true })),
        ScheduleEntry::new("similarity.rebuild", Trigger::weekly_at(Weekday::Sun, 3, 0)),
    ]
}

/// Handle for stopping a running clock.
pub struct ClockHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ClockHandle {
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("clock already stopped".to_string()))
    }
}

/// The periodic clock. Owns its schedule; submits through the scheduler.
pub struct Clock {
    scheduler: Arc<Scheduler>,
    entries: Vec<ScheduleEntry>,
}

impl Clock {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            entries: Vec::new(),
        }
    }

    /// Add one schedule entry. Fails on an invalid trigger or a task name
    /// the scheduler does not know.
    pub fn add_entry(&mut self, entry: ScheduleEntry) -> Result<()> {
        entry.trigger.validate()?;
        self.scheduler.registry().route(&entry.task)?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn with_schedule(mut self, entries: Vec<ScheduleEntry>) -> Result<Self> {
        for entry in entries {
            self.add_entry(entry)?;
        }
        Ok(self)
    }

    /// Start the clock loop and return a handle for control.
    pub fn start(self) -> ClockHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });
        ClockHandle { shutdown_tx }
    }

    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if self.entries.is_empty() {
            info!("Clock has no schedule entries, not starting");
            return;
        }
        info!(entries = self.entries.len(), "Periodic clock started");

        let mut next_fires: Vec<DateTime<Utc>> = self
            .entries
            .iter()
            .map(|e| e.trigger.next_fire_after(Utc::now()))
            .collect();

        loop {
            let soonest = match next_fires.iter().min() {
                Some(t) => *t,
                None => break,
            };
            let wait = (soonest - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Clock received shutdown signal");
                    break;
                }
                _ = sleep(wait) => {}
            }

            let now = Utc::now();
            for (i, entry) in self.entries.iter().enumerate() {
                if next_fires[i] > now {
                    continue;
                }
                debug!(task_name = %entry.task, "Clock trigger fired");
                match self
                    .scheduler
                    .submit(&entry.task, entry.args.clone(), entry.queue_override)
                {
                    Ok(handle) => {
                        info!(task_name = %entry.task, task_id = %handle.id, "Periodic task submitted");
                    }
                    Err(Error::RateLimited { retry_after, .. }) => {
                        warn!(
                            task_name = %entry.task,
                            retry_delay_secs = retry_after.as_secs(),
                            "Periodic task rate limited, skipping this fire"
                        );
                    }
                    Err(e) => {
                        warn!(task_name = %entry.task, error = %e, "Periodic task submission failed");
                    }
                }
                next_fires[i] = entry.trigger.next_fire_after(now);
            }
        }
        info!("Periodic clock stopped");
    }
}
