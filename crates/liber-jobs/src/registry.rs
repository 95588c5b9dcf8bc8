//! Task registry: name -> handler + policy, validated at registration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use liber_core::{Error, QueueName, Result};

use crate::handler::TaskHandler;
use crate::policy::TaskPolicy;

struct Registration {
    handler: Arc<dyn TaskHandler>,
    policy: TaskPolicy,
}

/// Immutable after construction: all task names, their handlers, and their
/// execution policies are registered up front, so `UnknownTask` and policy
/// misconfiguration surface at startup instead of at dispatch time.
#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<String, Registration>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler with its execution policy.
    ///
    /// Fails on a duplicate name or an invalid policy.
    pub fn register<H: TaskHandler + 'static>(&mut self, handler: H, policy: TaskPolicy) -> Result<()> {
        policy.validate()?;
        let name = handler.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(Error::Config(format!(
                "task already registered: {name}"
            )));
        }
        debug!(
            task_name = %name,
            queue = %policy.queue,
            priority = policy.priority,
            "Registered task handler"
        );
        self.entries.insert(
            name,
            Registration {
                handler: Arc::new(handler),
                policy,
            },
        );
        Ok(())
    }

    /// Look up a registered task.
    pub fn get(&self, name: &str) -> Option<(Arc<dyn TaskHandler>, &TaskPolicy)> {
        self.entries
            .get(name)
            .map(|r| (r.handler.clone(), &r.policy))
    }

    /// The execution policy for a task name.
    pub fn policy(&self, name: &str) -> Result<&TaskPolicy> {
        self.entries
            .get(name)
            .map(|r| &r.policy)
            .ok_or_else(|| Error::UnknownTask(name.to_string()))
    }

    /// The queue a task name routes to.
    pub fn route(&self, name: &str) -> Result<QueueName> {
        self.policy(name).map(|p| p.queue)
    }

    /// All registered task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
