//! Static broker binding attributes for the named queues.
//!
//! Consumed by the message-broker integration when queues are declared; the
//! scheduler core only ever interprets the queue name itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use liber_core::QueueName;

/// Declaration attributes for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBinding {
    pub exchange: String,
    pub routing_key: String,
    /// Broker-side max priority; queues whose tasks carry one priority
    /// don't need priority support at the broker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority: Option<u8>,
    /// Message time-to-live in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ttl_ms: Option<u64>,
}

impl QueueBinding {
    fn new(exchange: &str, routing_key: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            max_priority: None,
            message_ttl_ms: None,
        }
    }

    fn with_max_priority(mut self, max: u8) -> Self {
        self.max_priority = Some(max);
        self
    }

    fn with_message_ttl_ms(mut self, ttl: u64) -> Self {
        self.message_ttl_ms = Some(ttl);
        self
    }
}

/// The stock binding map for every named queue.
pub fn default_bindings() -> BTreeMap<String, QueueBinding> {
    let mut map = BTreeMap::new();
    for queue in QueueName::ALL {
        let binding = match queue {
            QueueName::Recommendations => {
                QueueBinding::new("liber.tasks", "task.recommendations").with_max_priority(9)
            }
            QueueName::HeavyComputation => {
                QueueBinding::new("liber.tasks", "task.heavy_computation")
            }
            QueueName::Analytics => QueueBinding::new("liber.tasks", "task.analytics"),
            QueueName::Maintenance => QueueBinding::new("liber.tasks", "task.maintenance"),
            // Stale notifications are worthless; let the broker drop them.
            QueueName::Notifications => QueueBinding::new("liber.tasks", "task.notifications")
                .with_message_ttl_ms(15 * 60 * 1000),
            QueueName::Monitoring => QueueBinding::new("liber.tasks", "task.monitoring"),
            QueueName::Default => QueueBinding::new("liber.tasks", "task.default"),
        };
        map.insert(queue.as_str().to_string(), binding);
    }
    map
}
