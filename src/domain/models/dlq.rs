//! Dead-letter entry domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Event;

/// FIFO bound for the dead-letter queue.
pub const DLQ_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub event: Event,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(event: Event, reason: impl Into<String>) -> Self {
        Self {
            event,
            reason: reason.into(),
            recorded_at: Utc::now(),
        }
    }
}
