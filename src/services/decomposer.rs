//! Decomposer: subscribes to `TASK_POSTED`, splits a root task into
//! per-tag-category sub-tasks when in "team" mode.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::models::event::{Event, EventStatus, Payload, Topic};
use crate::services::event_bus::{EventBus, Subscriber};
use crate::services::execution_mode::{ExecutionMode, ExecutionModeHandle};

pub struct Decomposer {
    bus: EventBus,
    mode: ExecutionModeHandle,
    processed: Mutex<VecDeque<uuid::Uuid>>,
    processed_capacity: usize,
}

impl Decomposer {
    pub fn new(bus: EventBus, mode: ExecutionModeHandle, processed_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            bus,
            mode,
            processed: Mutex::new(VecDeque::new()),
            processed_capacity,
        })
    }

    async fn mark_processed(&self, id: uuid::Uuid) -> bool {
        let mut processed = self.processed.lock().await;
        if processed.contains(&id) {
            return false;
        }
        processed.push_back(id);
        while processed.len() > self.processed_capacity {
            let evict = self.processed_capacity / 4;
            for _ in 0..evict.max(1) {
                processed.pop_front();
            }
        }
        true
    }

    /// Distinct tag categories present on the root event's required tags.
    /// Every tag is its own category in this scheme — decomposition fires
    /// whenever two or more distinct tags are present.
    fn categories(event: &Event) -> Vec<String> {
        event.required_tags.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }
}

#[async_trait]
impl Subscriber for Decomposer {
    async fn handle(&self, event: Event) -> Result<(), String> {
        if event.is_sub_task() || event.is_retry() {
            return Ok(());
        }
        if self.mode.get() != ExecutionMode::Team {
            return Ok(());
        }
        if !self.mark_processed(event.event_id).await {
            return Ok(());
        }

        let categories = Self::categories(&event);
        if categories.len() < 2 {
            return Ok(());
        }

        // Synchronous mutation before any await: mark the root RESOLVING so
        // a concurrently-running Matcher sees it as already spoken for.
        self.bus
            .set_status(event.event_id, EventStatus::Resolving)
            .await
            .map_err(|e| e.to_string())?;

        let decomposed = Event::new(
            Topic::TaskDecomposed,
            event.intent.clone(),
            Payload::default().with_extra(
                "categories",
                serde_json::to_value(&categories).map_err(|e| e.to_string())?,
            ),
            Some(event.event_id),
            event.required_tags.clone(),
            event.risk_level,
            event.budget,
            None,
        );
        self.bus.publish(decomposed).await;

        for category in &categories {
            let sub = Event::new(
                Topic::TaskPosted,
                format!("{} ({})", event.intent, category),
                Payload::default(),
                Some(event.event_id),
                vec![category.clone()],
                event.risk_level,
                event.budget,
                None,
            );
            self.bus.publish(sub).await;
        }

        Ok(())
    }
}
