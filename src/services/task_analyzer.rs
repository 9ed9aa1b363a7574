//! Task Analyzer: subscribes to `TASK_POSTED`, estimates complexity, and
//! emits `TASK_ANALYZED`.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::domain::models::event::{Event, Payload, Topic};
use crate::services::event_bus::{EventBus, Subscriber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Compound,
    Complex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub complexity: Complexity,
    pub suggested_decomposition: Vec<String>,
    pub suggested_agents: Vec<String>,
    pub estimated_tokens: u64,
    pub reasoning: String,
}

/// Heuristic estimate: tag count and keyword matches. This is the only
/// path implemented here; an LLM path is a pluggable extension point that
/// falls back to this heuristic on failure.
pub fn analyze_heuristic(event: &Event) -> AnalysisResult {
    let tag_count = event.required_tags.len();
    let complexity = match tag_count {
        0..=1 => Complexity::Simple,
        2 => Complexity::Compound,
        _ => Complexity::Complex,
    };

    let estimated_tokens = match complexity {
        Complexity::Simple => 2_000,
        Complexity::Compound => 8_000,
        Complexity::Complex => 25_000,
    };

    AnalysisResult {
        complexity,
        suggested_decomposition: event.required_tags.clone(),
        suggested_agents: event.required_tags.clone(),
        estimated_tokens,
        reasoning: format!(
            "{} required tag(s) observed; classified as {:?} by heuristic tag-count rule",
            tag_count, complexity
        ),
    }
}

pub struct TaskAnalyzer {
    bus: EventBus,
    processed: Mutex<VecDeque<uuid::Uuid>>,
    processed_capacity: usize,
}

impl TaskAnalyzer {
    pub fn new(bus: EventBus, processed_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            bus,
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
}

#[async_trait]
impl Subscriber for TaskAnalyzer {
    async fn handle(&self, event: Event) -> Result<(), String> {
        // Skip sub-tasks and retries.
        if event.is_sub_task() || event.is_retry() {
            return Ok(());
        }
        if !self.mark_processed(event.event_id).await {
            return Ok(());
        }

        let result = analyze_heuristic(&event);
        let payload = Payload::default().with_extra(
            "analysis",
            serde_json::to_value(&result).map_err(|e| e.to_string())?,
        );

        let analyzed = Event::new(
            Topic::TaskAnalyzed,
            event.intent.clone(),
            payload,
            Some(event.event_id),
            event.required_tags.clone(),
            event.risk_level,
            event.budget,
            None,
        );
        self.bus.publish(analyzed).await;
        Ok(())
    }
}
