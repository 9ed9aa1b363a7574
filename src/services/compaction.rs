//! Compaction: a periodic tick that frees rolling token-cost budget from
//! idle agents whose 7-day usage has crossed a threshold, emitting
//! `COMPACTION_TICK` for each agent it touches.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::models::event::{Event, Payload, RiskLevel, Topic};
use crate::services::event_bus::EventBus;
use crate::services::matcher::Matcher;

pub struct CompactionSvc {
    bus: EventBus,
    matcher: Arc<Matcher>,
    token_cost_threshold: u64,
    interval: Duration,
}

impl CompactionSvc {
    pub fn new(bus: EventBus, matcher: Arc<Matcher>, token_cost_threshold: u64, interval: Duration) -> Arc<Self> {
        Arc::new(Self { bus, matcher, token_cost_threshold, interval })
    }

    /// Run one compaction pass over every idle agent above the threshold.
    pub async fn tick(&self) {
        let agents = self.matcher.all_agents().await;
        for agent in agents {
            if !agent.is_idle() || agent.metrics.token_cost_7d <= self.token_cost_threshold {
                continue;
            }
            let Some(freed) = self.matcher.compact_agent(&agent.agent_id).await else {
                continue;
            };
            if freed == 0 {
                continue;
            }

            debug!(agent_id = %agent.agent_id, freed, "compacted agent token budget");

            let tick_event = Event::new(
                Topic::CompactionTick,
                format!("compacted {}", agent.name),
                Payload::default()
                    .with_extra("agent_id", serde_json::json!(agent.agent_id))
                    .with_extra("tokens_freed", serde_json::json!(freed)),
                None,
                vec![],
                RiskLevel::Low,
                None,
                None,
            );
            self.bus.publish(tick_event).await;
        }
    }

    /// Spawn the background ticker loop. The returned handle can be aborted
    /// on shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}
