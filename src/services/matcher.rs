//! Matcher: maintains the in-memory agent registry and auto-matches
//! `TASK_POSTED` events to agents across three tiers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::domain::models::agent::{Agent, AgentStatus};
use crate::domain::models::event::{Event, Topic};
use crate::services::event_bus::{EventBus, Subscriber};

/// Which tier a match was found in, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTier {
    AllTags,
    Partial,
    AnyIdle,
}

pub struct Matcher {
    bus: EventBus,
    agents: RwLock<HashMap<String, Agent>>,
    processed: Mutex<VecDeque<uuid::Uuid>>,
    processed_capacity: usize,
}

impl Matcher {
    pub fn new(bus: EventBus, processed_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            bus,
            agents: RwLock::new(HashMap::new()),
            processed: Mutex::new(VecDeque::new()),
            processed_capacity,
        })
    }

    pub async fn register(&self, agent: Agent) {
        self.agents.write().await.insert(agent.agent_id.clone(), agent);
    }

    pub async fn agent(&self, agent_id: &str) -> Option<Agent> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn all_agents(&self) -> Vec<Agent> {
        self.agents.read().await.values().cloned().collect()
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

    /// Rank candidates across three tiers. Tier 1: every required tag
    /// present. Tier 2: at least one tag present, ranked by overlap size
    /// first then by `success_rate_7d`. Tier 3: any IDLE agent.
    fn best_candidate(agents: &[Agent], required_tags: &[String]) -> Option<(Agent, MatchTier)> {
        let idle: Vec<&Agent> = agents.iter().filter(|a| a.is_idle()).collect();
        if idle.is_empty() {
            return None;
        }

        let mut all_tag_matches: Vec<&Agent> =
            idle.iter().filter(|a| a.has_all_tags(required_tags)).copied().collect();
        if !all_tag_matches.is_empty() {
            all_tag_matches.sort_by(|a, b| {
                b.metrics
                    .success_rate_7d
                    .partial_cmp(&a.metrics.success_rate_7d)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            return Some((all_tag_matches[0].clone(), MatchTier::AllTags));
        }

        let mut partial: Vec<&Agent> = idle
            .iter()
            .filter(|a| a.tag_overlap(required_tags) > 0)
            .copied()
            .collect();
        if !partial.is_empty() {
            partial.sort_by(|a, b| {
                b.tag_overlap(required_tags)
                    .cmp(&a.tag_overlap(required_tags))
                    .then(
                        b.metrics
                            .success_rate_7d
                            .partial_cmp(&a.metrics.success_rate_7d)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
            });
            return Some((partial[0].clone(), MatchTier::Partial));
        }

        // Tier 3: any IDLE agent, last-resort fallback so tasks never stall.
        let mut fallback = idle.clone();
        fallback.sort_by(|a, b| {
            b.metrics
                .success_rate_7d
                .partial_cmp(&a.metrics.success_rate_7d)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Some((fallback[0].clone(), MatchTier::AnyIdle))
    }

    /// Called by a terminal-event handler to return an agent to IDLE.
    pub async fn release_agent(&self, agent_id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(a) = agents.get_mut(agent_id) {
            a.status = AgentStatus::Idle;
            a.current_event_id = None;
        }
    }

    /// Halve an agent's rolling token cost, returning the amount freed.
    /// Called by the compaction tick when a 7-day cost crosses a threshold.
    pub async fn compact_agent(&self, agent_id: &str) -> Option<u64> {
        let mut agents = self.agents.write().await;
        let a = agents.get_mut(agent_id)?;
        let freed = a.metrics.token_cost_7d / 2;
        a.metrics.token_cost_7d -= freed;
        Some(freed)
    }
}

#[async_trait]
impl Subscriber for Matcher {
    async fn handle(&self, event: Event) -> Result<(), String> {
        if !self.mark_processed(event.event_id).await {
            return Ok(());
        }

        // Re-read the live event rather than trusting the handler's
        // snapshot: a root the Decomposer has since marked RESOLVING must
        // not be claimed and run standalone alongside its own sub-tasks.
        let Some(current) = self.bus.get_event(event.event_id).await else {
            return Ok(());
        };
        if current.status != crate::domain::models::event::EventStatus::Open {
            return Ok(());
        }

        let snapshot = self.all_agents().await;
        let Some((candidate, _tier)) = Self::best_candidate(&snapshot, &event.required_tags) else {
            return Ok(());
        };

        let outcome = self.bus.claim(event.event_id, &candidate.agent_id, None).await;
        if outcome.ok {
            let mut agents = self.agents.write().await;
            if let Some(a) = agents.get_mut(&candidate.agent_id) {
                a.status = AgentStatus::Claimed;
                a.current_event_id = Some(event.event_id);
            }
        }

        Ok(())
    }
}
