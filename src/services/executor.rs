//! Executor: subscribes to `TASK_CLAIMED`, drives an `AgentRuntime`
//! invocation to completion, and emits the terminal event sequence.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::claim::{DEFAULT_LEASE_MS, HIGH_RISK_LEASE_MS};
use crate::domain::models::event::{CostDelta, Event, EventStatus, Payload, RiskLevel, Topic};
use crate::services::event_bus::{EventBus, EventFilter, Subscriber};
use crate::services::execution_mode::{ExecutionMode, ExecutionModeHandle};
use crate::services::matcher::Matcher;
use crate::services::substrates::claude::ClaudeRuntime;
use crate::services::substrates::mock::MockRuntime;
use crate::services::substrates::team::TeamRuntime;
use crate::services::substrates::AgentRuntime;

pub struct Executor {
    bus: EventBus,
    mode: ExecutionModeHandle,
    matcher: Arc<Matcher>,
    mock_runtime: Arc<MockRuntime>,
    claude_runtime: Arc<ClaudeRuntime>,
    team_runtime: Arc<TeamRuntime>,
    processed: Mutex<VecDeque<Uuid>>,
    processed_capacity: usize,
}

impl Executor {
    pub fn new(bus: EventBus, mode: ExecutionModeHandle, matcher: Arc<Matcher>, processed_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            bus,
            mode,
            matcher,
            mock_runtime: Arc::new(MockRuntime::default()),
            claude_runtime: Arc::new(ClaudeRuntime),
            team_runtime: Arc::new(TeamRuntime::default()),
            processed: Mutex::new(VecDeque::new()),
            processed_capacity,
        })
    }

    async fn mark_processed(&self, id: Uuid) -> bool {
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

    fn runtime_for_mode(&self) -> Arc<dyn AgentRuntime> {
        match self.mode.get() {
            ExecutionMode::Mock => self.mock_runtime.clone() as Arc<dyn AgentRuntime>,
            ExecutionMode::Claude => self.claude_runtime.clone() as Arc<dyn AgentRuntime>,
            ExecutionMode::Team => self.team_runtime.clone() as Arc<dyn AgentRuntime>,
        }
    }

    fn lease_ms_for(risk: RiskLevel) -> i64 {
        match risk {
            RiskLevel::High => HIGH_RISK_LEASE_MS,
            _ => DEFAULT_LEASE_MS,
        }
    }

    /// If every sibling sub-task (by `parent_event_id`) is terminal, emit an
    /// aggregated `TASK_CLOSED` for the parent with summed cost.
    async fn maybe_close_parent(&self, parent_event_id: Uuid) {
        let siblings = self
            .bus
            .query(EventFilter {
                topic: Some(Topic::TaskPosted),
                parent_event_id: Some(parent_event_id),
                ..Default::default()
            })
            .await;

        if siblings.is_empty() {
            return;
        }
        if !siblings.iter().all(|s| s.status.is_terminal()) {
            return;
        }

        let total = CostDelta::sum(siblings.iter().filter_map(|s| s.cost_delta.as_ref()));

        let closed_by_this_call = match self.bus.transition_if_not_terminal(parent_event_id, EventStatus::Closed).await {
            Ok(won) => won,
            Err(e) => {
                warn!(error = %e, "failed to close parent event");
                return;
            }
        };
        if !closed_by_this_call {
            // Another sibling's completion already closed the parent.
            return;
        }
        self.bus.set_cost_delta(parent_event_id, total).await;

        let parent_closed = Event::new(
            Topic::TaskClosed,
            "all sub-tasks complete",
            Payload::default(),
            Some(parent_event_id),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        self.bus.publish(parent_closed).await;
    }

    async fn run_claimed(&self, event: Event) {
        let agent_id = event.claimed_by.clone().unwrap_or_default();
        let lease_ms = Self::lease_ms_for(event.risk_level);
        let heartbeat_interval = Duration::from_millis((lease_ms / 3).max(1) as u64);

        let bus = self.bus.clone();
        let event_id = event.event_id;
        let hb_agent = agent_id.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                if !bus.heartbeat(event_id, &hb_agent).await {
                    return;
                }
            }
        });

        let runtime = self.runtime_for_mode();
        let (mut progress_rx, result_rx, _handle) =
            runtime.execute(&event.intent, &event.required_tags).await;

        while let Some(progress) = progress_rx.recv().await {
            let progress_event = Event::new(
                Topic::TaskProgress,
                progress.message,
                Payload::default()
                    .with_extra("pct_complete", serde_json::json!(progress.pct_complete))
                    .with_extra("agent_id", serde_json::json!(agent_id)),
                Some(event.event_id),
                vec![],
                event.risk_level,
                None,
                None,
            );
            self.bus.publish(progress_event).await;
        }

        let outcome = result_rx.await.unwrap_or(crate::services::substrates::RunOutcome {
            success: false,
            artifact: serde_json::Value::Null,
            evidence: serde_json::Value::Null,
            cost_delta: CostDelta::default(),
            failure_reason: Some("execution_failed".to_string()),
        });

        heartbeat_task.abort();

        if outcome.success {
            self.bus.set_cost_delta(event.event_id, outcome.cost_delta).await;

            let artifact_event = Event::new(
                Topic::ArtifactReady,
                event.intent.clone(),
                Payload::default().with_extra("artifact", outcome.artifact.clone()),
                Some(event.event_id),
                vec![],
                event.risk_level,
                None,
                None,
            );
            self.bus.publish(artifact_event).await;

            let evidence_event = Event::new(
                Topic::EvidenceReady,
                event.intent.clone(),
                Payload::default().with_extra("evidence_pack", outcome.evidence.clone()),
                Some(event.event_id),
                vec![],
                event.risk_level,
                None,
                None,
            );
            self.bus.publish(evidence_event).await;

            if let Err(e) = self.bus.set_status(event.event_id, EventStatus::Closed).await {
                warn!(error = %e, "failed to close task event");
            }

            let closed_event = Event::new(
                Topic::TaskClosed,
                event.intent.clone(),
                Payload::default(),
                Some(event.event_id),
                vec![],
                event.risk_level,
                None,
                None,
            );
            self.bus.publish(closed_event).await;
        } else {
            let reason = outcome.failure_reason.unwrap_or_else(|| "execution_failed".to_string());

            self.bus.set_cost_delta(event.event_id, outcome.cost_delta).await;
            if let Err(e) = self.bus.set_status(event.event_id, EventStatus::Failed).await {
                warn!(error = %e, "failed to fail task event");
            }

            let failed_event = Event::new(
                Topic::TaskFailed,
                event.intent.clone(),
                Payload::with_reason(reason),
                Some(event.event_id),
                vec![],
                event.risk_level,
                None,
                None,
            );
            self.bus.publish(failed_event).await;
        }

        let _ = self.bus.release(event.event_id, &agent_id).await;
        self.matcher.release_agent(&agent_id).await;

        if let Some(parent) = event.parent_event_id {
            self.maybe_close_parent(parent).await;
        }

        info!(event_id = %event.event_id, "executor finished");
    }
}

#[async_trait]
impl Subscriber for Executor {
    async fn handle(&self, event: Event) -> Result<(), String> {
        // A `TASK_CLAIMED` notification carries the task id as
        // `parent_event_id`; fetch the claimed task's own record rather
        // than treating the notification itself as the task.
        let task = if event.topic == Topic::TaskClaimed {
            let Some(task_id) = event.parent_event_id else {
                return Ok(());
            };
            match self.bus.get_event(task_id).await {
                Some(e) => e,
                None => return Ok(()),
            }
        } else {
            event
        };

        if !self.mark_processed(task.event_id).await {
            return Ok(());
        }
        self.run_claimed(task).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::agent::Agent;
    use std::collections::HashSet;

    async fn setup_with_mode(mode: ExecutionMode) -> (EventBus, Arc<Matcher>, Arc<Executor>) {
        let bus = EventBus::new(300, 1000);
        let matcher = Matcher::new(bus.clone(), 2000);
        matcher
            .register(Agent::recruit("worker", HashSet::from(["data".to_string()])))
            .await;
        let mode_handle = ExecutionModeHandle::new(mode);
        let executor = Executor::new(bus.clone(), mode_handle, matcher.clone(), 2000);
        (bus, matcher, executor)
    }

    #[tokio::test]
    async fn mock_execution_emits_full_terminal_sequence() {
        let (bus, matcher, executor) = setup_with_mode(ExecutionMode::Mock).await;

        let posted = Event::new(
            Topic::TaskPosted,
            "clean leads",
            Payload::default(),
            None,
            vec!["data".into()],
            RiskLevel::Low,
            None,
            None,
        );
        let posted = bus.publish(posted).await;
        matcher.handle(posted.clone()).await.unwrap();
        let claimed = bus.get_event(posted.event_id).await.unwrap();

        executor.handle(claimed.clone()).await.unwrap();

        let artifact = bus
            .query(EventFilter { topic: Some(Topic::ArtifactReady), parent_event_id: Some(posted.event_id), ..Default::default() })
            .await;
        assert_eq!(artifact.len(), 1);

        let evidence = bus
            .query(EventFilter { topic: Some(Topic::EvidenceReady), parent_event_id: Some(posted.event_id), ..Default::default() })
            .await;
        assert_eq!(evidence.len(), 1);

        let closed = bus
            .query(EventFilter { topic: Some(Topic::TaskClosed), parent_event_id: Some(posted.event_id), ..Default::default() })
            .await;
        assert_eq!(closed.len(), 1);

        let final_event = bus.get_event(posted.event_id).await.unwrap();
        assert_eq!(final_event.status, EventStatus::Closed);
        assert!(final_event.cost_delta.unwrap().tokens_used > 0);
    }

    #[tokio::test]
    async fn concurrent_sibling_completions_close_parent_exactly_once() {
        let (bus, matcher, executor) = setup_with_mode(ExecutionMode::Mock).await;

        let parent = bus
            .publish(Event::new(Topic::TaskPosted, "parent", Payload::default(), None, vec![], RiskLevel::Low, None, None))
            .await;
        bus.set_status(parent.event_id, EventStatus::Resolving).await.unwrap();

        for _ in 0..2 {
            let sub = Event::new(
                Topic::TaskPosted,
                "sub-task",
                Payload::default(),
                Some(parent.event_id),
                vec!["data".into()],
                RiskLevel::Low,
                None,
                None,
            );
            let sub = bus.publish(sub).await;
            bus.set_status(sub.event_id, EventStatus::Closed).await.unwrap();
        }
        let _ = matcher;

        let (a, b) = tokio::join!(
            executor.maybe_close_parent(parent.event_id),
            executor.maybe_close_parent(parent.event_id)
        );
        let _ = (a, b);

        let closed = bus
            .query(EventFilter { topic: Some(Topic::TaskClosed), parent_event_id: Some(parent.event_id), ..Default::default() })
            .await;
        assert_eq!(closed.len(), 1);
    }

    #[tokio::test]
    async fn claude_boundary_reports_execution_failed() {
        let (bus, matcher, executor) = setup_with_mode(ExecutionMode::Claude).await;
        let posted = Event::new(
            Topic::TaskPosted,
            "do thing",
            Payload::default(),
            None,
            vec!["data".into()],
            RiskLevel::Low,
            None,
            None,
        );
        let posted = bus.publish(posted).await;
        matcher.handle(posted.clone()).await.unwrap();
        let claimed = bus.get_event(posted.event_id).await.unwrap();
        executor.handle(claimed).await.unwrap();

        let failed = bus
            .query(EventFilter { topic: Some(Topic::TaskFailed), parent_event_id: Some(posted.event_id), ..Default::default() })
            .await;
        assert_eq!(failed.len(), 1);
        assert!(failed[0].payload.reason.as_deref().unwrap().contains("execution_failed"));
    }
}
