//! Summoner: detects skill-gap, overload, and decomposition situations the
//! Matcher could not resolve on its own, and raises an `AGENT_SUMMON_REQUEST`
//! gated by the swarm's autonomy level and remaining budget.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::agent::AutonomyLevel;
use crate::domain::models::event::{Event, EventStatus, Payload, RiskLevel, Topic};
use crate::domain::models::summon::{SummonReason, SummonRequest, SummonStatus, Urgency};
use crate::services::approval_engine::ApprovalEngine;
use crate::services::budget_tracker::BudgetTracker;
use crate::services::event_bus::{EventBus, EventFilter, Subscriber};
use crate::services::execution_mode::{ExecutionMode, ExecutionModeHandle};
use crate::services::matcher::Matcher;

/// Below this many concurrent claims an agent is considered overloaded;
/// at or above the higher threshold the urgency is raised to HIGH.
const OVERLOAD_THRESHOLD: usize = 3;
const OVERLOAD_HIGH_THRESHOLD: usize = 5;

pub struct Summoner {
    bus: EventBus,
    matcher: Arc<Matcher>,
    budget: Arc<BudgetTracker>,
    approvals: Arc<ApprovalEngine>,
    mode: ExecutionModeHandle,
    autonomy_level: AutonomyLevel,
    hp_budget_floor: f64,
    mp_budget_floor: f64,
    processed: Mutex<VecDeque<Uuid>>,
    processed_capacity: usize,
}

impl Summoner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: EventBus,
        matcher: Arc<Matcher>,
        budget: Arc<BudgetTracker>,
        approvals: Arc<ApprovalEngine>,
        mode: ExecutionModeHandle,
        autonomy_level: AutonomyLevel,
        hp_budget_floor: f64,
        mp_budget_floor: f64,
        processed_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            matcher,
            budget,
            approvals,
            mode,
            autonomy_level,
            hp_budget_floor,
            mp_budget_floor,
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

    /// Number of non-terminal events currently claimed by `agent_id`.
    async fn concurrent_task_count(&self, agent_id: &str) -> usize {
        self.bus
            .query(EventFilter { status: Some(EventStatus::Claimed), ..Default::default() })
            .await
            .iter()
            .filter(|e| e.claimed_by.as_deref() == Some(agent_id))
            .count()
    }

    /// Skill gap: on `TASK_CLAIMED`, the agent the Matcher just assigned is
    /// missing one or more of the task's required tags.
    async fn detect_skill_gap(&self, event: &Event) {
        let Some(task_event_id) = event.parent_event_id else {
            return;
        };
        let Some(agent_id) = event.payload.extra.get("agent_id").and_then(|v| v.as_str()) else {
            return;
        };
        let Some(agent) = self.matcher.agent(agent_id).await else {
            return;
        };
        if agent.has_all_tags(&event.required_tags) {
            return;
        }

        let urgency = risk_to_urgency(event.risk_level);
        self.raise(task_event_id, event.required_tags.clone(), SummonReason::SkillGap, urgency).await;
    }

    /// Overload: on `TASK_PROGRESS`, the reporting agent's concurrent-claim
    /// count has crossed the threshold.
    async fn detect_overload(&self, event: &Event) {
        let Some(task_event_id) = event.parent_event_id else {
            return;
        };
        let Some(agent_id) = event.payload.extra.get("agent_id").and_then(|v| v.as_str()) else {
            return;
        };

        let count = self.concurrent_task_count(agent_id).await;
        if count < OVERLOAD_THRESHOLD {
            return;
        }
        let urgency = if count >= OVERLOAD_HIGH_THRESHOLD { Urgency::High } else { Urgency::Medium };

        let required_tags = self
            .matcher
            .agent(agent_id)
            .await
            .map(|a| a.role_tags.into_iter().collect())
            .unwrap_or_default();
        self.raise(task_event_id, required_tags, SummonReason::Overload, urgency).await;
    }

    /// Decomposition: on `TASK_ANALYZED` with `complexity = complex`, only
    /// while in "team" mode (a single agent can't fan a complex task out to
    /// itself in any other mode).
    async fn detect_decomposition(&self, event: &Event) {
        if self.mode.get() != ExecutionMode::Team {
            return;
        }
        let Some(task_event_id) = event.parent_event_id else {
            return;
        };
        let is_complex = event
            .payload
            .extra
            .get("analysis")
            .and_then(|a| a.get("complexity"))
            .and_then(|c| c.as_str())
            .map(|c| c == "complex")
            .unwrap_or(false);
        if !is_complex {
            return;
        }

        let urgency = risk_to_urgency(event.risk_level);
        self.raise(task_event_id, event.required_tags.clone(), SummonReason::Decomposition, urgency).await;
    }

    async fn resolve(&self, request: &SummonRequest, status: SummonStatus, reason: &str) {
        let resolved = Event::new(
            Topic::AgentSummonResolved,
            reason.to_string(),
            Payload::with_reason(reason)
                .with_extra("request_id", serde_json::json!(request.request_id))
                .with_extra("status", serde_json::json!(status)),
            None,
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        self.bus.publish(resolved).await;
    }

    async fn raise(&self, task_event_id: Uuid, required_tags: Vec<String>, reason: SummonReason, urgency: Urgency) {
        let snapshot = self.budget.snapshot().await;
        if snapshot.hp.fraction() < self.hp_budget_floor || snapshot.mp.fraction() < self.mp_budget_floor {
            warn!(event_id = %task_event_id, "summon declined: budget floor breached");
            let request = SummonRequest::new("summoner", "summoner", reason, required_tags, urgency, None, "budget exhausted");
            self.resolve(&request, SummonStatus::Declined, "budget exhausted").await;
            return;
        }

        let request = SummonRequest::new(
            "summoner",
            "summoner",
            reason,
            required_tags.clone(),
            urgency,
            None,
            format!("no candidate for event {task_event_id}"),
        );

        let request_event = Event::new(
            Topic::AgentSummonRequest,
            request.context.clone(),
            Payload::default()
                .with_extra("request_id", serde_json::json!(request.request_id))
                .with_extra("reason", serde_json::json!(reason))
                .with_extra("required_tags", serde_json::json!(required_tags)),
            Some(task_event_id),
            required_tags,
            urgency_to_risk(urgency),
            None,
            None,
        );
        self.bus.publish(request_event).await;

        // level 0/1 always ask a human; level 2 auto-approves LOW/MEDIUM;
        // level 3 auto-approves everything.
        let auto_approve = self.autonomy_level.0 >= 3
            || (self.autonomy_level.0 >= 2 && matches!(urgency, Urgency::Low | Urgency::Medium));
        if auto_approve {
            info!(request_id = %request.request_id, "summon auto-approved by autonomy level");
            self.resolve(&request, SummonStatus::Approved, "autonomy bypass").await;
            return;
        }

        let approval = self.approvals.request_approval(request.request_id, urgency_to_risk(urgency)).await;
        let approvals = self.approvals.clone();
        let timeout = Duration::from_millis(request.approval_timeout_ms as u64);
        let request_for_timeout = request.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(record) = approvals.record(approval.approval_id).await {
                if !record.is_decided() {
                    let (status, reason) = timeout_outcome(request_for_timeout.urgency);
                    let resolved = Event::new(
                        Topic::AgentSummonResolved,
                        reason.to_string(),
                        Payload::with_reason(reason)
                            .with_extra("request_id", serde_json::json!(request_for_timeout.request_id))
                            .with_extra("status", serde_json::json!(status)),
                        None,
                        vec![],
                        RiskLevel::Low,
                        None,
                        None,
                    );
                    bus.publish(resolved).await;
                }
            }
        });
    }
}

fn urgency_to_risk(urgency: Urgency) -> RiskLevel {
    match urgency {
        Urgency::Low | Urgency::Medium => RiskLevel::Low,
        Urgency::High => RiskLevel::Medium,
        Urgency::Critical => RiskLevel::High,
    }
}

fn risk_to_urgency(risk: RiskLevel) -> Urgency {
    match risk {
        RiskLevel::High => Urgency::High,
        RiskLevel::Medium => Urgency::Medium,
        RiskLevel::Low => Urgency::Low,
    }
}

/// HIGH/CRITICAL urgency auto-approves on timeout rather than stalling a
/// summon that's already been flagged as pressing; everything else falls
/// back to a human-reviewable queue.
fn timeout_outcome(urgency: Urgency) -> (SummonStatus, &'static str) {
    if matches!(urgency, Urgency::High | Urgency::Critical) {
        (SummonStatus::Approved, "approval timeout: urgency auto-approved")
    } else {
        (SummonStatus::Queued, "approval timeout: queued for review")
    }
}

#[async_trait]
impl Subscriber for Summoner {
    async fn handle(&self, event: Event) -> Result<(), String> {
        if !self.mark_processed(event.event_id).await {
            return Ok(());
        }

        match event.topic {
            Topic::TaskClaimed => self.detect_skill_gap(&event).await,
            Topic::TaskProgress => self.detect_overload(&event).await,
            Topic::TaskAnalyzed => self.detect_decomposition(&event).await,
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::Payload as EventPayload;
    use crate::services::event_bus::EventFilter;

    async fn setup(autonomy: u8) -> (EventBus, Arc<Matcher>, Arc<Summoner>) {
        let bus = EventBus::new(300, 1000);
        let matcher = Matcher::new(bus.clone(), 2000);
        let budget = Arc::new(BudgetTracker::new(bus.clone(), 10_000.0, 1_000_000.0, 100.0, 100.0, 2.0, 5.0));
        let approvals = ApprovalEngine::new(bus.clone(), Duration::from_secs(3600), 10);
        let summoner = Summoner::new(
            bus.clone(),
            matcher.clone(),
            budget,
            approvals,
            ExecutionModeHandle::new(ExecutionMode::Team),
            AutonomyLevel::clamp_new(autonomy),
            0.1,
            0.1,
            2000,
        );
        (bus, matcher, summoner)
    }

    fn task_claimed(task_event_id: Uuid, agent_id: &str, required_tags: Vec<&str>) -> Event {
        Event::new(
            Topic::TaskClaimed,
            "task claimed",
            EventPayload::default().with_extra("agent_id", serde_json::json!(agent_id)),
            Some(task_event_id),
            required_tags.into_iter().map(String::from).collect(),
            RiskLevel::Low,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn skill_gap_raises_summon_when_claimed_agent_lacks_tags() {
        let (bus, matcher, summoner) = setup(0).await;
        matcher
            .register(crate::domain::models::agent::Agent::recruit("worker", std::collections::HashSet::from(["data".to_string()])))
            .await;
        let agent_id = matcher.all_agents().await[0].agent_id.clone();
        let task = bus.publish(Event::new(Topic::TaskPosted, "t", EventPayload::default(), None, vec!["translation".into()], RiskLevel::Low, None, None)).await;

        let claimed = task_claimed(task.event_id, &agent_id, vec!["translation"]);
        summoner.handle(claimed).await.unwrap();

        let requests = bus.query(EventFilter { topic: Some(Topic::AgentSummonRequest), ..Default::default() }).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload.extra.get("reason").and_then(|v| v.as_str()), Some("SKILL_GAP"));
    }

    #[tokio::test]
    async fn no_skill_gap_when_claimed_agent_has_all_tags() {
        let (bus, matcher, summoner) = setup(0).await;
        matcher
            .register(crate::domain::models::agent::Agent::recruit("worker", std::collections::HashSet::from(["data".to_string()])))
            .await;
        let agent_id = matcher.all_agents().await[0].agent_id.clone();
        let task = bus.publish(Event::new(Topic::TaskPosted, "t", EventPayload::default(), None, vec!["data".into()], RiskLevel::Low, None, None)).await;

        let claimed = task_claimed(task.event_id, &agent_id, vec!["data"]);
        summoner.handle(claimed).await.unwrap();

        let requests = bus.query(EventFilter { topic: Some(Topic::AgentSummonRequest), ..Default::default() }).await;
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn overload_raises_summon_past_threshold() {
        let (bus, matcher, summoner) = setup(0).await;
        matcher
            .register(crate::domain::models::agent::Agent::recruit("busy", std::collections::HashSet::from(["data".to_string()])))
            .await;

        // Simulate three concurrently-claimed tasks for the same agent.
        for _ in 0..3 {
            let t = bus.publish(Event::new(Topic::TaskPosted, "t", EventPayload::default(), None, vec!["data".into()], RiskLevel::Low, None, None)).await;
            bus.claim(t.event_id, "busy", Some(60_000)).await;
        }

        let task = bus.get_event(bus.query(EventFilter { status: Some(crate::domain::models::event::EventStatus::Claimed), ..Default::default() }).await[0].event_id).await.unwrap();
        let progress = Event::new(
            Topic::TaskProgress,
            "working",
            EventPayload::default().with_extra("agent_id", serde_json::json!("busy")),
            Some(task.event_id),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        summoner.handle(progress).await.unwrap();

        let requests = bus.query(EventFilter { topic: Some(Topic::AgentSummonRequest), ..Default::default() }).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload.extra.get("reason").and_then(|v| v.as_str()), Some("OVERLOAD"));
    }

    #[tokio::test]
    async fn no_overload_below_threshold() {
        let (bus, matcher, summoner) = setup(0).await;
        matcher
            .register(crate::domain::models::agent::Agent::recruit("worker", std::collections::HashSet::from(["data".to_string()])))
            .await;
        let task = bus.publish(Event::new(Topic::TaskPosted, "t", EventPayload::default(), None, vec!["data".into()], RiskLevel::Low, None, None)).await;
        bus.claim(task.event_id, "worker", Some(60_000)).await;

        let progress = Event::new(
            Topic::TaskProgress,
            "working",
            EventPayload::default().with_extra("agent_id", serde_json::json!("worker")),
            Some(task.event_id),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        summoner.handle(progress).await.unwrap();

        let requests = bus.query(EventFilter { topic: Some(Topic::AgentSummonRequest), ..Default::default() }).await;
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn decomposition_raises_summon_for_complex_task_in_team_mode() {
        let (bus, _matcher, summoner) = setup(0).await;
        let task = bus.publish(Event::new(Topic::TaskPosted, "t", EventPayload::default(), None, vec!["data".into(), "report".into(), "review".into()], RiskLevel::Low, None, None)).await;

        let analysis = serde_json::json!({ "complexity": "complex" });
        let analyzed = Event::new(
            Topic::TaskAnalyzed,
            "analyzed",
            EventPayload::default().with_extra("analysis", analysis),
            Some(task.event_id),
            task.required_tags.clone(),
            RiskLevel::Low,
            None,
            None,
        );
        summoner.handle(analyzed).await.unwrap();

        let requests = bus.query(EventFilter { topic: Some(Topic::AgentSummonRequest), ..Default::default() }).await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].payload.extra.get("reason").and_then(|v| v.as_str()), Some("DECOMPOSITION"));
    }

    #[tokio::test]
    async fn no_decomposition_summon_outside_team_mode() {
        let bus = EventBus::new(300, 1000);
        let matcher = Matcher::new(bus.clone(), 2000);
        let budget = Arc::new(BudgetTracker::new(bus.clone(), 10_000.0, 1_000_000.0, 100.0, 100.0, 2.0, 5.0));
        let approvals = ApprovalEngine::new(bus.clone(), Duration::from_secs(3600), 10);
        let summoner = Summoner::new(
            bus.clone(),
            matcher,
            budget,
            approvals,
            ExecutionModeHandle::new(ExecutionMode::Mock),
            AutonomyLevel::clamp_new(0),
            0.1,
            0.1,
            2000,
        );

        let task = bus.publish(Event::new(Topic::TaskPosted, "t", EventPayload::default(), None, vec!["data".into()], RiskLevel::Low, None, None)).await;
        let analysis = serde_json::json!({ "complexity": "complex" });
        let analyzed = Event::new(
            Topic::TaskAnalyzed,
            "analyzed",
            EventPayload::default().with_extra("analysis", analysis),
            Some(task.event_id),
            task.required_tags.clone(),
            RiskLevel::Low,
            None,
            None,
        );
        summoner.handle(analyzed).await.unwrap();

        let requests = bus.query(EventFilter { topic: Some(Topic::AgentSummonRequest), ..Default::default() }).await;
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn autonomy_level_2_auto_approves_low_but_not_high() {
        let (bus, matcher, summoner) = setup(2).await;
        matcher
            .register(crate::domain::models::agent::Agent::recruit("worker", std::collections::HashSet::from(["data".to_string()])))
            .await;
        let agent_id = matcher.all_agents().await[0].agent_id.clone();
        let task = bus.publish(Event::new(Topic::TaskPosted, "t", EventPayload::default(), None, vec!["translation".into()], RiskLevel::Low, None, None)).await;
        let claimed = task_claimed(task.event_id, &agent_id, vec!["translation"]);
        summoner.handle(claimed).await.unwrap();

        let resolved = bus.query(EventFilter { topic: Some(Topic::AgentSummonResolved), ..Default::default() }).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].payload.reason.as_deref(), Some("autonomy bypass"));
    }

    #[test]
    fn high_and_critical_urgency_auto_approve_on_timeout() {
        assert_eq!(timeout_outcome(Urgency::High).0, SummonStatus::Approved);
        assert_eq!(timeout_outcome(Urgency::Critical).0, SummonStatus::Approved);
    }

    #[test]
    fn low_and_medium_urgency_queue_on_timeout() {
        assert_eq!(timeout_outcome(Urgency::Low).0, SummonStatus::Queued);
        assert_eq!(timeout_outcome(Urgency::Medium).0, SummonStatus::Queued);
    }
}
