//! Approval Engine: tracks outstanding approval requests and enforces
//! per-tier SLA timeouts (reminder, then downgrade/escalate/reject).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::ApprovalError;
use crate::domain::models::approval::{ApprovalRecord, ApprovalStatus, DowngradeSpec, PolicyTier};
use crate::domain::models::event::{Event, Payload, RiskLevel, Topic};
use crate::services::event_bus::{EventBus, Subscriber};

pub struct ApprovalEngine {
    bus: EventBus,
    records: RwLock<HashMap<Uuid, ApprovalRecord>>,
    poll_interval: Duration,
    congestion_alarm_threshold: usize,
}

impl ApprovalEngine {
    pub fn new(bus: EventBus, poll_interval: Duration, congestion_alarm_threshold: usize) -> Arc<Self> {
        Arc::new(Self { bus, records: RwLock::new(HashMap::new()), poll_interval, congestion_alarm_threshold })
    }

    pub async fn request_approval(&self, event_id: Uuid, risk: RiskLevel) -> ApprovalRecord {
        let record = ApprovalRecord::new(event_id, risk);
        self.records.write().await.insert(record.approval_id, record.clone());

        let required = Event::new(
            Topic::ApprovalRequired,
            "approval required",
            Payload::default(),
            Some(event_id),
            vec![],
            risk,
            None,
            None,
        );
        self.bus.publish(required).await;
        record
    }

    pub async fn record(&self, approval_id: Uuid) -> Option<ApprovalRecord> {
        self.records.read().await.get(&approval_id).cloned()
    }

    pub async fn decide(&self, approval_id: Uuid, approved: bool, decided_by: impl Into<String>) -> Result<ApprovalRecord, ApprovalError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&approval_id).ok_or(ApprovalError::NotFound(approval_id))?;
        if record.is_decided() {
            return Err(ApprovalError::AlreadyDecided(approval_id));
        }
        record.status = if approved { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
        record.decided_at = Some(Utc::now());
        record.decided_by = Some(decided_by.into());
        let snapshot = record.clone();
        drop(records);

        let decision_event = Event::new(
            Topic::ApprovalDecision,
            "approval decision",
            Payload {
                decision: Some(if approved { "approved" } else { "rejected" }.to_string()),
                decided_by: snapshot.decided_by.clone(),
                ..Payload::default()
            },
            Some(snapshot.event_id),
            vec![],
            snapshot.tier_risk(),
            None,
            None,
        );
        self.bus.publish(decision_event).await;

        Ok(snapshot)
    }

    /// One SLA sweep: reminders, downgrades, escalations, and
    /// auto-rejects, per `PolicyTier` timing, plus the congestion alarm.
    pub async fn sweep(&self) {
        let now = Utc::now();
        let due: Vec<ApprovalRecord> = {
            let records = self.records.read().await;
            records.values().filter(|r| !r.is_decided()).cloned().collect()
        };

        if due.len() > self.congestion_alarm_threshold {
            self.raise_congestion_alarm(due.len()).await;
        }

        for record in due {
            let age_min = (now - record.created_at).num_minutes();

            if record.status == ApprovalStatus::Pending && age_min >= record.tier.reminder_minutes() {
                self.remind(&record).await;
                continue;
            }

            if age_min >= record.tier.timeout_minutes() {
                match record.tier {
                    PolicyTier::Fast | PolicyTier::Standard => {
                        self.downgrade(&record).await;
                    }
                    PolicyTier::Critical => {
                        let grace = record.tier.escalation_grace_minutes().unwrap_or(0);
                        match record.escalated_at {
                            None => self.escalate(&record).await,
                            Some(escalated_at) if (now - escalated_at).num_minutes() >= grace => {
                                self.auto_reject(&record).await;
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }
    }

    async fn remind(&self, record: &ApprovalRecord) {
        self.mark(record.approval_id, |r| {
            r.status = ApprovalStatus::Reminded;
            r.reminded_at = Some(Utc::now());
        })
        .await;

        let reminder_event = Event::new(
            Topic::SosError,
            "approval reminder: SLA clock is running",
            Payload::with_reason("APPROVAL_REMINDER"),
            Some(record.event_id),
            vec![],
            record.tier_risk(),
            None,
            None,
        );
        self.bus.publish(reminder_event).await;
    }

    async fn raise_congestion_alarm(&self, pending_count: usize) {
        warn!(pending_count, "approval queue congestion alarm");
        let alarm_event = Event::new(
            Topic::SosError,
            "approval queue congestion alarm",
            Payload::with_reason("APPROVAL_QUEUE_CONGESTION").with_extra("pending_count", serde_json::json!(pending_count)),
            None,
            vec![],
            RiskLevel::Medium,
            None,
            None,
        );
        self.bus.publish(alarm_event).await;
    }

    async fn mark(&self, approval_id: Uuid, f: impl FnOnce(&mut ApprovalRecord)) {
        let mut records = self.records.write().await;
        if let Some(r) = records.get_mut(&approval_id) {
            f(r);
        }
    }

    /// FAST/STANDARD SLA timeout: the task is auto-approved with tool
    /// privileges stripped rather than left pending indefinitely. This is
    /// an APPROVE decision, not a distinct status — `downgrade_spec` is
    /// what the downstream executor strips before running.
    async fn downgrade(&self, record: &ApprovalRecord) {
        warn!(approval_id = %record.approval_id, "approval SLA timeout, downgrading to draft and auto-approving");
        self.mark(record.approval_id, |r| {
            r.status = ApprovalStatus::TimeoutDowngraded;
            r.decided_at = Some(Utc::now());
            r.decided_by = Some("SLA_MONITOR".to_string());
        })
        .await;

        let spec = DowngradeSpec::default();
        let decision_event = Event::new(
            Topic::ApprovalDecision,
            "approval auto-downgraded and approved on SLA timeout",
            Payload {
                decision: Some("approved".to_string()),
                decided_by: Some("SLA_MONITOR".to_string()),
                downgrade_spec: Some(spec),
                ..Payload::default()
            },
            Some(record.event_id),
            vec![],
            record.tier_risk(),
            None,
            None,
        );
        self.bus.publish(decision_event).await;
    }

    async fn escalate(&self, record: &ApprovalRecord) {
        info!(approval_id = %record.approval_id, "approval SLA timeout, escalating");
        self.mark(record.approval_id, |r| r.escalated_at = Some(Utc::now())).await;

        let escalated_event = Event::new(
            Topic::ApprovalRequired,
            "approval escalated",
            Payload::default().with_extra("escalated", serde_json::json!(true)),
            Some(record.event_id),
            vec![],
            record.tier_risk(),
            None,
            None,
        );
        self.bus.publish(escalated_event).await;
    }

    async fn auto_reject(&self, record: &ApprovalRecord) {
        warn!(approval_id = %record.approval_id, "approval SLA grace period exhausted, auto-rejecting");
        self.mark(record.approval_id, |r| {
            r.status = ApprovalStatus::TimeoutRejected;
            r.decided_at = Some(Utc::now());
            r.decided_by = Some("sla-monitor".to_string());
        })
        .await;

        let decision_event = Event::new(
            Topic::ApprovalDecision,
            "approval auto-rejected on SLA exhaustion",
            Payload {
                decision: Some("rejected".to_string()),
                decided_by: Some("sla-monitor".to_string()),
                ..Payload::default()
            },
            Some(record.event_id),
            vec![],
            record.tier_risk(),
            None,
            None,
        );
        self.bus.publish(decision_event).await;
    }

    pub fn spawn_sla_monitor(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }
}

impl ApprovalRecord {
    fn tier_risk(&self) -> RiskLevel {
        match self.tier {
            PolicyTier::Fast => RiskLevel::Low,
            PolicyTier::Standard => RiskLevel::Medium,
            PolicyTier::Critical => RiskLevel::High,
        }
    }
}

#[async_trait]
impl Subscriber for ApprovalEngine {
    async fn handle(&self, event: Event) -> Result<(), String> {
        if event.topic == Topic::AgentSummonRequest {
            self.request_approval(event.event_id, event.risk_level).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decide_publishes_decision_event() {
        let bus = EventBus::new(300, 1000);
        let engine = ApprovalEngine::new(bus.clone(), Duration::from_secs(60), 10);
        let record = engine.request_approval(Uuid::new_v4(), RiskLevel::Medium).await;

        let decided = engine.decide(record.approval_id, true, "alice").await.unwrap();
        assert_eq!(decided.status, ApprovalStatus::Approved);

        let decisions = bus
            .query(crate::services::event_bus::EventFilter { topic: Some(Topic::ApprovalDecision), ..Default::default() })
            .await;
        assert_eq!(decisions.len(), 1);
    }

    #[tokio::test]
    async fn deciding_twice_errors() {
        let bus = EventBus::new(300, 1000);
        let engine = ApprovalEngine::new(bus.clone(), Duration::from_secs(60), 10);
        let record = engine.request_approval(Uuid::new_v4(), RiskLevel::Low).await;
        engine.decide(record.approval_id, true, "alice").await.unwrap();
        let err = engine.decide(record.approval_id, true, "bob").await.unwrap_err();
        assert!(matches!(err, ApprovalError::AlreadyDecided(_)));
    }

    #[tokio::test]
    async fn fast_tier_timeout_downgrades() {
        let bus = EventBus::new(300, 1000);
        let engine = ApprovalEngine::new(bus.clone(), Duration::from_secs(60), 10);
        let mut record = engine.request_approval(Uuid::new_v4(), RiskLevel::Low).await;
        record.created_at = Utc::now() - chrono::Duration::minutes(10);
        engine.records.write().await.insert(record.approval_id, record.clone());

        engine.sweep().await;

        let refreshed = engine.record(record.approval_id).await.unwrap();
        assert_eq!(refreshed.status, ApprovalStatus::TimeoutDowngraded);

        let decisions = bus
            .query(crate::services::event_bus::EventFilter { topic: Some(Topic::ApprovalDecision), ..Default::default() })
            .await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].payload.decision.as_deref(), Some("approved"));
        assert_eq!(decisions[0].payload.decided_by.as_deref(), Some("SLA_MONITOR"));
        let spec = decisions[0].payload.downgrade_spec.as_ref().unwrap();
        assert!(spec.strip_external_send);
        assert!(spec.strip_shell_exec);
    }

    #[tokio::test]
    async fn standard_tier_timeout_downgrades_rather_than_escalates() {
        let bus = EventBus::new(300, 1000);
        let engine = ApprovalEngine::new(bus.clone(), Duration::from_secs(60), 10);
        let mut record = engine.request_approval(Uuid::new_v4(), RiskLevel::Medium).await;
        record.created_at = Utc::now() - chrono::Duration::minutes(20);
        engine.records.write().await.insert(record.approval_id, record.clone());

        engine.sweep().await;

        let refreshed = engine.record(record.approval_id).await.unwrap();
        assert_eq!(refreshed.status, ApprovalStatus::TimeoutDowngraded);
    }

    #[tokio::test]
    async fn critical_tier_escalates_then_auto_rejects_after_grace() {
        let bus = EventBus::new(300, 1000);
        let engine = ApprovalEngine::new(bus.clone(), Duration::from_secs(60), 10);
        let mut record = engine.request_approval(Uuid::new_v4(), RiskLevel::High).await;
        record.created_at = Utc::now() - chrono::Duration::minutes(31);
        engine.records.write().await.insert(record.approval_id, record.clone());

        engine.sweep().await;
        let after_first = engine.record(record.approval_id).await.unwrap();
        assert!(after_first.escalated_at.is_some());
        assert_ne!(after_first.status, ApprovalStatus::TimeoutRejected);

        engine
            .mark(record.approval_id, |r| r.escalated_at = Some(Utc::now() - chrono::Duration::minutes(31)))
            .await;
        engine.sweep().await;

        let after_grace = engine.record(record.approval_id).await.unwrap();
        assert_eq!(after_grace.status, ApprovalStatus::TimeoutRejected);
    }

    #[tokio::test]
    async fn congestion_alarm_fires_when_pending_exceeds_threshold() {
        let bus = EventBus::new(300, 1000);
        let engine = ApprovalEngine::new(bus.clone(), Duration::from_secs(60), 2);
        for _ in 0..3 {
            engine.request_approval(Uuid::new_v4(), RiskLevel::Low).await;
        }

        engine.sweep().await;

        let alarms = bus
            .query(crate::services::event_bus::EventFilter { topic: Some(Topic::SosError), ..Default::default() })
            .await;
        assert!(alarms.iter().any(|e| e.payload.reason.as_deref() == Some("APPROVAL_QUEUE_CONGESTION")));
    }
}
