//! Event domain model.
//!
//! An `Event` is the immutable, append-only unit of fact on the bus. All
//! pipeline stages communicate exclusively by publishing and observing
//! events; nothing mutates an event's history, only its current status and
//! claim fields evolve over the event's lifetime.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of event topics, serialized SCREAMING_SNAKE_CASE so
/// downstream consumers can match on topic name across process boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Topic {
    TaskPosted,
    TaskAnalyzed,
    TaskDecomposed,
    TaskClaimed,
    TaskProgress,
    TaskRetryScheduled,
    ArtifactReady,
    EvidenceReady,
    IntelReady,
    TaskClosed,
    TaskFailed,
    SosError,
    ApprovalRequired,
    ApprovalDecision,
    AgentSummonRequest,
    AgentSummonResolved,
    AgentStatusReport,
    AssetUpdated,
    SkillQuarantined,
    CompactionTick,
    HudSync,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskPosted => "TASK_POSTED",
            Self::TaskAnalyzed => "TASK_ANALYZED",
            Self::TaskDecomposed => "TASK_DECOMPOSED",
            Self::TaskClaimed => "TASK_CLAIMED",
            Self::TaskProgress => "TASK_PROGRESS",
            Self::TaskRetryScheduled => "TASK_RETRY_SCHEDULED",
            Self::ArtifactReady => "ARTIFACT_READY",
            Self::EvidenceReady => "EVIDENCE_READY",
            Self::IntelReady => "INTEL_READY",
            Self::TaskClosed => "TASK_CLOSED",
            Self::TaskFailed => "TASK_FAILED",
            Self::SosError => "SOS_ERROR",
            Self::ApprovalRequired => "APPROVAL_REQUIRED",
            Self::ApprovalDecision => "APPROVAL_DECISION",
            Self::AgentSummonRequest => "AGENT_SUMMON_REQUEST",
            Self::AgentSummonResolved => "AGENT_SUMMON_RESOLVED",
            Self::AgentStatusReport => "AGENT_STATUS_REPORT",
            Self::AssetUpdated => "ASSET_UPDATED",
            Self::SkillQuarantined => "SKILL_QUARANTINED",
            Self::CompactionTick => "COMPACTION_TICK",
            Self::HudSync => "HUD_SYNC",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Open,
    Claimed,
    Resolving,
    Closed,
    Failed,
}

impl EventStatus {
    /// Terminal statuses are absorbing: once reached, never transitioned away from.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Risk classification driving lease duration and approval tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Resource ceiling attached to a task at post time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub max_tokens: u64,
    pub max_minutes: u64,
    pub max_cash: f64,
}

/// Resource consumption reported when a task closes or fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostDelta {
    pub tokens_used: u64,
    pub minutes_used: u64,
    pub cash_used: f64,
}

impl CostDelta {
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            tokens_used: self.tokens_used + other.tokens_used,
            minutes_used: self.minutes_used + other.minutes_used,
            cash_used: self.cash_used + other.cash_used,
        }
    }

    pub fn sum<'a>(items: impl Iterator<Item = &'a Self>) -> Self {
        items.fold(Self::default(), |acc, d| acc.combine(d))
    }
}

/// Tagged payload variants for well-known topics, with an opaque `extra`
/// bag retained on every event for forward compatibility with payload
/// fields not yet promoted to a named field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_pack: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgrade_spec: Option<crate::domain::models::approval::DowngradeSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emp_actions: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Payload {
    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// The append-only blackboard record. Immutable except for `status`,
/// `claimed_by`, `updated_at`, and `cost_delta`, which are mutated only by
/// the Event Bus's claim/release/terminal-transition operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub topic: Topic,
    pub intent: String,
    pub payload: Payload,
    pub parent_event_id: Option<Uuid>,
    pub status: EventStatus,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub required_tags: Vec<String>,
    pub risk_level: RiskLevel,
    pub budget: Option<Budget>,
    pub cost_delta: Option<CostDelta>,
    pub idempotency_key: Option<String>,
}

impl Event {
    /// Construct a new OPEN event with `created_at == updated_at`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: Topic,
        intent: impl Into<String>,
        payload: Payload,
        parent_event_id: Option<Uuid>,
        required_tags: Vec<String>,
        risk_level: RiskLevel,
        budget: Option<Budget>,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id: Uuid::new_v4(),
            topic,
            intent: intent.into(),
            payload,
            parent_event_id,
            status: EventStatus::Open,
            claimed_by: None,
            created_at: now,
            updated_at: now,
            required_tags,
            risk_level,
            budget,
            cost_delta: None,
            idempotency_key,
        }
    }

    pub fn is_sub_task(&self) -> bool {
        self.parent_event_id.is_some()
    }

    pub fn is_retry(&self) -> bool {
        self.payload.retry_of.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_event_is_open_with_equal_timestamps() {
        let e = Event::new(
            Topic::TaskPosted,
            "clean leads",
            Payload::default(),
            None,
            vec!["data".into()],
            RiskLevel::Low,
            None,
            None,
        );
        assert_eq!(e.status, EventStatus::Open);
        assert_eq!(e.created_at, e.updated_at);
        assert!(e.claimed_by.is_none());
    }

    #[test]
    fn terminal_statuses_are_absorbing() {
        assert!(EventStatus::Closed.is_terminal());
        assert!(EventStatus::Failed.is_terminal());
        assert!(!EventStatus::Open.is_terminal());
        assert!(!EventStatus::Claimed.is_terminal());
        assert!(!EventStatus::Resolving.is_terminal());
    }

    #[test]
    fn cost_delta_sums_across_siblings() {
        let a = CostDelta { tokens_used: 10, minutes_used: 1, cash_used: 0.5 };
        let b = CostDelta { tokens_used: 20, minutes_used: 2, cash_used: 1.5 };
        let total = CostDelta::sum([a, b].iter());
        assert_eq!(total.tokens_used, 30);
        assert_eq!(total.minutes_used, 3);
        assert!((total.cash_used - 2.0).abs() < f64::EPSILON);
    }
}
