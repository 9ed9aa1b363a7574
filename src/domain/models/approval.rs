//! Approval record domain model, consumed by the Approval Engine and SLA
//! Monitor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Reminded,
    Approved,
    Rejected,
    TimeoutDowngraded,
    TimeoutEscalated,
    TimeoutRejected,
}

/// SLA tier for an approval, derived from the event's risk level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyTier {
    Fast,
    Standard,
    Critical,
}

impl PolicyTier {
    pub fn for_risk(risk: RiskLevel) -> Self {
        match risk {
            RiskLevel::Low => Self::Fast,
            RiskLevel::Medium => Self::Standard,
            RiskLevel::High => Self::Critical,
        }
    }

    /// Minutes until the first reminder fires.
    pub fn reminder_minutes(&self) -> i64 {
        match self {
            Self::Fast => 3,
            Self::Standard => 10,
            Self::Critical => 20,
        }
    }

    /// Minutes until the SLA timeout action fires.
    pub fn timeout_minutes(&self) -> i64 {
        match self {
            Self::Fast => 5,
            Self::Standard => 15,
            Self::Critical => 30,
        }
    }

    /// For CRITICAL only: minutes after escalation before AUTO_REJECT fires.
    pub fn escalation_grace_minutes(&self) -> Option<i64> {
        match self {
            Self::Critical => Some(30),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DowngradeSpec {
    pub strip_external_send: bool,
    pub strip_shell_exec: bool,
}

impl Default for DowngradeSpec {
    fn default() -> Self {
        Self {
            strip_external_send: true,
            strip_shell_exec: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval_id: Uuid,
    pub event_id: Uuid,
    pub tier: PolicyTier,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub reminded_at: Option<DateTime<Utc>>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
    pub decision_reason: Option<String>,
}

impl ApprovalRecord {
    pub fn new(event_id: Uuid, risk: RiskLevel) -> Self {
        Self {
            approval_id: Uuid::new_v4(),
            event_id,
            tier: PolicyTier::for_risk(risk),
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            reminded_at: None,
            escalated_at: None,
            decided_at: None,
            decided_by: None,
            decision_reason: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        matches!(
            self.status,
            ApprovalStatus::Approved
                | ApprovalStatus::Rejected
                | ApprovalStatus::TimeoutDowngraded
                | ApprovalStatus::TimeoutEscalated
                | ApprovalStatus::TimeoutRejected
        )
    }
}
