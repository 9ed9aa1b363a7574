//! Summon request domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SummonReason {
    SkillGap,
    Overload,
    Decomposition,
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummonStatus {
    Pending,
    Approved,
    Declined,
    Queued,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummonRequest {
    pub request_id: Uuid,
    pub requesting_agent_id: String,
    pub requesting_agent_name: String,
    pub reason: SummonReason,
    pub required_tags: Vec<String>,
    pub urgency: Urgency,
    pub target_zone_id: Option<String>,
    pub context: String,
    pub approval_timeout_ms: i64,
    pub created_at: DateTime<Utc>,
    pub status: SummonStatus,
}

impl SummonRequest {
    pub const APPROVAL_TIMEOUT_MS: i64 = 30_000;

    pub fn new(
        requesting_agent_id: impl Into<String>,
        requesting_agent_name: impl Into<String>,
        reason: SummonReason,
        required_tags: Vec<String>,
        urgency: Urgency,
        target_zone_id: Option<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            requesting_agent_id: requesting_agent_id.into(),
            requesting_agent_name: requesting_agent_name.into(),
            reason,
            required_tags,
            urgency,
            target_zone_id,
            context: context.into(),
            approval_timeout_ms: Self::APPROVAL_TIMEOUT_MS,
            created_at: Utc::now(),
            status: SummonStatus::Pending,
        }
    }
}
