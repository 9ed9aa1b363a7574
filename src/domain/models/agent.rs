//! Agent domain model.
//!
//! An agent is a runtime entity the Matcher assigns work to. Status and
//! current claim are mutated only by the Matcher (on claim) and by the
//! terminal-event handler that returns an agent to IDLE.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an agent within the swarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Claimed,
    Working,
    Paused,
}

/// Rolling 7-day performance metrics used by the Matcher's ranking tiers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub success_rate_7d: f64,
    pub avg_cycle_sec_7d: f64,
    pub token_cost_7d: u64,
    pub approval_wait_sec_7d: f64,
}

/// Scalar 0-3 controlling how aggressively the Summoner may bypass human
/// approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AutonomyLevel(pub u8);

impl AutonomyLevel {
    pub const fn clamp_new(level: u8) -> Self {
        Self(if level > 3 { 3 } else { level })
    }
}

impl Default for AutonomyLevel {
    fn default() -> Self {
        Self(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
    pub role_tags: HashSet<String>,
    pub status: AgentStatus,
    pub current_event_id: Option<Uuid>,
    pub zone_id: Option<String>,
    pub metrics: AgentMetrics,
    pub autonomy_level: AutonomyLevel,
}

impl Agent {
    pub fn recruit(name: impl Into<String>, role_tags: HashSet<String>) -> Self {
        Self {
            agent_id: Uuid::new_v4().to_string(),
            name: name.into(),
            role_tags,
            status: AgentStatus::Idle,
            current_event_id: None,
            zone_id: None,
            metrics: AgentMetrics::default(),
            autonomy_level: AutonomyLevel::default(),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == AgentStatus::Idle
    }

    /// Size of the tag overlap with a set of required tags — used by the
    /// Matcher's partial-match tier.
    pub fn tag_overlap(&self, required: &[String]) -> usize {
        required.iter().filter(|t| self.role_tags.contains(*t)).count()
    }

    pub fn has_all_tags(&self, required: &[String]) -> bool {
        required.iter().all(|t| self.role_tags.contains(t))
    }
}
