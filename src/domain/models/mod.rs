//! Domain models shared across all SwarmEngine subsystems.

pub mod agent;
pub mod approval;
pub mod claim;
pub mod config;
pub mod dlq;
pub mod event;
pub mod hud;
pub mod skill;
pub mod summon;

pub use agent::{Agent, AgentMetrics, AgentStatus, AutonomyLevel};
pub use approval::{ApprovalRecord, ApprovalStatus, DowngradeSpec, PolicyTier};
pub use claim::{Claim, DEFAULT_LEASE_MS, HIGH_RISK_LEASE_MS};
pub use config::Config;
pub use dlq::{DeadLetterEntry, DLQ_CAPACITY};
pub use event::{Budget, CostDelta, Event, EventStatus, Payload, RiskLevel, Topic};
pub use hud::{HudState, ResourceBar};
pub use skill::{Permissions, SkillManifest, Trust};
pub use summon::{SummonReason, SummonRequest, SummonStatus, Urgency};
