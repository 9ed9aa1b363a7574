//! Claim / lease domain model.
//!
//! A claim is tracked separately from the event it protects: the event
//! records `status`/`claimed_by` for readers, while the claim itself owns
//! the lease-expiry timer that the bus arms and cancels.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Default lease duration for ordinary-risk events.
pub const DEFAULT_LEASE_MS: i64 = 30_000;
/// Lease duration for HIGH-risk events, which get more runway before retry.
pub const HIGH_RISK_LEASE_MS: i64 = 120_000;

#[derive(Debug, Clone)]
pub struct Claim {
    pub event_id: Uuid,
    pub agent_id: String,
    pub lease_expiry: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl Claim {
    pub fn new(event_id: Uuid, agent_id: impl Into<String>, lease_ms: i64) -> Self {
        let now = Utc::now();
        Self {
            event_id,
            agent_id: agent_id.into(),
            lease_expiry: now + chrono::Duration::milliseconds(lease_ms),
            last_heartbeat: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.lease_expiry
    }

    pub fn renew(&mut self, lease_ms: i64) {
        let now = Utc::now();
        self.last_heartbeat = now;
        self.lease_expiry = now + chrono::Duration::milliseconds(lease_ms);
    }
}
