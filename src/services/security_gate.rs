//! Skill Security Gate: the trust-tier install pipeline for third-party
//! skills, gating on static-scan score, signature verification, and an
//! explicit human-approval allowlist for high-risk permissions.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::error::SecurityGateError;
use crate::domain::models::event::{Event, Payload, RiskLevel, Topic};
use crate::domain::models::skill::{SkillManifest, Trust};
use crate::services::event_bus::EventBus;

const MIN_SCAN_SCORE: u8 = 80;

pub struct SecurityGate {
    bus: EventBus,
    allowlist: RwLock<HashSet<String>>,
}

impl SecurityGate {
    pub fn new(bus: EventBus) -> Arc<Self> {
        Arc::new(Self { bus, allowlist: RwLock::new(HashSet::new()) })
    }

    /// Grant a skill id standing approval to carry high-risk permissions.
    /// Called once a human has signed off via the approval pipeline.
    pub async fn approve(&self, skill_id: impl Into<String>) {
        self.allowlist.write().await.insert(skill_id.into());
    }

    async fn is_allowlisted(&self, skill_id: &str) -> bool {
        self.allowlist.read().await.contains(skill_id)
    }

    /// Attempt to install a skill. `signature_valid` is supplied by an
    /// external verifier; this gate only combines it with trust tier,
    /// scan score, and permission risk into an accept/reject decision.
    ///
    /// Per tier: OFFICIAL always allows. INTERNAL_SIGNED allows iff the
    /// signature verifies. UNTRUSTED always rejects. THIRD_PARTY requires
    /// a static scan score floor, then allows outright if it carries no
    /// high-risk permission, else falls back to the allowlist, else
    /// requires human approval.
    pub async fn install_skill(&self, manifest: SkillManifest, signature_valid: bool) -> Result<SkillManifest, SecurityGateError> {
        match manifest.trust {
            Trust::Untrusted => {
                self.quarantine(&manifest, "untrusted skill source").await;
                return Err(SecurityGateError::Untrusted);
            }
            Trust::InternalSigned => {
                if !signature_valid {
                    self.quarantine(&manifest, "signature verification failed").await;
                    return Err(SecurityGateError::SignatureInvalid);
                }
            }
            Trust::ThirdParty => {
                if manifest.static_scan_score < MIN_SCAN_SCORE {
                    self.quarantine(&manifest, &format!("scan score {} below required {}", manifest.static_scan_score, MIN_SCAN_SCORE)).await;
                    return Err(SecurityGateError::ScanScoreTooLow(manifest.static_scan_score));
                }
                if manifest.permissions.has_high_risk() && !self.is_allowlisted(&manifest.skill_id).await {
                    warn!(skill_id = %manifest.skill_id, "third-party skill with high-risk permissions requires approval");
                    return Err(SecurityGateError::RequiresApproval);
                }
            }
            Trust::Official => {}
        }

        info!(skill_id = %manifest.skill_id, trust = ?manifest.trust, "skill installed");
        let updated_event = Event::new(
            Topic::AssetUpdated,
            format!("installed skill {}", manifest.skill_id),
            Payload::default().with_extra("skill_id", serde_json::json!(manifest.skill_id)),
            None,
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        self.bus.publish(updated_event).await;

        Ok(manifest)
    }

    async fn quarantine(&self, manifest: &SkillManifest, reason: &str) {
        warn!(skill_id = %manifest.skill_id, reason, "skill quarantined");
        let quarantined_event = Event::new(
            Topic::SkillQuarantined,
            reason.to_string(),
            Payload::with_reason(reason).with_extra("skill_id", serde_json::json!(manifest.skill_id)),
            None,
            vec![],
            RiskLevel::High,
            None,
            None,
        );
        self.bus.publish(quarantined_event).await;
    }
}
