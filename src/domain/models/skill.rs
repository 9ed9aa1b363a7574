//! Skill manifest domain model, consumed by the security gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trust {
    Official,
    InternalSigned,
    ThirdParty,
    Untrusted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub fs_read: bool,
    pub fs_write: bool,
    pub network: bool,
    pub secrets: bool,
    pub external_send: bool,
    pub shell_exec: bool,
}

impl Permissions {
    /// Any permission the security gate treats as "high-risk" for the
    /// THIRD_PARTY tier: write, unrestricted network,
    /// secrets, external send, or shell exec.
    pub fn has_high_risk(&self) -> bool {
        self.fs_write || self.network || self.secrets || self.external_send || self.shell_exec
    }

    pub fn strip_external_send_and_shell(&mut self) {
        self.external_send = false;
        self.shell_exec = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub skill_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub tags: Vec<String>,
    pub risk_level: super::event::RiskLevel,
    pub permissions: Permissions,
    pub trust: Trust,
    pub static_scan_score: u8,
    pub last_audit_at: Option<DateTime<Utc>>,
    pub entry_point: String,
}

impl SkillManifest {
    /// Derive the skill id from the parent directory name: lowercase,
    /// whitespace collapsed to `-`.
    pub fn derive_skill_id(dir_name: &str) -> String {
        dir_name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    }
}
