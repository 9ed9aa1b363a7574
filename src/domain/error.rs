//! Error taxonomy for the SwarmEngine core.
//!
//! One `thiserror`-derived enum per subsystem, plus the failure-category
//! classification used by Recovery.

use thiserror::Error;
use uuid::Uuid;

/// Failure category assigned by Recovery when classifying a `reason`/`error`
/// substring. `execution_failed` is explicitly `Model`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    Transient,
    Tooling,
    Model,
    Policy,
    Malice,
}

impl FailureCategory {
    /// Only `Transient` failures are retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Classify a failure by substring match against its reason and error
    /// text, checking malice keywords first, then model/context-exhaustion,
    /// then policy, then tooling, falling back to transient.
    pub fn classify(reason: &str, error: Option<&str>) -> Self {
        let haystack = match error {
            Some(e) => format!("{reason} {e}").to_lowercase(),
            None => reason.to_lowercase(),
        };

        if haystack.contains("inject") || haystack.contains("malicious") || haystack.contains("exploit") {
            return Self::Malice;
        }
        if haystack == "execution_failed" || haystack.contains("execution_failed") {
            return Self::Model;
        }
        if haystack.contains("context exhaust") || haystack.contains("model") {
            return Self::Model;
        }
        if haystack.contains("permission") || haystack.contains("compliance") || haystack.contains("policy") {
            return Self::Policy;
        }
        if haystack.contains("rate limit") || haystack.contains("tool") || haystack.contains("plugin") || haystack.contains("api") {
            return Self::Tooling;
        }
        if haystack.contains("network") || haystack.contains("timeout") || haystack.contains("socket") || haystack.contains("io") {
            return Self::Transient;
        }
        Self::Transient
    }
}

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("event not found: {0}")]
    NotFound(Uuid),

    #[error("event {0} already has an active lease")]
    AlreadyClaimed(Uuid),

    #[error("lease for event {0} is not held by agent {1}")]
    NotLeaseHolder(Uuid, String),

    #[error("event {0} is already terminal")]
    AlreadyTerminal(Uuid),
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("already claimed")]
    AlreadyClaimed,
    #[error("event not found")]
    NotFound,
    #[error("event is terminal")]
    Terminal,
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval record not found: {0}")]
    NotFound(Uuid),
    #[error("approval {0} already decided")]
    AlreadyDecided(Uuid),
}

#[derive(Debug, Error)]
pub enum SecurityGateError {
    #[error("skill rejected: untrusted")]
    Untrusted,
    #[error("skill rejected: signature verification failed")]
    SignatureInvalid,
    #[error("skill rejected: static scan score {0} below required 80")]
    ScanScoreTooLow(u8),
    #[error("skill requires human approval")]
    RequiresApproval,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}
