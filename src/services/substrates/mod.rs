//! Runtime polymorphism across execution modes: a
//! single `AgentRuntime` capability the Executor depends on, with
//! `{mock, claude, team}` implementations. The Claude/LLM adapter itself is
//! out of scope — the `claude` substrate here is the thin
//! boundary the Executor calls through; it is not a full LLM client.

pub mod claude;
pub mod mock;
pub mod team;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::models::event::CostDelta;

#[derive(Debug, Clone)]
pub struct Progress {
    pub message: String,
    pub pct_complete: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub artifact: serde_json::Value,
    pub evidence: serde_json::Value,
    pub cost_delta: CostDelta,
    pub failure_reason: Option<String>,
}

/// An opaque handle to an in-flight runtime invocation.
#[async_trait]
pub trait RuntimeHandle: Send + Sync {
    async fn cancel(&self);
}

/// `AgentRuntime.execute(intent, profile) → stream<Progress> + Result`
///. Implementations stream `Progress` over the returned
/// channel and resolve `outcome` once execution completes.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn execute(
        &self,
        intent: &str,
        required_tags: &[String],
    ) -> (mpsc::Receiver<Progress>, tokio::sync::oneshot::Receiver<RunOutcome>, Box<dyn RuntimeHandle>);
}
