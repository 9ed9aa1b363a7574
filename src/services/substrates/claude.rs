//! Claude/LLM substrate boundary. The Claude/LLM adapter itself is an
//! external collaborator out of scope for this crate: this
//! type exists only so the Executor has something to call through when
//! `execution_mode = claude`, and is expected to be swapped for a real
//! client by the embedding application.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{AgentRuntime, Progress, RunOutcome, RuntimeHandle};

struct NoopHandle;

#[async_trait]
impl RuntimeHandle for NoopHandle {
    async fn cancel(&self) {}
}

/// Placeholder boundary substrate. Until a concrete `AgentRuntime.execute`
/// adapter is wired in by the embedding application, this reports
/// `execution_failed` so failures flow through Recovery exactly like a
/// real runtime's reported failure would.
pub struct ClaudeRuntime;

#[async_trait]
impl AgentRuntime for ClaudeRuntime {
    async fn execute(
        &self,
        _intent: &str,
        _required_tags: &[String],
    ) -> (mpsc::Receiver<Progress>, oneshot::Receiver<RunOutcome>, Box<dyn RuntimeHandle>) {
        let (_progress_tx, progress_rx) = mpsc::channel(1);
        let (result_tx, result_rx) = oneshot::channel();
        let _ = result_tx.send(RunOutcome {
            success: false,
            artifact: serde_json::Value::Null,
            evidence: serde_json::Value::Null,
            cost_delta: crate::domain::models::event::CostDelta::default(),
            failure_reason: Some("execution_failed: no claude adapter configured".to_string()),
        });
        (progress_rx, result_rx, Box::new(NoopHandle))
    }
}
