//! Mock runtime substrate: deterministic, in-process, used for tests and
//! for the default `mock` execution mode. A configurable `MockResponse`
//! controls whether the run succeeds, how many progress ticks it emits,
//! and what cost it reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::domain::models::event::CostDelta;

use super::{AgentRuntime, Progress, RunOutcome, RuntimeHandle};

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub fail: bool,
    pub failure_reason: Option<String>,
    pub progress_steps: u32,
    pub tokens_used: u64,
    pub minutes_used: u64,
    pub cash_used: f64,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            fail: false,
            failure_reason: None,
            progress_steps: 2,
            tokens_used: 500,
            minutes_used: 1,
            cash_used: 0.05,
        }
    }
}

impl MockResponse {
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            fail: true,
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}

struct MockHandle(Arc<AtomicBool>);

#[async_trait]
impl RuntimeHandle for MockHandle {
    async fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

pub struct MockRuntime {
    response: MockResponse,
}

impl MockRuntime {
    pub fn new(response: MockResponse) -> Self {
        Self { response }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new(MockResponse::default())
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    async fn execute(
        &self,
        intent: &str,
        _required_tags: &[String],
    ) -> (mpsc::Receiver<Progress>, oneshot::Receiver<RunOutcome>, Box<dyn RuntimeHandle>) {
        let (progress_tx, progress_rx) = mpsc::channel(16);
        let (result_tx, result_rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = Box::new(MockHandle(cancelled.clone()));

        let response = self.response.clone();
        let intent = intent.to_string();
        tokio::spawn(async move {
            for step in 0..response.progress_steps {
                if cancelled.load(Ordering::SeqCst) {
                    return;
                }
                let _ = progress_tx
                    .send(Progress {
                        message: format!("working on '{intent}' (step {})", step + 1),
                        pct_complete: Some((100 * (step + 1) / response.progress_steps.max(1)) as u8),
                    })
                    .await;
            }

            if cancelled.load(Ordering::SeqCst) {
                return;
            }

            let outcome = if response.fail {
                RunOutcome {
                    success: false,
                    artifact: serde_json::Value::Null,
                    evidence: serde_json::Value::Null,
                    cost_delta: CostDelta::default(),
                    failure_reason: response.failure_reason.clone(),
                }
            } else {
                RunOutcome {
                    success: true,
                    artifact: serde_json::json!({ "summary": format!("completed: {intent}") }),
                    evidence: serde_json::json!({ "log": "mock execution trace" }),
                    cost_delta: CostDelta {
                        tokens_used: response.tokens_used,
                        minutes_used: response.minutes_used,
                        cash_used: response.cash_used,
                    },
                    failure_reason: None,
                }
            };
            let _ = result_tx.send(outcome);
        });

        (progress_rx, result_rx, handle)
    }
}
