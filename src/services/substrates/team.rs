//! Team substrate: used when `execution_mode = team`. Behaves like the
//! mock runtime (deterministic in-process completion) but is kept as a
//! distinct type so the Executor's mode dispatch stays exhaustive and a
//! real multi-agent backend can be dropped in without touching call sites.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::mock::{MockResponse, MockRuntime};
use super::{AgentRuntime, Progress, RunOutcome, RuntimeHandle};

pub struct TeamRuntime {
    inner: MockRuntime,
}

impl Default for TeamRuntime {
    fn default() -> Self {
        Self { inner: MockRuntime::new(MockResponse::default()) }
    }
}

#[async_trait]
impl AgentRuntime for TeamRuntime {
    async fn execute(
        &self,
        intent: &str,
        required_tags: &[String],
    ) -> (mpsc::Receiver<Progress>, oneshot::Receiver<RunOutcome>, Box<dyn RuntimeHandle>) {
        self.inner.execute(intent, required_tags).await
    }
}
