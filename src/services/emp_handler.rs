//! Emergency Measures Protocol: cascades a fixed containment sequence
//! whenever an approval is rejected, rather than letting the rejected
//! request's agent keep running unsupervised.

use async_trait::async_trait;
use tracing::warn;

use crate::domain::models::event::{Event, Payload, RiskLevel, Topic};
use crate::services::event_bus::{EventBus, Subscriber};

const CASCADE_ACTIONS: &[&str] = &["SANDBOX_TERMINATED", "TOKENS_REVOKED", "TASK_FAILED"];

pub struct EmpHandler {
    bus: EventBus,
}

impl EmpHandler {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Sandbox and token subsystems are abstract capabilities here; this
    /// logs their invocation rather than calling out to a real runtime.
    fn terminate_sandbox(&self, target_event_id: Option<uuid::Uuid>) {
        warn!(?target_event_id, "emp: terminating sandbox");
    }

    fn revoke_tokens(&self, target_event_id: Option<uuid::Uuid>) {
        warn!(?target_event_id, "emp: revoking tokens");
    }

    fn war_report(&self, target_event_id: Option<uuid::Uuid>) -> serde_json::Value {
        serde_json::json!({
            "kind": "war_report",
            "target_event_id": target_event_id,
            "actions": CASCADE_ACTIONS,
        })
    }

    async fn cascade(&self, target_event_id: Option<uuid::Uuid>) {
        warn!(?target_event_id, "emergency measures protocol engaged");
        self.terminate_sandbox(target_event_id);
        self.revoke_tokens(target_event_id);
        let evidence_pack = self.war_report(target_event_id);

        let failed_event = Event::new(
            Topic::TaskFailed,
            "emergency measures protocol engaged",
            Payload {
                reason: Some("emp_cascade: approval rejected".to_string()),
                evidence_pack: Some(evidence_pack),
                emp_actions: Some(CASCADE_ACTIONS.iter().map(|a| a.to_string()).collect()),
                ..Payload::default()
            },
            target_event_id,
            vec![],
            RiskLevel::High,
            None,
            None,
        );
        self.bus.publish(failed_event).await;
    }
}

#[async_trait]
impl Subscriber for EmpHandler {
    async fn handle(&self, event: Event) -> Result<(), String> {
        if event.topic != Topic::ApprovalDecision {
            return Ok(());
        }
        if event.payload.decision.as_deref() == Some("rejected") {
            self.cascade(event.parent_event_id).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_bus::EventFilter;
    use uuid::Uuid;

    #[tokio::test]
    async fn rejection_triggers_cascade() {
        let bus = EventBus::new(300, 1000);
        let handler = EmpHandler::new(bus.clone());

        let decision = Event::new(
            Topic::ApprovalDecision,
            "rejected",
            Payload { decision: Some("rejected".to_string()), ..Payload::default() },
            Some(Uuid::new_v4()),
            vec![],
            RiskLevel::High,
            None,
            None,
        );
        handler.handle(decision).await.unwrap();

        let failed = bus.query(EventFilter { topic: Some(Topic::TaskFailed), ..Default::default() }).await;
        assert_eq!(failed.len(), 1);
        assert!(failed[0].payload.emp_actions.as_ref().unwrap().contains(&"TOKENS_REVOKED".to_string()));
        assert!(failed[0].payload.evidence_pack.is_some());
    }

    #[tokio::test]
    async fn approval_does_not_cascade() {
        let bus = EventBus::new(300, 1000);
        let handler = EmpHandler::new(bus.clone());

        let decision = Event::new(
            Topic::ApprovalDecision,
            "approved",
            Payload { decision: Some("approved".to_string()), ..Payload::default() },
            Some(Uuid::new_v4()),
            vec![],
            RiskLevel::Medium,
            None,
            None,
        );
        handler.handle(decision).await.unwrap();

        let failed = bus.query(EventFilter { topic: Some(Topic::TaskFailed), ..Default::default() }).await;
        assert!(failed.is_empty());
    }
}
