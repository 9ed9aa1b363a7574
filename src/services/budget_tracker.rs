//! Budget Tracker: maintains the HP/MP/AP scoreboard and broadcasts
//! `HUD_SYNC` after every resource-moving event.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::models::event::{Event, Payload, Topic};
use crate::domain::models::hud::HudState;
use crate::services::event_bus::{EventBus, Subscriber};

pub struct BudgetTracker {
    bus: EventBus,
    state: RwLock<HudState>,
    cash_to_hp_scale: f64,
    ap_gain_on_close: f64,
    ap_loss_on_fail: f64,
}

impl BudgetTracker {
    pub fn new(bus: EventBus, hp_max: f64, mp_max: f64, ap_max: f64, cash_to_hp_scale: f64, ap_gain_on_close: f64, ap_loss_on_fail: f64) -> Self {
        Self {
            bus,
            state: RwLock::new(HudState::new(hp_max, mp_max, ap_max)),
            cash_to_hp_scale,
            ap_gain_on_close,
            ap_loss_on_fail,
        }
    }

    pub async fn snapshot(&self) -> HudState {
        *self.state.read().await
    }

    async fn sync(&self) {
        let state = self.snapshot().await;
        let hud_event = Event::new(
            Topic::HudSync,
            "hud sync",
            Payload::default()
                .with_extra("hp", serde_json::json!(state.hp))
                .with_extra("mp", serde_json::json!(state.mp))
                .with_extra("ap", serde_json::json!(state.ap)),
            None,
            vec![],
            crate::domain::models::event::RiskLevel::Low,
            None,
            None,
        );
        self.bus.publish(hud_event).await;
    }

    async fn settle(&self, task_event_id: uuid::Uuid, outcome_ap_delta: f64) {
        let Some(task) = self.bus.get_event(task_event_id).await else {
            return;
        };
        let Some(cost) = task.cost_delta else {
            return;
        };

        let mut state = self.state.write().await;
        state.mp.decrease(cost.tokens_used as f64);
        state.hp.decrease(cost.cash_used * self.cash_to_hp_scale);
        if outcome_ap_delta >= 0.0 {
            state.ap.increase(outcome_ap_delta);
        } else {
            state.ap.decrease(-outcome_ap_delta);
        }
        drop(state);

        debug!(event_id = %task_event_id, "hud settled");
    }
}

#[async_trait]
impl Subscriber for BudgetTracker {
    async fn handle(&self, event: Event) -> Result<(), String> {
        match event.topic {
            Topic::ArtifactReady => {
                let Some(task_id) = event.parent_event_id else {
                    return Ok(());
                };
                self.settle(task_id, 0.0).await;
                self.sync().await;
            }
            Topic::TaskClosed => {
                if let Some(task_id) = event.parent_event_id {
                    let mut state = self.state.write().await;
                    state.ap.increase(self.ap_gain_on_close);
                    drop(state);
                    let _ = task_id;
                }
                self.sync().await;
            }
            Topic::TaskFailed => {
                let Some(task_id) = event.parent_event_id else {
                    return Ok(());
                };
                self.settle(task_id, -self.ap_loss_on_fail).await;
                self.sync().await;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::{CostDelta, Payload, RiskLevel};

    fn posted() -> Event {
        Event::new(Topic::TaskPosted, "scrape leads", Payload::default(), None, vec!["data".into()], RiskLevel::Low, None, None)
    }

    #[tokio::test]
    async fn artifact_ready_debits_hp_and_mp() {
        let bus = EventBus::new(300, 1000);
        let task = bus.publish(posted()).await;
        bus.set_cost_delta(task.event_id, CostDelta { tokens_used: 1000, minutes_used: 1, cash_used: 1.0 }).await;

        let tracker = BudgetTracker::new(bus.clone(), 10_000.0, 1_000_000.0, 100.0, 100.0, 2.0, 5.0);
        let artifact = Event::new(Topic::ArtifactReady, "done", Payload::default(), Some(task.event_id), vec![], RiskLevel::Low, None, None);
        tracker.handle(artifact).await.unwrap();

        let snap = tracker.snapshot().await;
        assert_eq!(snap.mp.current, 1_000_000.0 - 1_000.0);
        assert_eq!(snap.hp.current, 10_000.0 - 100.0);
    }

    #[tokio::test]
    async fn task_failed_applies_ap_penalty() {
        let bus = EventBus::new(300, 1000);
        let task = bus.publish(posted()).await;
        bus.set_cost_delta(task.event_id, CostDelta { tokens_used: 200, minutes_used: 1, cash_used: 0.1 }).await;

        let tracker = BudgetTracker::new(bus.clone(), 10_000.0, 1_000_000.0, 100.0, 100.0, 2.0, 5.0);
        let failed = Event::new(Topic::TaskFailed, "oops", Payload::default(), Some(task.event_id), vec![], RiskLevel::Low, None, None);
        tracker.handle(failed).await.unwrap();

        let snap = tracker.snapshot().await;
        assert_eq!(snap.ap.current, 100.0 - 5.0);
    }

    #[tokio::test]
    async fn task_closed_grants_ap_bonus() {
        let bus = EventBus::new(300, 1000);
        let task = bus.publish(posted()).await;
        let tracker = BudgetTracker::new(bus.clone(), 10_000.0, 1_000_000.0, 100.0, 100.0, 2.0, 5.0);
        let closed = Event::new(Topic::TaskClosed, "done", Payload::default(), Some(task.event_id), vec![], RiskLevel::Low, None, None);
        tracker.handle(closed).await.unwrap();

        let snap = tracker.snapshot().await;
        assert_eq!(snap.ap.current, 100.0);
    }
}
