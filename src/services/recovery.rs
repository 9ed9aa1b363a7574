//! Recovery: classifies failures and decides whether to retry, escalate, or
//! route straight to the dead-letter queue.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::error::FailureCategory;
use crate::domain::models::event::{Event, Payload, Topic};
use crate::services::event_bus::{EventBus, Subscriber};

pub struct Recovery {
    bus: EventBus,
    max_retries: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
    jitter_fraction: f64,
}

impl Recovery {
    pub fn new(bus: EventBus, max_retries: u32, base_backoff_ms: u64, max_backoff_ms: u64, jitter_fraction: f64) -> Self {
        Self { bus, max_retries, base_backoff_ms, max_backoff_ms, jitter_fraction }
    }

    /// Count retries already taken by walking the `retry_of` chain back to
    /// the original attempt.
    async fn retry_depth(&self, mut event_id: Uuid) -> u32 {
        let mut depth = 0;
        loop {
            let Some(event) = self.bus.get_event(event_id).await else {
                return depth;
            };
            match event.payload.retry_of {
                Some(prev) => {
                    depth += 1;
                    event_id = prev;
                }
                None => return depth,
            }
        }
    }

    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let exp = self.base_backoff_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.max_backoff_ms);
        let jitter_span = (capped as f64 * self.jitter_fraction) as i64;
        let jitter = if jitter_span > 0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0
        };
        let with_jitter = (capped as i64 + jitter).max(0) as u64;
        Duration::from_millis(with_jitter)
    }

    async fn handle_failure(&self, failed_event_id: Uuid, reason: &str, error: Option<&str>) {
        let Some(task) = self.bus.get_event(failed_event_id).await else {
            warn!(event_id = %failed_event_id, "recovery could not find failed task");
            return;
        };

        let category = FailureCategory::classify(reason, error);
        let depth = self.retry_depth(task.event_id).await;

        if !category.is_retryable() || depth >= self.max_retries {
            info!(
                event_id = %task.event_id,
                category = ?category,
                depth,
                "routing to dead-letter queue"
            );
            self.bus.dead_letter(task.clone(), format!("{category:?}: {reason}")).await;
            return;
        }

        let delay = self.backoff_with_jitter(depth);
        info!(event_id = %task.event_id, depth, delay_ms = delay.as_millis() as u64, "scheduling retry");

        let bus = self.bus.clone();
        let retry_event = Event::new(
            task.topic,
            task.intent.clone(),
            Payload { retry_of: Some(task.event_id), ..Payload::default() },
            task.parent_event_id,
            task.required_tags.clone(),
            task.risk_level,
            task.budget,
            None,
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.publish(retry_event).await;
        });
    }
}

#[async_trait]
impl Subscriber for Recovery {
    async fn handle(&self, event: Event) -> Result<(), String> {
        match event.topic {
            Topic::TaskFailed => {
                let Some(task_id) = event.parent_event_id else {
                    return Ok(());
                };
                let reason = event.payload.reason.clone().unwrap_or_default();
                self.handle_failure(task_id, &reason, event.payload.error.as_deref()).await;
            }
            Topic::SosError => {
                let Some(task_id) = event.parent_event_id else {
                    return Ok(());
                };
                let reason = event.payload.reason.clone().unwrap_or_else(|| "sos".to_string());
                self.handle_failure(task_id, &reason, event.payload.error.as_deref()).await;
            }
            Topic::TaskRetryScheduled => {
                // Lease expiry already reset the task to OPEN for the matcher
                // to re-claim; nothing further to schedule here, but the
                // occurrence is still worth a trace line for the audit trail.
                info!(event_id = ?event.parent_event_id, reason = ?event.payload.reason, "retry scheduled by lease expiry");
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::{RiskLevel, Topic};
    use std::sync::Arc;

    fn posted() -> Event {
        Event::new(Topic::TaskPosted, "scrape leads", Payload::default(), None, vec!["data".into()], RiskLevel::Low, None, None)
    }

    #[tokio::test]
    async fn transient_failure_schedules_a_retry() {
        let bus = EventBus::new(300, 1000);
        let task = bus.publish(posted()).await;
        let recovery = Arc::new(Recovery::new(bus.clone(), 2, 10, 1000, 0.2));
        bus.subscribe(&[Topic::TaskFailed], recovery.clone()).await;

        let failed = Event::new(
            Topic::TaskFailed,
            task.intent.clone(),
            Payload::with_reason("network timeout"),
            Some(task.event_id),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        bus.publish(failed).await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        let retries = bus
            .query(crate::services::event_bus::EventFilter {
                topic: Some(Topic::TaskPosted),
                ..Default::default()
            })
            .await;
        assert_eq!(retries.len(), 2);
        assert!(retries.iter().any(|r| r.payload.retry_of == Some(task.event_id)));
    }

    #[tokio::test]
    async fn policy_failure_goes_straight_to_dlq() {
        let bus = EventBus::new(300, 1000);
        let task = bus.publish(posted()).await;
        let recovery = Arc::new(Recovery::new(bus.clone(), 2, 10, 1000, 0.2));
        bus.subscribe(&[Topic::TaskFailed], recovery.clone()).await;

        let failed = Event::new(
            Topic::TaskFailed,
            task.intent.clone(),
            Payload::with_reason("permission denied"),
            Some(task.event_id),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        bus.publish(failed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let dlq = bus.get_dlq(10).await;
        assert_eq!(dlq.len(), 1);
        assert!(dlq[0].reason.contains("Policy"));
    }

    #[tokio::test]
    async fn retry_scheduled_event_is_observed_without_duplicating_the_retry() {
        let bus = EventBus::new(300, 1000);
        let recovery = Arc::new(Recovery::new(bus.clone(), 2, 10, 1000, 0.2));
        bus.subscribe(&[Topic::TaskRetryScheduled], recovery.clone()).await;

        let task = bus.publish(posted()).await;
        let retry_scheduled = Event::new(
            Topic::TaskRetryScheduled,
            "lease expired",
            Payload::with_reason("lease_expired"),
            Some(task.event_id),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        bus.publish(retry_scheduled).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let posted_events = bus
            .query(crate::services::event_bus::EventFilter { topic: Some(Topic::TaskPosted), ..Default::default() })
            .await;
        assert_eq!(posted_events.len(), 1, "observing retry-scheduled must not post an extra retry");
    }

    #[tokio::test]
    async fn exhausted_retries_route_to_dlq() {
        let bus = EventBus::new(300, 1000);
        let recovery = Arc::new(Recovery::new(bus.clone(), 1, 5, 100, 0.1));
        bus.subscribe(&[Topic::TaskFailed], recovery.clone()).await;

        let root = bus.publish(posted()).await;
        let first_retry = Event::new(
            root.topic,
            root.intent.clone(),
            Payload { retry_of: Some(root.event_id), ..Payload::default() },
            None,
            root.required_tags.clone(),
            root.risk_level,
            root.budget,
            None,
        );
        let first_retry = bus.publish(first_retry).await;

        let failed = Event::new(
            Topic::TaskFailed,
            first_retry.intent.clone(),
            Payload::with_reason("timeout"),
            Some(first_retry.event_id),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        bus.publish(failed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let dlq = bus.get_dlq(10).await;
        assert_eq!(dlq.len(), 1);
    }
}
