//! Property tests for the Event Bus's core concurrency invariants:
//! exactly-one-terminal-transition, at-most-one-active-lease, idempotent
//! publish, and the retry-depth cap.

use proptest::prelude::*;
use swarmengine::domain::models::event::{Event, EventStatus, Payload, RiskLevel, Topic};
use swarmengine::services::event_bus::EventBus;
use swarmengine::services::recovery::Recovery;

fn posted(tags: Vec<&str>) -> Event {
    Event::new(
        Topic::TaskPosted,
        "property test task",
        Payload::default(),
        None,
        tags.into_iter().map(String::from).collect(),
        RiskLevel::Low,
        None,
        None,
    )
}

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

proptest! {
    /// Property: whichever of N concurrent `transition_if_not_terminal`
    /// calls land, exactly one of them performs the transition.
    #[test]
    fn prop_exactly_one_terminal_transition(n in 2usize..20) {
        rt().block_on(async {
            let bus = EventBus::new(300, 1000);
            let e = bus.publish(posted(vec!["data"])).await;

            let mut wins = 0;
            for _ in 0..n {
                if bus.transition_if_not_terminal(e.event_id, EventStatus::Closed).await.unwrap() {
                    wins += 1;
                }
            }
            prop_assert_eq!(wins, 1);

            let after = bus.get_event(e.event_id).await.unwrap();
            prop_assert_eq!(after.status, EventStatus::Closed);
        })?;
    }

    /// Property: of N claim attempts on the same event, at most one
    /// succeeds, regardless of N or agent naming.
    #[test]
    fn prop_at_most_one_active_lease(n in 2usize..20) {
        rt().block_on(async {
            let bus = EventBus::new(300, 1000);
            let e = bus.publish(posted(vec!["data"])).await;

            let mut successes = 0;
            for i in 0..n {
                let outcome = bus.claim(e.event_id, &format!("agent-{i}"), Some(60_000)).await;
                if outcome.ok {
                    successes += 1;
                }
            }
            prop_assert_eq!(successes, 1);
        })?;
    }

    /// Property: republishing the same idempotency key any number of
    /// times yields exactly one stored event.
    #[test]
    fn prop_idempotent_publish_dedups(n in 1usize..15, key in "[a-z]{4,12}") {
        rt().block_on(async {
            let bus = EventBus::new(300, 1000);
            let mut first_id = None;
            for _ in 0..n {
                let mut e = posted(vec!["data"]);
                e.idempotency_key = Some(key.clone());
                let published = bus.publish(e).await;
                match first_id {
                    None => first_id = Some(published.event_id),
                    Some(id) => prop_assert_eq!(published.event_id, id),
                }
            }
            let all = bus
                .query(swarmengine::services::event_bus::EventFilter::default())
                .await;
            prop_assert_eq!(all.len(), 1);
        })?;
    }

    /// Property: Recovery never schedules more than `max_retries` retries
    /// before routing to the dead-letter queue, for any retry chain depth.
    #[test]
    fn prop_retry_cap_is_respected(max_retries in 0u32..5) {
        rt().block_on(async {
            let bus = EventBus::new(300, 1000);
            let recovery = std::sync::Arc::new(Recovery::new(bus.clone(), max_retries, 1, 50, 0.1));
            bus.subscribe(&[Topic::TaskFailed], recovery.clone()).await;

            let root = bus.publish(posted(vec!["data"])).await;
            let mut current = root.clone();

            // Drive failures until the chain stops growing (DLQ'd) or we
            // exceed a safety bound far past any plausible retry count.
            for _ in 0..(max_retries as usize + 3) {
                let failed = Event::new(
                    Topic::TaskFailed,
                    current.intent.clone(),
                    Payload::with_reason("timeout"),
                    Some(current.event_id),
                    vec![],
                    RiskLevel::Low,
                    None,
                    None,
                );
                bus.publish(failed).await;
                tokio::time::sleep(std::time::Duration::from_millis(80)).await;

                let retries = bus
                    .query(swarmengine::services::event_bus::EventFilter {
                        topic: Some(Topic::TaskPosted),
                        ..Default::default()
                    })
                    .await;
                let newest = retries.iter().max_by_key(|e| e.created_at).cloned();
                match newest {
                    Some(e) if e.payload.retry_of == Some(current.event_id) => current = e,
                    _ => break,
                }
            }

            let posted_events = bus
                .query(swarmengine::services::event_bus::EventFilter {
                    topic: Some(Topic::TaskPosted),
                    ..Default::default()
                })
                .await;
            // root + at most max_retries retries.
            prop_assert!(posted_events.len() as u32 <= max_retries + 1);
        })?;
    }
}
