//! End-to-end pipeline scenarios, wiring the same services `main.rs`
//! bootstraps together onto one bus and driving a task through it.

use std::sync::Arc;
use std::time::Duration;

use swarmengine::domain::models::agent::Agent;
use swarmengine::domain::models::event::{Event, EventStatus, Payload, RiskLevel, Topic};
use swarmengine::services::budget_tracker::BudgetTracker;
use swarmengine::services::decomposer::Decomposer;
use swarmengine::services::event_bus::{EventBus, EventFilter, Subscriber};
use swarmengine::services::execution_mode::{ExecutionMode, ExecutionModeHandle};
use swarmengine::services::executor::Executor;
use swarmengine::services::matcher::Matcher;
use swarmengine::services::task_analyzer::TaskAnalyzer;

async fn wait_for_terminal(bus: &EventBus, event_id: uuid::Uuid) -> Event {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = bus.get_event(event_id).await.unwrap();
        if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Single-tag task posted in mock mode: matched, run to completion, and
/// closed, with the HUD's resource pools strictly debited.
#[tokio::test]
async fn simple_relay_closes_and_debits_budget() {
    let bus = EventBus::new(300, 1000);
    let mode = ExecutionModeHandle::new(ExecutionMode::Mock);

    let matcher = Matcher::new(bus.clone(), 2000);
    matcher
        .register(Agent::recruit("relay-worker", std::collections::HashSet::from(["data".to_string()])))
        .await;
    let executor = Executor::new(bus.clone(), mode, matcher.clone(), 2000);
    let budget_tracker = Arc::new(BudgetTracker::new(bus.clone(), 10_000.0, 1_000_000.0, 100.0, 100.0, 2.0, 5.0));

    bus.subscribe(&[Topic::TaskClaimed], executor.clone()).await;
    bus.subscribe(&[Topic::ArtifactReady, Topic::TaskClosed, Topic::TaskFailed], budget_tracker.clone()).await;

    let posted = Event::new(
        Topic::TaskPosted,
        "scrape one lead",
        Payload::default(),
        None,
        vec!["data".into()],
        RiskLevel::Low,
        None,
        None,
    );
    let posted = bus.publish(posted).await;
    matcher.handle(posted.clone()).await.unwrap();

    let settled = wait_for_terminal(&bus, posted.event_id).await;
    assert_eq!(settled.status, EventStatus::Closed);

    let artifacts = bus
        .query(EventFilter { topic: Some(Topic::ArtifactReady), parent_event_id: Some(posted.event_id), ..Default::default() })
        .await;
    assert_eq!(artifacts.len(), 1);

    let closed = bus
        .query(EventFilter { topic: Some(Topic::TaskClosed), parent_event_id: Some(posted.event_id), ..Default::default() })
        .await;
    assert_eq!(closed.len(), 1);

    let hud = budget_tracker.snapshot().await;
    assert!(hud.mp.current < 1_000_000.0);
    assert!(hud.hp.current < 10_000.0);
    assert!(hud.ap.current > 100.0);

    let agents = matcher.all_agents().await;
    assert!(agents[0].is_idle());
}

/// A two-tag task in team mode is decomposed into per-tag sub-tasks, each
/// claimed and executed independently, and the parent closes exactly once
/// with the sub-tasks' costs aggregated onto it.
#[tokio::test]
async fn team_mode_decomposition_closes_parent_exactly_once_with_aggregated_cost() {
    let bus = EventBus::new(300, 1000);
    let mode = ExecutionModeHandle::new(ExecutionMode::Team);

    let matcher = Matcher::new(bus.clone(), 2000);
    matcher
        .register(Agent::recruit("data-worker", std::collections::HashSet::from(["data".to_string()])))
        .await;
    matcher
        .register(Agent::recruit("report-worker", std::collections::HashSet::from(["report".to_string()])))
        .await;

    let task_analyzer = TaskAnalyzer::new(bus.clone(), 2000);
    let decomposer = Decomposer::new(bus.clone(), mode.clone(), 2000);
    let executor = Executor::new(bus.clone(), mode, matcher.clone(), 2000);

    bus.subscribe(&[Topic::TaskPosted], task_analyzer.clone()).await;
    bus.subscribe(&[Topic::TaskPosted], decomposer.clone()).await;
    bus.subscribe(&[Topic::TaskPosted], matcher.clone()).await;
    bus.subscribe(&[Topic::TaskClaimed], executor.clone()).await;

    let root = Event::new(
        Topic::TaskPosted,
        "clean leads and write report",
        Payload::default(),
        None,
        vec!["data".into(), "report".into()],
        RiskLevel::Low,
        None,
        None,
    );
    let root = bus.publish(root).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = bus.get_event(root.event_id).await.unwrap();
        if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let settled = bus.get_event(root.event_id).await.unwrap();
    assert_eq!(settled.status, EventStatus::Closed);
    assert!(settled.cost_delta.unwrap().tokens_used > 0, "parent cost should reflect at least one closed sub-task");

    let parent_closed = bus
        .query(EventFilter { topic: Some(Topic::TaskClosed), parent_event_id: Some(root.event_id), ..Default::default() })
        .await;
    assert_eq!(parent_closed.len(), 1, "parent TASK_CLOSED must be published exactly once");

    let subs = bus
        .query(EventFilter { topic: Some(Topic::TaskPosted), parent_event_id: Some(root.event_id), ..Default::default() })
        .await;
    assert_eq!(subs.len(), 2);
    assert!(subs.iter().all(|s| s.status == EventStatus::Closed));
}
