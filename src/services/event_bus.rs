//! The Event Bus: a single-writer append-only record of all facts with
//! topic pub/sub, claim-lease concurrency control, idempotency, a
//! dead-letter queue, and replay.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::domain::error::{ClaimError, EventBusError};
use crate::domain::models::claim::{Claim, DEFAULT_LEASE_MS, HIGH_RISK_LEASE_MS};
use crate::domain::models::dlq::DeadLetterEntry;
use crate::domain::models::event::{Event, EventStatus, RiskLevel, Topic};

/// A subscriber's handler callback. Implementors must be idempotent against
/// their own bounded `processed_events` set; the bus does not
/// deduplicate on their behalf.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), String>;
}

/// Convenience wrapper so plain async closures can be registered directly
/// without a bespoke struct.
pub struct FnSubscriber<F>(pub F);

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), String>> + Send,
{
    async fn handle(&self, event: Event) -> Result<(), String> {
        (self.0)(event).await
    }
}

struct Registration {
    id: usize,
    topic: Topic,
    subscriber: Arc<dyn Subscriber>,
}

/// Conjunctive filter for `query`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub topic: Option<Topic>,
    pub status: Option<EventStatus>,
    pub parent_event_id: Option<Uuid>,
}

impl EventFilter {
    fn matches(&self, e: &Event) -> bool {
        if let Some(t) = self.topic {
            if e.topic != t {
                return false;
            }
        }
        if let Some(s) = self.status {
            if e.status != s {
                return false;
            }
        }
        if let Some(p) = self.parent_event_id {
            if e.parent_event_id != Some(p) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub queue_depth: usize,
    pub dlq_depth: usize,
    pub claim_conflict_rate: f64,
    pub retry_storm: bool,
    pub throughput_1h: u64,
    pub total_tokens_used: u64,
    pub total_cash_used: f64,
}

#[derive(Debug, Clone)]
pub struct ClaimOutcome {
    pub ok: bool,
    pub lease_expiry: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

struct ClaimWindowSample {
    at: DateTime<Utc>,
    succeeded: bool,
}

struct Inner {
    events: HashMap<Uuid, Event>,
    claims: HashMap<Uuid, Claim>,
    idempotency: HashMap<String, (Uuid, DateTime<Utc>)>,
    dlq: VecDeque<DeadLetterEntry>,
    claim_samples: VecDeque<ClaimWindowSample>,
    publish_log: VecDeque<DateTime<Utc>>,
    lease_timers: HashMap<Uuid, JoinHandle<()>>,
}

/// The append-only blackboard. Cheap to clone (an `Arc` handle) so every
/// subsystem holds its own reference.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<RwLock<Inner>>,
    subscriptions: Arc<RwLock<Vec<Registration>>>,
    next_subscription_id: Arc<std::sync::atomic::AtomicUsize>,
    idempotency_ttl: chrono::Duration,
    dlq_capacity: usize,
}

impl EventBus {
    pub fn new(idempotency_ttl_secs: i64, dlq_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                events: HashMap::new(),
                claims: HashMap::new(),
                idempotency: HashMap::new(),
                dlq: VecDeque::new(),
                claim_samples: VecDeque::new(),
                publish_log: VecDeque::new(),
                lease_timers: HashMap::new(),
            })),
            subscriptions: Arc::new(RwLock::new(Vec::new())),
            next_subscription_id: Arc::new(std::sync::atomic::AtomicUsize::new(1)),
            idempotency_ttl: chrono::Duration::seconds(idempotency_ttl_secs),
            dlq_capacity,
        }
    }

    /// Register a handler for a set of topics. Returns a stable token that
    /// can be passed to [`EventBus::unsubscribe`] to remove every
    /// registration made by this call, regardless of how many topics it
    /// covered.
    pub async fn subscribe(&self, topics: &[Topic], subscriber: Arc<dyn Subscriber>) -> usize {
        let id = self.next_subscription_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut subs = self.subscriptions.write().await;
        for topic in topics {
            subs.push(Registration {
                id,
                topic: *topic,
                subscriber: subscriber.clone(),
            });
        }
        id
    }

    /// Remove every registration made by the `subscribe` call that returned
    /// `id`. Returns whether anything was removed.
    pub async fn unsubscribe(&self, id: usize) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|r| r.id != id);
        subs.len() != before
    }

    /// Publish an event. Honors idempotency, persists the event, and
    /// invokes every subscriber of its topic to completion before
    /// returning.
    #[instrument(skip(self, event), fields(topic = %event.topic, event_id = %event.event_id))]
    pub async fn publish(&self, mut event: Event) -> Event {
        if let Some(key) = event.idempotency_key.clone() {
            let mut inner = self.inner.write().await;
            if let Some((existing_id, seen_at)) = inner.idempotency.get(&key).copied() {
                if Utc::now() - seen_at < self.idempotency_ttl {
                    if let Some(existing) = inner.events.get(&existing_id) {
                        debug!(key = %key, "idempotent publish absorbed");
                        return existing.clone();
                    }
                }
            }
            inner.idempotency.insert(key, (event.event_id, Utc::now()));
        }

        event.updated_at = Utc::now();
        {
            let mut inner = self.inner.write().await;
            inner.events.insert(event.event_id, event.clone());
            inner.publish_log.push_back(Utc::now());
            while inner
                .publish_log
                .front()
                .is_some_and(|t| Utc::now() - *t > chrono::Duration::hours(1))
            {
                inner.publish_log.pop_front();
            }
        }

        let handlers: Vec<Arc<dyn Subscriber>> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|r| r.topic == event.topic)
                .map(|r| r.subscriber.clone())
                .collect()
        };

        for handler in handlers {
            if let Err(reason) = handler.handle(event.clone()).await {
                warn!(reason = %reason, "subscriber failed, routing to DLQ");
                self.dead_letter(event.clone(), reason).await;
            }
        }

        event
    }

    pub async fn get_event(&self, id: Uuid) -> Option<Event> {
        self.inner.read().await.events.get(&id).cloned()
    }

    pub async fn query(&self, filter: EventFilter) -> Vec<Event> {
        self.inner
            .read()
            .await
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Attempt to claim an event. First-writer-wins; later claimants get
    /// `{ok:false, reason:"already claimed"}`.
    pub async fn claim(&self, event_id: Uuid, agent_id: &str, lease_ms: Option<i64>) -> ClaimOutcome {
        let mut inner = self.inner.write().await;

        let Some(event) = inner.events.get(&event_id).cloned() else {
            return ClaimOutcome { ok: false, lease_expiry: None, reason: Some("not found".into()) };
        };

        if event.status.is_terminal() {
            return ClaimOutcome { ok: false, lease_expiry: None, reason: Some("event is terminal".into()) };
        }

        // A root the Decomposer has marked RESOLVING is spoken for even
        // though no claim row exists yet for it; claiming it here would let
        // it run standalone alongside its own sub-tasks and double-emit a
        // terminal transition.
        if event.status == EventStatus::Resolving {
            return ClaimOutcome { ok: false, lease_expiry: None, reason: Some("event is resolving".into()) };
        }

        if inner.claims.contains_key(&event_id) {
            inner.claim_samples.push_back(ClaimWindowSample { at: Utc::now(), succeeded: false });
            return ClaimOutcome { ok: false, lease_expiry: None, reason: Some("already claimed".into()) };
        }

        let lease_ms = lease_ms.unwrap_or(match event.risk_level {
            RiskLevel::High => HIGH_RISK_LEASE_MS,
            _ => DEFAULT_LEASE_MS,
        });

        let claim = Claim::new(event_id, agent_id, lease_ms);
        let lease_expiry = claim.lease_expiry;
        inner.claims.insert(event_id, claim);
        inner.claim_samples.push_back(ClaimWindowSample { at: Utc::now(), succeeded: true });

        let mut claimed_snapshot = None;
        if let Some(mut e) = inner.events.get(&event_id).cloned() {
            e.status = EventStatus::Claimed;
            e.claimed_by = Some(agent_id.to_string());
            e.updated_at = Utc::now();
            inner.events.insert(event_id, e.clone());
            claimed_snapshot = Some(e);
        }

        self.arm_lease_timer(&mut inner, event_id, lease_ms);
        drop(inner);

        if let Some(task) = claimed_snapshot {
            let claimed_notice = Event::new(
                Topic::TaskClaimed,
                task.intent.clone(),
                crate::domain::models::event::Payload::default()
                    .with_extra("agent_id", serde_json::json!(agent_id)),
                Some(event_id),
                task.required_tags.clone(),
                task.risk_level,
                task.budget,
                None,
            );
            self.publish(claimed_notice).await;
        }

        ClaimOutcome { ok: true, lease_expiry: Some(lease_expiry), reason: None }
    }

    fn arm_lease_timer(&self, inner: &mut Inner, event_id: Uuid, lease_ms: i64) {
        if let Some(old) = inner.lease_timers.remove(&event_id) {
            old.abort();
        }
        let bus = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(lease_ms.max(0) as u64)).await;
            bus.on_lease_expiry(event_id).await;
        });
        inner.lease_timers.insert(event_id, handle);
    }

    async fn on_lease_expiry(&self, event_id: Uuid) {
        let should_reset = {
            let mut inner = self.inner.write().await;
            let Some(claim) = inner.claims.get(&event_id).cloned() else {
                return;
            };
            // Lease-expiry is the only path that resets a non-terminal
            // claimed event to OPEN; renewal always wins if it landed first.
            if !claim.is_expired(Utc::now()) {
                return;
            }
            let Some(event) = inner.events.get(&event_id).cloned() else {
                return;
            };
            if event.status.is_terminal() {
                inner.claims.remove(&event_id);
                inner.lease_timers.remove(&event_id);
                return false;
            }
            inner.claims.remove(&event_id);
            inner.lease_timers.remove(&event_id);
            let mut e = event;
            e.status = EventStatus::Open;
            e.claimed_by = None;
            e.updated_at = Utc::now();
            inner.events.insert(event_id, e);
            true
        };

        if should_reset {
            let retry_event = Event::new(
                Topic::TaskRetryScheduled,
                "lease expired",
                crate::domain::models::event::Payload::with_reason("lease_expired"),
                None,
                vec![],
                RiskLevel::Low,
                None,
                None,
            )
            .with_parent(Some(event_id));
            self.publish(retry_event).await;
        }
    }

    /// Extend the lease for an active claim. Returns false if expired or
    /// owned by another agent.
    pub async fn heartbeat(&self, event_id: Uuid, agent_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(claim) = inner.claims.get_mut(&event_id) else {
            return false;
        };
        if claim.agent_id != agent_id {
            return false;
        }
        if claim.is_expired(Utc::now()) {
            return false;
        }
        let lease_ms = (claim.lease_expiry - claim.last_heartbeat).num_milliseconds().max(1000);
        claim.renew(lease_ms);
        let expiry_ms = lease_ms;
        self.arm_lease_timer(&mut inner, event_id, expiry_ms);
        true
    }

    /// Cancel a claim and reset a non-terminal event to OPEN.
    pub async fn release(&self, event_id: Uuid, agent_id: &str) -> Result<(), ClaimError> {
        let mut inner = self.inner.write().await;
        match inner.claims.get(&event_id) {
            Some(c) if c.agent_id == agent_id => {}
            Some(_) => return Err(ClaimError::NotFound),
            None => return Err(ClaimError::NotFound),
        }
        inner.claims.remove(&event_id);
        if let Some(timer) = inner.lease_timers.remove(&event_id) {
            timer.abort();
        }
        if let Some(mut e) = inner.events.get(&event_id).cloned() {
            if !e.status.is_terminal() {
                e.status = EventStatus::Open;
                e.claimed_by = None;
                e.updated_at = Utc::now();
                inner.events.insert(event_id, e);
            }
        }
        Ok(())
    }

    pub async fn dead_letter(&self, event: Event, reason: impl Into<String>) {
        let mut inner = self.inner.write().await;
        inner.dlq.push_back(DeadLetterEntry::new(event, reason));
        while inner.dlq.len() > self.dlq_capacity {
            inner.dlq.pop_front();
        }
    }

    pub async fn get_dlq(&self, limit: usize) -> Vec<DeadLetterEntry> {
        self.inner.read().await.dlq.iter().rev().take(limit).cloned().collect()
    }

    /// Republish a DLQ entry as OPEN.
    pub async fn retry_from_dlq(&self, event_id: Uuid) -> Option<Event> {
        let entry = {
            let mut inner = self.inner.write().await;
            let pos = inner.dlq.iter().position(|d| d.event.event_id == event_id)?;
            inner.dlq.remove(pos)
        }?;
        let mut e = entry.event;
        e.status = EventStatus::Open;
        e.claimed_by = None;
        e.updated_at = Utc::now();
        Some(self.publish(e).await)
    }

    /// Lazily-ordered replay of events created within `[from_ts, to_ts]`.
    pub async fn replay(&self, from_ts: DateTime<Utc>, to_ts: Option<DateTime<Utc>>) -> Vec<Event> {
        let to_ts = to_ts.unwrap_or_else(Utc::now);
        let mut events: Vec<Event> = self
            .inner
            .read()
            .await
            .events
            .values()
            .filter(|e| e.created_at >= from_ts && e.created_at <= to_ts)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        events
    }

    pub async fn metrics_snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read().await;
        let window_start = Utc::now() - chrono::Duration::minutes(1);
        let recent: Vec<&ClaimWindowSample> =
            inner.claim_samples.iter().filter(|s| s.at >= window_start).collect();
        let total = recent.len();
        let failed = recent.iter().filter(|s| !s.succeeded).count();
        let conflict_rate = if total == 0 { 0.0 } else { failed as f64 / total as f64 };

        let mut total_tokens = 0u64;
        let mut total_cash = 0.0f64;
        for e in inner.events.values() {
            if let Some(cd) = e.cost_delta {
                total_tokens += cd.tokens_used;
                total_cash += cd.cash_used;
            }
        }

        MetricsSnapshot {
            queue_depth: inner.events.values().filter(|e| !e.status.is_terminal()).count(),
            dlq_depth: inner.dlq.len(),
            claim_conflict_rate: conflict_rate,
            retry_storm: conflict_rate > 0.5 && total > 10,
            throughput_1h: inner.publish_log.len() as u64,
            total_tokens_used: total_tokens,
            total_cash_used: total_cash,
        }
    }

    /// Cancel every outstanding lease timer. Called on shutdown.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.write().await;
        for (_, handle) in inner.lease_timers.drain() {
            handle.abort();
        }
    }

    /// Directly record a terminal/status mutation for an event already
    /// known to the bus, without going through claim/release. Used by
    /// pipeline stages (Decomposer's synchronous RESOLVING transition,
    /// Executor's terminal emission) that must mutate before publishing a
    /// follow-on event.
    pub async fn set_status(&self, event_id: Uuid, status: EventStatus) -> Result<(), EventBusError> {
        let mut inner = self.inner.write().await;
        let Some(mut e) = inner.events.get(&event_id).cloned() else {
            return Err(EventBusError::NotFound(event_id));
        };
        e.status = status;
        e.updated_at = Utc::now();
        inner.events.insert(event_id, e);
        Ok(())
    }

    /// Atomically transition `event_id` to `status` unless it is already
    /// terminal. Returns whether this call performed the transition, so a
    /// caller racing against concurrent siblings (e.g. closing a shared
    /// parent) can tell whether it won and should publish the follow-on
    /// event, instead of every racer doing so.
    pub async fn transition_if_not_terminal(
        &self,
        event_id: Uuid,
        status: EventStatus,
    ) -> Result<bool, EventBusError> {
        let mut inner = self.inner.write().await;
        let Some(mut e) = inner.events.get(&event_id).cloned() else {
            return Err(EventBusError::NotFound(event_id));
        };
        if e.status.is_terminal() {
            return Ok(false);
        }
        e.status = status;
        e.updated_at = Utc::now();
        inner.events.insert(event_id, e);
        Ok(true)
    }

    pub async fn set_cost_delta(&self, event_id: Uuid, cost_delta: crate::domain::models::event::CostDelta) {
        let mut inner = self.inner.write().await;
        if let Some(mut e) = inner.events.get(&event_id).cloned() {
            e.cost_delta = Some(cost_delta);
            e.updated_at = Utc::now();
            inner.events.insert(event_id, e);
        }
    }
}

trait EventExt {
    fn with_parent(self, parent: Option<Uuid>) -> Self;
}

impl EventExt for Event {
    fn with_parent(mut self, parent: Option<Uuid>) -> Self {
        self.parent_event_id = parent;
        self
    }
}
