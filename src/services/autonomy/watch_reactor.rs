//! Watch Reactor: reacts to topic traffic rather than polling anything
//! external. A watched pattern matches a topic plus a conjunctive payload
//! filter, is rate-limited by a per-pattern cooldown and max-concurrent
//! cap, and fires a templated `TASK_POSTED` when it matches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::event::{Event, Payload, RiskLevel, Topic};
use crate::services::event_bus::{EventBus, Subscriber};

/// A single watch rule: the topic it reacts to, the payload fields it
/// requires, and the task it spawns when those requirements are met.
#[derive(Debug, Clone)]
pub struct WatchPattern {
    pub name: String,
    pub source_topic: Topic,
    /// Conjunctive filter: every key must be present in the triggering
    /// event's template field map with exactly this value.
    pub payload_filter: HashMap<String, Value>,
    pub intent_template: String,
    pub required_tags: Vec<String>,
    pub cooldown: Duration,
    pub max_concurrent: usize,
}

impl WatchPattern {
    pub fn new(name: impl Into<String>, source_topic: Topic, intent_template: impl Into<String>, required_tags: Vec<String>, cooldown: Duration, max_concurrent: usize) -> Self {
        Self {
            name: name.into(),
            source_topic,
            payload_filter: HashMap::new(),
            intent_template: intent_template.into(),
            required_tags,
            cooldown,
            max_concurrent,
        }
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload_filter.insert(key.into(), value);
        self
    }
}

/// Per-pattern bookkeeping: last fire time for cooldown, current
/// in-flight count for the concurrency cap.
#[derive(Default)]
struct PatternState {
    last_fired: Option<Instant>,
    active: usize,
}

fn template_var() -> Regex {
    Regex::new(r"\{\{(\w+)\}\}").expect("static template regex is valid")
}

/// Flatten an event's fields into a string lookup table for `{{field}}`
/// template expansion.
fn template_fields(event: &Event) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("event_id".to_string(), event.event_id.to_string());
    fields.insert("topic".to_string(), event.topic.to_string());
    fields.insert("intent".to_string(), event.intent.clone());
    if let Some(parent) = event.parent_event_id {
        fields.insert("parent_event_id".to_string(), parent.to_string());
    }
    if let Some(ref reason) = event.payload.reason {
        fields.insert("reason".to_string(), reason.clone());
    }
    if let Some(ref error) = event.payload.error {
        fields.insert("error".to_string(), error.clone());
    }
    if let Some(ref decision) = event.payload.decision {
        fields.insert("decision".to_string(), decision.clone());
    }
    for (k, v) in &event.payload.extra {
        fields.insert(k.clone(), value_to_string(v));
    }
    fields
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn expand_template(template: &str, fields: &HashMap<String, String>) -> String {
    template_var()
        .replace_all(template, |caps: &regex::Captures| fields.get(&caps[1]).cloned().unwrap_or_default())
        .into_owned()
}

fn filter_matches(filter: &HashMap<String, Value>, fields: &HashMap<String, String>) -> bool {
    filter.iter().all(|(k, v)| fields.get(k).map(|actual| actual == &value_to_string(v)).unwrap_or(false))
}

pub struct WatchReactor {
    bus: EventBus,
    patterns: RwLock<Vec<WatchPattern>>,
    state: RwLock<HashMap<String, PatternState>>,
    /// Maps a spawned task's event id back to the pattern name that spawned
    /// it, so its terminal event can decrement that pattern's active count.
    spawned: RwLock<HashMap<Uuid, String>>,
}

impl WatchReactor {
    pub fn new(bus: EventBus) -> Arc<Self> {
        Arc::new(Self { bus, patterns: RwLock::new(Vec::new()), state: RwLock::new(HashMap::new()), spawned: RwLock::new(HashMap::new()) })
    }

    pub async fn register(&self, pattern: WatchPattern) {
        self.state.write().await.entry(pattern.name.clone()).or_default();
        self.patterns.write().await.push(pattern);
    }

    pub async fn unregister(&self, name: &str) {
        self.patterns.write().await.retain(|p| p.name != name);
        self.state.write().await.remove(name);
    }

    /// Every topic a registered pattern reacts to, plus the terminal
    /// topics needed to retire its active-count bookkeeping.
    pub async fn subscribed_topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.patterns.read().await.iter().map(|p| p.source_topic).collect();
        topics.push(Topic::TaskClosed);
        topics.push(Topic::TaskFailed);
        topics.sort_by_key(|t| t.as_str());
        topics.dedup();
        topics
    }

    async fn try_fire(&self, pattern_name: &str, event: &Event) -> bool {
        let pattern = {
            let patterns = self.patterns.read().await;
            match patterns.iter().find(|p| p.name == pattern_name) {
                Some(p) => p.clone(),
                None => return false,
            }
        };

        let now = Instant::now();
        {
            let mut state = self.state.write().await;
            let entry = state.entry(pattern.name.clone()).or_default();
            if entry.active >= pattern.max_concurrent {
                debug!(pattern = %pattern.name, "watch reactor skipped: max concurrent reached");
                return false;
            }
            if let Some(last) = entry.last_fired {
                if now.duration_since(last) < pattern.cooldown {
                    debug!(pattern = %pattern.name, "watch reactor skipped: cooldown active");
                    return false;
                }
            }
            entry.last_fired = Some(now);
            entry.active += 1;
        }

        let fields = template_fields(event);
        let intent = expand_template(&pattern.intent_template, &fields);
        let spawned = Event::new(Topic::TaskPosted, intent, Payload::default(), None, pattern.required_tags.clone(), RiskLevel::Low, None, None);
        let spawned = self.bus.publish(spawned).await;
        self.spawned.write().await.insert(spawned.event_id, pattern.name.clone());
        true
    }

    async fn retire(&self, task_event_id: Uuid) {
        let Some(pattern_name) = self.spawned.write().await.remove(&task_event_id) else {
            return;
        };
        let mut state = self.state.write().await;
        if let Some(entry) = state.get_mut(&pattern_name) {
            entry.active = entry.active.saturating_sub(1);
        }
    }
}

#[async_trait]
impl Subscriber for WatchReactor {
    async fn handle(&self, event: Event) -> Result<(), String> {
        if matches!(event.topic, Topic::TaskClosed | Topic::TaskFailed) {
            if let Some(task_id) = event.parent_event_id {
                self.retire(task_id).await;
            }
            if self.spawned.read().await.contains_key(&event.event_id) {
                self.retire(event.event_id).await;
            }
        }

        let matching: Vec<String> = {
            let patterns = self.patterns.read().await;
            let fields = template_fields(&event);
            patterns
                .iter()
                .filter(|p| p.source_topic == event.topic && filter_matches(&p.payload_filter, &fields))
                .map(|p| p.name.clone())
                .collect()
        };

        for name in matching {
            if !self.try_fire(&name, &event).await {
                warn!(pattern = %name, event_id = %event.event_id, "watch pattern matched but was rate-limited");
            }
        }

        Ok(())
    }
}
