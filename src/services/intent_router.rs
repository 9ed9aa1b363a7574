//! Intent Router: parses a free-form intent and emits `TASK_POSTED`.

use std::collections::BTreeSet;

use regex::Regex;

use crate::domain::models::event::{Budget, Event, Payload, RiskLevel, Topic};
use crate::services::event_bus::EventBus;

/// A single (regex → tags) rule. Multiple rules may fire on the same
/// intent; their tag sets are unioned.
struct TagRule {
    pattern: Regex,
    tags: &'static [&'static str],
}

fn rules() -> Vec<TagRule> {
    // Keyword table, deliberately broad and multilingual.
    let specs: &[(&str, &[&str])] = &[
        (r"(?i)\b(data|dataset|leads?|csv|spreadsheet|datos)\b", &["data"]),
        (r"(?i)\b(report|reporting|summary|informe|rapport)\b", &["report"]),
        (r"(?i)\b(bug|defect|crash|fehler|bogue)\b", &["bug"]),
        (r"(?i)\b(code|implement|refactor|código|code)\b", &["code"]),
        (r"(?i)\b(review|audit|revisar|révision)\b", &["review"]),
        (r"(?i)\b(test|tests|qa|prueba)\b", &["test"]),
        (r"(?i)\b(deploy|release|ship|despliegue)\b", &["deploy"]),
        (r"(?i)\b(research|investigate|investiga)\b", &["research"]),
    ];
    specs
        .iter()
        .map(|(pat, tags)| TagRule {
            pattern: Regex::new(pat).expect("static tag rule regex is valid"),
            tags,
        })
        .collect()
}

/// Derive the tag set for an intent by running the fixed rule table.
pub fn derive_tags(intent: &str) -> Vec<String> {
    let mut tags = BTreeSet::new();
    for rule in rules() {
        if rule.pattern.is_match(intent) {
            tags.extend(rule.tags.iter().map(|t| t.to_string()));
        }
    }
    tags.into_iter().collect()
}

/// Idempotency key: hash(intent ++ floor(now / 5 min)), so the same intent
/// repeated within five minutes is absorbed by the bus.
pub fn idempotency_key(intent: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    use std::hash::{Hash, Hasher};
    let bucket = now.timestamp() / 300;
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    intent.hash(&mut hasher);
    bucket.hash(&mut hasher);
    format!("intent:{:x}", hasher.finish())
}

pub struct IntentRouter {
    bus: EventBus,
}

impl IntentRouter {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Route a user intent into the pipeline, publishing `TASK_POSTED`.
    pub async fn route(
        &self,
        intent: impl Into<String>,
        risk_level: RiskLevel,
        budget: Option<Budget>,
        extra_tags: Vec<String>,
    ) -> Event {
        let intent = intent.into();
        let now = chrono::Utc::now();
        let mut tags = derive_tags(&intent);
        for t in extra_tags {
            if !tags.contains(&t) {
                tags.push(t);
            }
        }

        let event = Event::new(
            Topic::TaskPosted,
            intent.clone(),
            Payload::default(),
            None,
            tags,
            risk_level,
            budget,
            Some(idempotency_key(&intent, now)),
        );
        self.bus.publish(event).await
    }
}
