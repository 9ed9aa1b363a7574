//! Agent Comms: bounded inter-agent messaging. Each session keeps at most
//! `max_messages_per_session` messages (oldest evicted first); the whole
//! registry keeps at most `max_sessions` sessions (oldest-touched evicted
//! first) so a runaway chat can't grow memory without bound. Every message
//! is also routed onto the event bus as `INTEL_READY` so the rest of the
//! swarm can observe inter-agent chatter.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::models::event::{Event, Payload, RiskLevel, Topic};
use crate::services::event_bus::EventBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollabMessageType {
    Direct,
    Broadcast,
}

/// Typed payload carried by inter-agent messages, mirrored onto the bus as
/// an `INTEL_READY` event's payload `extra` bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollabMessage {
    #[serde(rename = "type")]
    pub msg_type: CollabMessageType,
    pub zone_id: String,
    pub from: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Legacy message shape kept for session history inspection; a
/// `CollabMessage` carries the same facts in the wire-routed form.
#[derive(Debug, Clone)]
pub struct AgentMessage {
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub content: Value,
    pub sent_at: DateTime<Utc>,
}

struct Session {
    messages: VecDeque<AgentMessage>,
    last_touched: DateTime<Utc>,
}

pub struct AgentComms {
    bus: EventBus,
    sessions: RwLock<HashMap<String, Session>>,
    max_messages_per_session: usize,
    max_sessions: usize,
}

impl AgentComms {
    pub fn new(bus: EventBus, max_messages_per_session: usize, max_sessions: usize) -> Self {
        Self {
            bus,
            sessions: RwLock::new(HashMap::new()),
            max_messages_per_session,
            max_sessions,
        }
    }

    async fn post(&self, session_id: impl Into<String>, message: AgentMessage) {
        let session_id = session_id.into();
        let mut sessions = self.sessions.write().await;

        if !sessions.contains_key(&session_id) && sessions.len() >= self.max_sessions {
            if let Some(oldest) = sessions.iter().min_by_key(|(_, s)| s.last_touched).map(|(id, _)| id.clone()) {
                sessions.remove(&oldest);
            }
        }

        let session = sessions.entry(session_id).or_insert_with(|| Session {
            messages: VecDeque::new(),
            last_touched: Utc::now(),
        });
        session.messages.push_back(message);
        session.last_touched = Utc::now();
        while session.messages.len() > self.max_messages_per_session {
            session.messages.pop_front();
        }
    }

    pub async fn history(&self, session_id: &str) -> Vec<AgentMessage> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Send a direct message to a single agent. Session history is kept
    /// under the recipient's id; the message is also published as
    /// `INTEL_READY` for any subscriber watching that agent's inbox.
    pub async fn send_message(&self, from: impl Into<String>, to: impl Into<String>, zone_id: impl Into<String>, payload: Value) -> CollabMessage {
        let from = from.into();
        let to = to.into();
        let collab = CollabMessage {
            msg_type: CollabMessageType::Direct,
            zone_id: zone_id.into(),
            from: from.clone(),
            payload,
            timestamp: Utc::now(),
        };

        self.post(
            to.clone(),
            AgentMessage { from_agent_id: from.clone(), to_agent_id: to.clone(), content: collab.payload.clone(), sent_at: collab.timestamp },
        )
        .await;

        self.publish_intel(&collab, Some(to)).await;
        collab
    }

    /// Broadcast a message to every agent subscribed to a zone. Session
    /// history is kept under the zone id itself.
    pub async fn broadcast(&self, from: impl Into<String>, zone_id: impl Into<String>, payload: Value) -> CollabMessage {
        let from = from.into();
        let zone_id = zone_id.into();
        let collab = CollabMessage { msg_type: CollabMessageType::Broadcast, zone_id: zone_id.clone(), from: from.clone(), payload, timestamp: Utc::now() };

        self.post(
            zone_id.clone(),
            AgentMessage { from_agent_id: from.clone(), to_agent_id: zone_id.clone(), content: collab.payload.clone(), sent_at: collab.timestamp },
        )
        .await;

        self.publish_intel(&collab, None).await;
        collab
    }

    async fn publish_intel(&self, collab: &CollabMessage, to: Option<String>) {
        let mut payload = Payload::default()
            .with_extra("type", serde_json::json!(collab.msg_type))
            .with_extra("zone_id", serde_json::json!(collab.zone_id))
            .with_extra("from", serde_json::json!(collab.from))
            .with_extra("message_payload", collab.payload.clone());
        if let Some(to) = to {
            payload = payload.with_extra("to", serde_json::json!(to));
        }

        let event = Event::new(Topic::IntelReady, format!("collab message from {}", collab.from), payload, None, vec![], RiskLevel::Low, None, None);
        self.bus.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::event_bus::EventFilter;

    #[tokio::test]
    async fn direct_message_is_recorded_and_routed_as_intel() {
        let bus = EventBus::new(300, 1000);
        let comms = AgentComms::new(bus.clone(), 100, 50);
        comms.send_message("scout-1", "scout-2", "zone-a", serde_json::json!({"note": "enemy sighted"})).await;

        let history = comms.history("scout-2").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_agent_id, "scout-1");

        let intel = bus.query(EventFilter { topic: Some(Topic::IntelReady), ..Default::default() }).await;
        assert_eq!(intel.len(), 1);
        assert_eq!(intel[0].payload.extra.get("from").and_then(|v| v.as_str()), Some("scout-1"));
    }

    #[tokio::test]
    async fn broadcast_is_recorded_under_the_zone_session() {
        let bus = EventBus::new(300, 1000);
        let comms = AgentComms::new(bus.clone(), 100, 50);
        comms.broadcast("commander", "zone-a", serde_json::json!({"order": "fall back"})).await;

        let history = comms.history("zone-a").await;
        assert_eq!(history.len(), 1);

        let intel = bus.query(EventFilter { topic: Some(Topic::IntelReady), ..Default::default() }).await;
        assert_eq!(intel[0].payload.extra.get("type").and_then(|v| v.as_str()), Some("broadcast"));
    }

    #[tokio::test]
    async fn messages_beyond_capacity_evict_oldest() {
        let bus = EventBus::new(300, 1000);
        let comms = AgentComms::new(bus, 2, 10);
        comms.send_message("a", "b", "zone-a", serde_json::json!("one")).await;
        comms.send_message("a", "b", "zone-a", serde_json::json!("two")).await;
        comms.send_message("a", "b", "zone-a", serde_json::json!("three")).await;

        let history = comms.history("b").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, serde_json::json!("two"));
        assert_eq!(history[1].content, serde_json::json!("three"));
    }

    #[tokio::test]
    async fn sessions_beyond_capacity_evict_oldest_touched() {
        let bus = EventBus::new(300, 1000);
        let comms = AgentComms::new(bus, 10, 2);
        comms.send_message("a", "s1", "zone-a", serde_json::json!("hi")).await;
        comms.send_message("a", "s2", "zone-a", serde_json::json!("hi")).await;
        comms.send_message("a", "s3", "zone-a", serde_json::json!("hi")).await;

        assert_eq!(comms.session_count().await, 2);
        assert!(comms.history("s1").await.is_empty());
    }
}
