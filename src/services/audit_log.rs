//! Audit Log: an append-only record of every event published on the bus,
//! subscribed to every topic, with query helpers for failure triage and
//! approval reporting.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::error::FailureCategory;
use crate::domain::models::event::{Event, Topic};
use crate::services::event_bus::Subscriber;

/// `getApprovalStats()` result: outstanding request count plus latency
/// percentiles over request/decision pairs that have both sides observed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ApprovalStats {
    pub pending: usize,
    pub p50_ms: i64,
    pub p95_ms: i64,
}

/// Every topic in the closed set, used to subscribe the audit log to all
/// of them in one call.
pub const ALL_TOPICS: &[Topic] = &[
    Topic::TaskPosted,
    Topic::TaskAnalyzed,
    Topic::TaskDecomposed,
    Topic::TaskClaimed,
    Topic::TaskProgress,
    Topic::TaskRetryScheduled,
    Topic::ArtifactReady,
    Topic::EvidenceReady,
    Topic::IntelReady,
    Topic::TaskClosed,
    Topic::TaskFailed,
    Topic::SosError,
    Topic::ApprovalRequired,
    Topic::ApprovalDecision,
    Topic::AgentSummonRequest,
    Topic::AgentSummonResolved,
    Topic::AgentStatusReport,
    Topic::AssetUpdated,
    Topic::SkillQuarantined,
    Topic::CompactionTick,
    Topic::HudSync,
];

pub struct AuditLog {
    entries: RwLock<VecDeque<Event>>,
    max_entries: usize,
}

impl AuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self { entries: RwLock::new(VecDeque::new()), max_entries }
    }

    pub async fn get_log(&self, limit: usize) -> Vec<Event> {
        self.entries.read().await.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_by_category(&self, topic: Topic) -> Vec<Event> {
        self.entries.read().await.iter().filter(|e| e.topic == topic).cloned().collect()
    }

    pub async fn get_by_failure_category(&self, category: FailureCategory) -> Vec<Event> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| matches!(e.topic, Topic::TaskFailed | Topic::SosError))
            .filter(|e| {
                let reason = e.payload.reason.as_deref().unwrap_or_default();
                FailureCategory::classify(reason, e.payload.error.as_deref()) == category
            })
            .cloned()
            .collect()
    }

    /// Count `ApprovalDecision` events grouped by their `decision` field.
    pub async fn get_approval_decision_tally(&self) -> HashMap<String, u64> {
        let mut stats = HashMap::new();
        for entry in self.entries.read().await.iter() {
            if entry.topic != Topic::ApprovalDecision {
                continue;
            }
            let decision = entry.payload.decision.clone().unwrap_or_else(|| "unknown".to_string());
            *stats.entry(decision).or_insert(0u64) += 1;
        }
        stats
    }

    /// `{pending, p50_ms, p95_ms}` computed by pairing each `APPROVAL_REQUIRED`
    /// with the first `APPROVAL_DECISION` sharing its target event id.
    pub async fn get_approval_stats(&self) -> ApprovalStats {
        let entries = self.entries.read().await;
        let mut requested: HashMap<Uuid, chrono::DateTime<chrono::Utc>> = HashMap::new();
        let mut latencies_ms: Vec<i64> = Vec::new();
        let mut decided: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

        for entry in entries.iter() {
            match entry.topic {
                Topic::ApprovalRequired => {
                    if let Some(target) = entry.parent_event_id {
                        requested.entry(target).or_insert(entry.created_at);
                    }
                }
                Topic::ApprovalDecision => {
                    if let Some(target) = entry.parent_event_id {
                        if let Some(requested_at) = requested.get(&target) {
                            latencies_ms.push((entry.created_at - *requested_at).num_milliseconds());
                        }
                        decided.insert(target);
                    }
                }
                _ => {}
            }
        }

        let pending = requested.keys().filter(|id| !decided.contains(*id)).count();
        latencies_ms.sort_unstable();
        ApprovalStats { pending, p50_ms: percentile(&latencies_ms, 0.50), p95_ms: percentile(&latencies_ms, 0.95) }
    }

    /// Chronologically ordered BFS traversal of the event subtree rooted at
    /// `task_id`, following `parent_event_id` links.
    pub async fn replay(&self, task_id: Uuid) -> Vec<Event> {
        let entries = self.entries.read().await;
        let mut by_parent: HashMap<Option<Uuid>, Vec<Event>> = HashMap::new();
        for entry in entries.iter() {
            by_parent.entry(entry.parent_event_id).or_default().push(entry.clone());
        }
        for bucket in by_parent.values_mut() {
            bucket.sort_by_key(|e| e.created_at);
        }

        let mut ordered = Vec::new();
        let mut queue: VecDeque<Uuid> = VecDeque::from([task_id]);
        let mut visited = std::collections::HashSet::new();
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if let Some(own) = entries.iter().find(|e| e.event_id == id) {
                ordered.push(own.clone());
            }
            if let Some(children) = by_parent.get(&Some(id)) {
                for child in children {
                    queue.push_back(child.event_id);
                }
            }
        }
        ordered
    }
}

fn percentile(sorted_ms: &[i64], p: f64) -> i64 {
    if sorted_ms.is_empty() {
        return 0;
    }
    let rank = ((sorted_ms.len() as f64 - 1.0) * p).round() as usize;
    sorted_ms[rank.min(sorted_ms.len() - 1)]
}

#[async_trait]
impl Subscriber for AuditLog {
    async fn handle(&self, event: Event) -> Result<(), String> {
        let mut entries = self.entries.write().await;
        entries.push_back(event);
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::{Payload, RiskLevel};

    #[tokio::test]
    async fn appends_and_caps_at_max_entries() {
        let log = AuditLog::new(2);
        for i in 0..5 {
            let e = Event::new(Topic::TaskPosted, format!("task {i}"), Payload::default(), None, vec![], RiskLevel::Low, None, None);
            log.handle(e).await.unwrap();
        }
        let all = log.get_log(10).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn filters_by_failure_category() {
        let log = AuditLog::new(100);
        let transient = Event::new(Topic::TaskFailed, "x", Payload::with_reason("network timeout"), None, vec![], RiskLevel::Low, None, None);
        let policy = Event::new(Topic::TaskFailed, "y", Payload::with_reason("permission denied"), None, vec![], RiskLevel::Low, None, None);
        log.handle(transient).await.unwrap();
        log.handle(policy).await.unwrap();

        let transients = log.get_by_failure_category(FailureCategory::Transient).await;
        assert_eq!(transients.len(), 1);
    }

    #[tokio::test]
    async fn tallies_approval_decisions() {
        let log = AuditLog::new(100);
        let approved = Event::new(
            Topic::ApprovalDecision,
            "x",
            Payload { decision: Some("approved".to_string()), ..Payload::default() },
            None,
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        log.handle(approved).await.unwrap();
        let stats = log.get_approval_decision_tally().await;
        assert_eq!(stats.get("approved"), Some(&1));
    }

    #[tokio::test]
    async fn approval_stats_pairs_requests_with_decisions() {
        let log = AuditLog::new(100);
        let target = uuid::Uuid::new_v4();
        let required = Event::new(Topic::ApprovalRequired, "req", Payload::default(), Some(target), vec![], RiskLevel::Low, None, None);
        log.handle(required).await.unwrap();

        let still_pending = log.get_approval_stats().await;
        assert_eq!(still_pending.pending, 1);

        let decision = Event::new(
            Topic::ApprovalDecision,
            "dec",
            Payload { decision: Some("approved".to_string()), ..Payload::default() },
            Some(target),
            vec![],
            RiskLevel::Low,
            None,
            None,
        );
        log.handle(decision).await.unwrap();

        let resolved = log.get_approval_stats().await;
        assert_eq!(resolved.pending, 0);
        assert!(resolved.p50_ms >= 0);
    }

    #[tokio::test]
    async fn replay_traverses_the_subtree_in_causal_order() {
        let log = AuditLog::new(100);
        let root = Event::new(Topic::TaskPosted, "root", Payload::default(), None, vec![], RiskLevel::Low, None, None);
        let root_id = root.event_id;
        log.handle(root.clone()).await.unwrap();

        let child = Event::new(Topic::TaskDecomposed, "child", Payload::default(), Some(root_id), vec![], RiskLevel::Low, None, None);
        log.handle(child.clone()).await.unwrap();

        let grandchild = Event::new(Topic::TaskClosed, "grandchild", Payload::default(), Some(child.event_id), vec![], RiskLevel::Low, None, None);
        log.handle(grandchild.clone()).await.unwrap();

        let trace = log.replay(root_id).await;
        assert_eq!(trace.iter().map(|e| e.event_id).collect::<Vec<_>>(), vec![root_id, child.event_id, grandchild.event_id]);
    }
}
