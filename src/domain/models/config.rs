//! Configuration model for the SwarmEngine core.
//!
//! Every tunable constant the core depends on, collected so operators can
//! override any of it without a rebuild. Loaded through a layered `figment`
//! stack by `infrastructure::config::ConfigLoader`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub event_bus: EventBusConfig,
    pub recovery: RecoveryConfig,
    pub approvals: ApprovalConfig,
    pub summoner: SummonerConfig,
    pub budget: BudgetConfig,
    pub agent_comms: AgentCommsConfig,
    pub autonomy: AutonomyConfig,
    pub logging: LoggingConfig,
    pub execution_mode: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_bus: EventBusConfig::default(),
            recovery: RecoveryConfig::default(),
            approvals: ApprovalConfig::default(),
            summoner: SummonerConfig::default(),
            budget: BudgetConfig::default(),
            agent_comms: AgentCommsConfig::default(),
            autonomy: AutonomyConfig::default(),
            logging: LoggingConfig::default(),
            execution_mode: "mock".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub default_lease_ms: i64,
    pub high_risk_lease_ms: i64,
    pub idempotency_ttl_secs: i64,
    pub dlq_capacity: usize,
    pub processed_set_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: 30_000,
            high_risk_lease_ms: 120_000,
            idempotency_ttl_secs: 300,
            dlq_capacity: 1000,
            processed_set_capacity: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            jitter_fraction: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    pub congestion_alarm_threshold: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            congestion_alarm_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummonerConfig {
    pub hp_budget_floor: f64,
    pub mp_budget_floor: f64,
}

impl Default for SummonerConfig {
    fn default() -> Self {
        Self {
            hp_budget_floor: 0.1,
            mp_budget_floor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub hp_max: f64,
    pub mp_max: f64,
    pub ap_max: f64,
    pub cash_to_hp_scale: f64,
    pub ap_gain_on_close: f64,
    pub ap_loss_on_fail: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            hp_max: 10_000.0,
            mp_max: 1_000_000.0,
            ap_max: 100.0,
            cash_to_hp_scale: 100.0,
            ap_gain_on_close: 2.0,
            ap_loss_on_fail: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentCommsConfig {
    pub max_messages_per_session: usize,
    pub max_sessions: usize,
}

impl Default for AgentCommsConfig {
    fn default() -> Self {
        Self {
            max_messages_per_session: 100,
            max_sessions: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    pub cron_tick_ms: u64,
    pub watch_reactor_default_cooldown_ms: u64,
    pub watch_reactor_default_max_concurrent: usize,
}

impl Default for AutonomyConfig {
    fn default() -> Self {
        Self {
            cron_tick_ms: 60_000,
            watch_reactor_default_cooldown_ms: 60_000,
            watch_reactor_default_max_concurrent: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}
