//! `swarmctl` entry point: wires the Event Bus and every pipeline stage,
//! then dispatches to whichever subcommand the operator asked for.
//!
//! Command dispatch lives here rather than in `cli::` because every
//! command needs the same fully-wired engine; there is no service layer
//! to hide it behind.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use uuid::Uuid;

use swarmengine::cli::output::{output, CommandOutput};
use swarmengine::cli::{ApprovalsCommands, Cli, Commands, EventsCommands, ModeCommands, SkillsCommands};
use swarmengine::domain::models::agent::{Agent, AutonomyLevel};
use swarmengine::domain::models::approval::ApprovalRecord;
use swarmengine::domain::models::event::{Budget, Event, RiskLevel, Topic};
use swarmengine::domain::models::skill::SkillManifest;
use swarmengine::infrastructure::config::ConfigLoader;
use swarmengine::infrastructure::logging::LoggerHandle;
use swarmengine::services::autonomy::watch_reactor::WatchPattern;
use swarmengine::services::autonomy::{AgentComms, CronScheduler, WatchReactor};
use swarmengine::services::event_bus::EventFilter;
use swarmengine::services::execution_mode::{ExecutionMode, ExecutionModeHandle};
use swarmengine::services::{
    ApprovalEngine, AuditLog, BudgetTracker, CompactionSvc, Decomposer, EmpHandler, EventBus, Executor, IntentRouter, Matcher, Recovery,
    SecurityGate, Summoner, TaskAnalyzer,
};

/// The "tag rule" vocabulary the Intent Router can produce (see
/// `services::intent_router::rules`). Demo agents are recruited with the
/// full set so the Matcher always has someone to claim posted work.
const DEMO_TAGS: &[&str] = &["data", "report", "bug", "code", "review", "test", "deploy", "research"];

/// Every service the pipeline needs, wired onto one bus. Built once per
/// invocation; `Intent` and `Serve` both go through this.
struct Engine {
    bus: EventBus,
    mode: ExecutionModeHandle,
    matcher: Arc<Matcher>,
    intent_router: IntentRouter,
    _task_analyzer: Arc<TaskAnalyzer>,
    _decomposer: Arc<Decomposer>,
    _executor: Arc<Executor>,
    _recovery: Arc<Recovery>,
    budget_tracker: Arc<BudgetTracker>,
    compaction: Arc<CompactionSvc>,
    _summoner: Arc<Summoner>,
    approval_engine: Arc<ApprovalEngine>,
    _emp_handler: Arc<EmpHandler>,
    audit_log: Arc<AuditLog>,
    security_gate: Arc<SecurityGate>,
    watch_reactor: Arc<WatchReactor>,
    cron_scheduler: Arc<CronScheduler>,
    _agent_comms: AgentComms,
}

impl Engine {
    async fn bootstrap(config: &swarmengine::domain::models::config::Config, mode: ExecutionMode) -> Self {
        let bus = EventBus::new(config.event_bus.idempotency_ttl_secs, config.event_bus.dlq_capacity);
        let mode = ExecutionModeHandle::new(mode);

        let matcher = Matcher::new(bus.clone(), config.event_bus.processed_set_capacity);
        let task_analyzer = TaskAnalyzer::new(bus.clone(), config.event_bus.processed_set_capacity);
        let decomposer = Decomposer::new(bus.clone(), mode.clone(), config.event_bus.processed_set_capacity);
        let executor = Executor::new(bus.clone(), mode.clone(), matcher.clone(), config.event_bus.processed_set_capacity);
        let recovery = Arc::new(Recovery::new(
            bus.clone(),
            config.recovery.max_retries,
            config.recovery.base_backoff_ms,
            config.recovery.max_backoff_ms,
            config.recovery.jitter_fraction,
        ));
        let budget_tracker = Arc::new(BudgetTracker::new(
            bus.clone(),
            config.budget.hp_max,
            config.budget.mp_max,
            config.budget.ap_max,
            config.budget.cash_to_hp_scale,
            config.budget.ap_gain_on_close,
            config.budget.ap_loss_on_fail,
        ));
        let compaction = CompactionSvc::new(bus.clone(), matcher.clone(), 500_000, Duration::from_secs(3600));
        let approval_engine = ApprovalEngine::new(bus.clone(), Duration::from_secs(60), config.approvals.congestion_alarm_threshold);
        let summoner = Summoner::new(
            bus.clone(),
            matcher.clone(),
            budget_tracker.clone(),
            approval_engine.clone(),
            mode.clone(),
            AutonomyLevel::clamp_new(1),
            config.summoner.hp_budget_floor,
            config.summoner.mp_budget_floor,
            config.event_bus.processed_set_capacity,
        );
        let emp_handler = Arc::new(EmpHandler::new(bus.clone()));
        let audit_log = Arc::new(AuditLog::new(10_000));
        let security_gate = SecurityGate::new(bus.clone());
        let watch_reactor = WatchReactor::new(bus.clone());
        let cron_scheduler = CronScheduler::new(bus.clone(), Duration::from_millis(config.autonomy.cron_tick_ms));
        let agent_comms = AgentComms::new(bus.clone(), config.agent_comms.max_messages_per_session, config.agent_comms.max_sessions);

        // A default watch pattern so the Autonomy Engine has something to
        // demonstrate out of the box: any quarantined skill gets flagged
        // back into the pipeline as a follow-up task.
        watch_reactor
            .register(WatchPattern::new(
                "skill-quarantine-followup",
                Topic::SkillQuarantined,
                "review quarantined skill {{skill_id}}",
                vec!["review".to_string()],
                Duration::from_secs(config.autonomy.watch_reactor_default_cooldown_ms / 1000),
                config.autonomy.watch_reactor_default_max_concurrent,
            ))
            .await;

        bus.subscribe(&[Topic::TaskPosted], task_analyzer.clone()).await;
        bus.subscribe(&[Topic::TaskPosted], decomposer.clone()).await;
        bus.subscribe(&[Topic::TaskPosted], matcher.clone()).await;
        bus.subscribe(&[Topic::TaskClaimed, Topic::TaskProgress, Topic::TaskAnalyzed], summoner.clone()).await;
        bus.subscribe(&[Topic::TaskClaimed], executor.clone()).await;
        bus.subscribe(&[Topic::TaskFailed, Topic::SosError, Topic::TaskRetryScheduled], recovery.clone()).await;
        bus.subscribe(&[Topic::ArtifactReady, Topic::TaskClosed, Topic::TaskFailed], budget_tracker.clone()).await;
        bus.subscribe(&[Topic::AgentSummonRequest], approval_engine.clone()).await;
        bus.subscribe(&[Topic::ApprovalDecision], emp_handler.clone()).await;
        bus.subscribe(swarmengine::services::audit_log::ALL_TOPICS, audit_log.clone()).await;
        bus.subscribe(&watch_reactor.clone().subscribed_topics().await, watch_reactor.clone()).await;

        let intent_router = IntentRouter::new(bus.clone());

        Self {
            bus,
            mode,
            matcher,
            intent_router,
            _task_analyzer: task_analyzer,
            _decomposer: decomposer,
            _executor: executor,
            _recovery: recovery,
            budget_tracker,
            compaction,
            _summoner: summoner,
            approval_engine,
            _emp_handler: emp_handler,
            audit_log,
            security_gate,
            watch_reactor,
            cron_scheduler,
            _agent_comms: agent_comms,
        }
    }

    async fn seed_demo_agents(&self, count: usize) {
        for i in 0..count {
            let agent = Agent::recruit(format!("agent-{i}"), DEMO_TAGS.iter().map(|t| t.to_string()).collect::<HashSet<_>>());
            self.matcher.register(agent).await;
        }
    }

    /// Background drivers only `Serve` runs continuously; `Intent` only
    /// needs the request/response pipeline above to settle one task.
    fn spawn_autonomy(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![self.approval_engine.clone().spawn_sla_monitor(), self.compaction.clone().spawn(), self.cron_scheduler.clone().spawn()]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _logger_guard = LoggerHandle::init(&config.logging).context("failed to initialize logging")?;
    let mode = ExecutionMode::parse(&config.execution_mode).unwrap_or(ExecutionMode::Mock);

    match cli.command {
        Commands::Intent { text, risk, tags, max_tokens, max_minutes, max_cash, demo_agents, timeout_secs } => {
            run_intent(&config, mode, cli.json, text, risk, tags, max_tokens, max_minutes, max_cash, demo_agents, timeout_secs).await?
        }
        Commands::Events(cmd) => run_events(cli.json, cmd).await?,
        Commands::Approvals(ApprovalsCommands::Decide { risk, approve, reject, by }) => run_approval_decide(cli.json, risk, approve, reject, by).await?,
        Commands::Skills(SkillsCommands::Install { manifest_path, signature_valid, allowlist }) => {
            run_skill_install(cli.json, manifest_path, signature_valid, allowlist).await?
        }
        Commands::Mode(ModeCommands::Get) => run_mode_get(cli.json, &config),
        Commands::Mode(ModeCommands::Set { mode }) => run_mode_set(cli.json, &mode)?,
        Commands::Serve { demo_agents, tick_secs } => run_serve(&config, mode, demo_agents, tick_secs).await?,
    }

    Ok(())
}

fn parse_risk(risk: &str) -> Result<RiskLevel> {
    match risk.to_lowercase().as_str() {
        "low" => Ok(RiskLevel::Low),
        "medium" => Ok(RiskLevel::Medium),
        "high" => Ok(RiskLevel::High),
        other => anyhow::bail!("invalid risk level {other:?}, expected low, medium, or high"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_intent(
    config: &swarmengine::domain::models::config::Config,
    mode: ExecutionMode,
    json: bool,
    text: String,
    risk: String,
    tags: Vec<String>,
    max_tokens: Option<u64>,
    max_minutes: Option<u64>,
    max_cash: Option<f64>,
    demo_agents: usize,
    timeout_secs: u64,
) -> Result<()> {
    let risk_level = parse_risk(&risk)?;
    let engine = Arc::new(Engine::bootstrap(config, mode).await);
    engine.seed_demo_agents(demo_agents).await;

    let budget = if max_tokens.is_some() || max_minutes.is_some() || max_cash.is_some() {
        Some(Budget {
            max_tokens: max_tokens.unwrap_or(0),
            max_minutes: max_minutes.unwrap_or(0),
            max_cash: max_cash.unwrap_or(0.0),
        })
    } else {
        None
    };

    let root = engine.intent_router.route(text, risk_level, budget, tags).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    let settled = loop {
        let current = engine.bus.get_event(root.event_id).await.unwrap_or_else(|| root.clone());
        if current.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            break current;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    let trace = engine.audit_log.replay(root.event_id).await;
    let hud = engine.budget_tracker.snapshot().await;

    let result = IntentOutput { root: settled, trace, hud };
    output(&result, json);
    Ok(())
}

async fn run_events(json: bool, cmd: EventsCommands) -> Result<()> {
    // Each Events subcommand wires up a throwaway bus with no subscribers,
    // so it demonstrates the bus's own publish/claim/idempotency path in
    // isolation from the rest of the pipeline.
    let bus = EventBus::new(300, 1000);

    match cmd {
        EventsCommands::Post { intent, risk, tags } => {
            let event = Event::new(
                Topic::TaskPosted,
                intent,
                Default::default(),
                None,
                tags,
                parse_risk(&risk)?,
                None,
                None,
            );
            let event = bus.publish(event).await;
            output(&EventOutput { event }, json);
        }
        EventsCommands::List { risk } => {
            let risk_level = parse_risk(&risk)?;
            let combos: &[&[&str]] = &[&["data"], &["report"], &["data", "report"], &["bug", "code"]];
            for combo in combos {
                let event = Event::new(
                    Topic::TaskPosted,
                    format!("demo task ({})", combo.join("+")),
                    Default::default(),
                    None,
                    combo.iter().map(|t| t.to_string()).collect(),
                    risk_level,
                    None,
                    None,
                );
                bus.publish(event).await;
            }
            let events = bus.query(EventFilter { topic: Some(Topic::TaskPosted), ..Default::default() }).await;
            output(&EventListOutput { events }, json);
        }
        EventsCommands::Get { intent, risk } => {
            let event = Event::new(Topic::TaskPosted, intent, Default::default(), None, vec![], parse_risk(&risk)?, None, None);
            let posted = bus.publish(event).await;
            let fetched = bus.get_event(posted.event_id).await.context("event vanished immediately after publish")?;
            output(&EventOutput { event: fetched }, json);
        }
        EventsCommands::Claim { intent, agent_id, risk, lease_ms } => {
            let event = Event::new(Topic::TaskPosted, intent, Default::default(), None, vec![], parse_risk(&risk)?, None, None);
            let posted = bus.publish(event).await;
            let outcome = bus.claim(posted.event_id, &agent_id, lease_ms).await;
            output(&ClaimOutput { event_id: posted.event_id, ok: outcome.ok, lease_expiry: outcome.lease_expiry.map(|t| t.to_rfc3339()), reason: outcome.reason }, json);
        }
        EventsCommands::Heartbeat { intent, agent_id, risk } => {
            let event = Event::new(Topic::TaskPosted, intent, Default::default(), None, vec![], parse_risk(&risk)?, None, None);
            let posted = bus.publish(event).await;
            bus.claim(posted.event_id, &agent_id, None).await;
            let renewed = bus.heartbeat(posted.event_id, &agent_id).await;
            output(&HeartbeatOutput { event_id: posted.event_id, renewed }, json);
        }
        EventsCommands::Complete { intent, agent_id, risk } => {
            let event = Event::new(Topic::TaskPosted, intent, Default::default(), None, vec![], parse_risk(&risk)?, None, None);
            let posted = bus.publish(event).await;
            bus.claim(posted.event_id, &agent_id, None).await;
            bus.release(posted.event_id, &agent_id).await.ok();
            let after = bus.get_event(posted.event_id).await.context("event vanished")?;
            output(&EventOutput { event: after }, json);
        }
    }
    Ok(())
}

async fn run_approval_decide(json: bool, risk: String, approve: bool, reject: bool, by: String) -> Result<()> {
    if approve == reject {
        anyhow::bail!("exactly one of --approve or --reject must be given");
    }
    let bus = EventBus::new(300, 1000);
    let engine = ApprovalEngine::new(bus, Duration::from_secs(3600), 10);
    let risk_level = parse_risk(&risk)?;
    let record = engine.request_approval(Uuid::new_v4(), risk_level).await;
    let decided = engine.decide(record.approval_id, approve, by).await?;
    output(&ApprovalOutput { record: decided }, json);
    Ok(())
}

async fn run_skill_install(json: bool, manifest_path: std::path::PathBuf, signature_valid: bool, allowlist: bool) -> Result<()> {
    let raw = std::fs::read_to_string(&manifest_path).with_context(|| format!("reading skill manifest {}", manifest_path.display()))?;
    let manifest: SkillManifest = serde_json::from_str(&raw).context("parsing skill manifest JSON")?;

    let bus = EventBus::new(300, 1000);
    let gate = SecurityGate::new(bus);
    if allowlist {
        gate.approve(&manifest.skill_id).await;
    }

    match gate.install_skill(manifest.clone(), signature_valid).await {
        Ok(installed) => output(&SkillInstallOutput { skill_id: installed.skill_id, allowed: true, reason: None }, json),
        Err(e) => output(&SkillInstallOutput { skill_id: manifest.skill_id, allowed: false, reason: Some(e.to_string()) }, json),
    }
    Ok(())
}

fn run_mode_get(json: bool, config: &swarmengine::domain::models::config::Config) {
    output(&ModeOutput { mode: config.execution_mode.clone() }, json);
}

fn run_mode_set(json: bool, mode: &str) -> Result<()> {
    let parsed = ExecutionMode::parse(mode).with_context(|| format!("invalid execution mode {mode:?}, expected mock, claude, or team"))?;
    output(&ModeOutput { mode: parsed.as_str().to_string() }, json);
    Ok(())
}

async fn run_serve(config: &swarmengine::domain::models::config::Config, mode: ExecutionMode, demo_agents: usize, tick_secs: u64) -> Result<()> {
    let engine = Arc::new(Engine::bootstrap(config, mode).await);
    engine.seed_demo_agents(demo_agents).await;
    let _autonomy_handles = engine.spawn_autonomy();

    tracing::info!(demo_agents, tick_secs, "swarmengine serving; press ctrl-c to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(tick_secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let hud = engine.budget_tracker.snapshot().await;
                let metrics = engine.bus.metrics_snapshot().await;
                tracing::info!(
                    hp = hud.hp.current, mp = hud.mp.current, ap = hud.ap.current,
                    queue_depth = metrics.queue_depth, dlq_depth = metrics.dlq_depth,
                    claim_conflict_rate = metrics.claim_conflict_rate,
                    "hud sync"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
        }
    }

    for handle in _autonomy_handles {
        handle.abort();
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct IntentOutput {
    root: Event,
    trace: Vec<Event>,
    hud: swarmengine::domain::models::hud::HudState,
}

impl CommandOutput for IntentOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Intent: {}", self.root.intent),
            format!("Root event: {} ({:?})", self.root.event_id, self.root.status),
            format!("Tags: {}", self.root.required_tags.join(", ")),
            format!("Trace ({} event(s)):", self.trace.len()),
        ];
        for e in &self.trace {
            lines.push(format!("  [{}] {} -> {:?}", e.topic, e.intent, e.status));
        }
        lines.push(format!(
            "HUD: hp={:.1}/{:.1} mp={:.1}/{:.1} ap={:.1}/{:.1}",
            self.hud.hp.current, self.hud.hp.max, self.hud.mp.current, self.hud.mp.max, self.hud.ap.current, self.hud.ap.max
        ));
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct EventOutput {
    event: Event,
}

impl CommandOutput for EventOutput {
    fn to_human(&self) -> String {
        format!(
            "{} [{}] status={:?} tags={} risk={:?}",
            self.event.event_id,
            self.event.topic,
            self.event.status,
            self.event.required_tags.join(","),
            self.event.risk_level
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct EventListOutput {
    events: Vec<Event>,
}

impl CommandOutput for EventListOutput {
    fn to_human(&self) -> String {
        if self.events.is_empty() {
            return "No events.".to_string();
        }
        let mut lines = vec![format!("{:<36} {:<14} {:<10} TAGS", "ID", "TOPIC", "STATUS")];
        for e in &self.events {
            lines.push(format!("{:<36} {:<14} {:<10} {}", e.event_id, e.topic.as_str(), format!("{:?}", e.status), e.required_tags.join(",")));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct ClaimOutput {
    event_id: Uuid,
    ok: bool,
    lease_expiry: Option<String>,
    reason: Option<String>,
}

impl CommandOutput for ClaimOutput {
    fn to_human(&self) -> String {
        if self.ok {
            format!("claimed {} until {}", self.event_id, self.lease_expiry.as_deref().unwrap_or("?"))
        } else {
            format!("claim failed for {}: {}", self.event_id, self.reason.as_deref().unwrap_or("unknown"))
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct HeartbeatOutput {
    event_id: Uuid,
    renewed: bool,
}

impl CommandOutput for HeartbeatOutput {
    fn to_human(&self) -> String {
        format!("{}: heartbeat {}", self.event_id, if self.renewed { "renewed" } else { "rejected" })
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct ApprovalOutput {
    record: ApprovalRecord,
}

impl CommandOutput for ApprovalOutput {
    fn to_human(&self) -> String {
        format!(
            "approval {} tier={:?} status={:?} decided_by={}",
            self.record.approval_id,
            self.record.tier,
            self.record.status,
            self.record.decided_by.as_deref().unwrap_or("-")
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct SkillInstallOutput {
    skill_id: String,
    allowed: bool,
    reason: Option<String>,
}

impl CommandOutput for SkillInstallOutput {
    fn to_human(&self) -> String {
        if self.allowed {
            format!("skill {} installed", self.skill_id)
        } else {
            format!("skill {} rejected: {}", self.skill_id, self.reason.as_deref().unwrap_or("unknown"))
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
struct ModeOutput {
    mode: String,
}

impl CommandOutput for ModeOutput {
    fn to_human(&self) -> String {
        format!("execution mode: {}", self.mode)
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
