//! Cron Scheduler: ticks every minute, firing any job whose `cron_expr`
//! matches the current minute, publishing `TASK_POSTED` the same way a
//! human operator posting ad hoc work would.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::event::{Event, Payload, RiskLevel, Topic};
use crate::services::event_bus::EventBus;

/// A single field of a cron expression: either a wildcard or a fixed set
/// of matching values.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Values(Vec<u32>),
}

impl CronField {
    fn parse(raw: &str) -> Result<Self, String> {
        if raw == "*" {
            return Ok(Self::Any);
        }
        let mut values = Vec::new();
        for part in raw.split(',') {
            let v: u32 = part.trim().parse().map_err(|_| format!("invalid cron field value: {part}"))?;
            values.push(v);
        }
        Ok(Self::Values(values))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            Self::Any => true,
            Self::Values(vs) => vs.contains(&value),
        }
    }
}

/// `{minute hour day-of-week}` cron expression, the only fields the spec
/// names (no day-of-month/month fields).
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(format!("cron expression must have 3 fields (minute hour day-of-week), got {expr:?}"));
        }
        Ok(Self {
            minute: CronField::parse(parts[0])?,
            hour: CronField::parse(parts[1])?,
            day_of_week: CronField::parse(parts[2])?,
        })
    }

    fn matches(&self, at: DateTime<Utc>) -> bool {
        self.minute.matches(at.minute()) && self.hour.matches(at.hour()) && self.day_of_week.matches(at.weekday().num_days_from_sunday())
    }
}

#[derive(Debug, Clone)]
pub struct CronJob {
    pub job_id: Uuid,
    pub name: String,
    pub cron_expr: CronExpr,
    pub intent: String,
    pub required_tags: Vec<String>,
    /// The minute-bucket (`floor(timestamp / 60)`) this job last fired in,
    /// so a single matching minute only fires once even if the scheduler's
    /// poll tick runs more than once within it.
    last_fired_minute: Option<i64>,
}

impl CronJob {
    pub fn new(name: impl Into<String>, cron_expr: &str, intent: impl Into<String>, required_tags: Vec<String>) -> Result<Self, String> {
        Ok(Self {
            job_id: Uuid::new_v4(),
            name: name.into(),
            cron_expr: CronExpr::parse(cron_expr)?,
            intent: intent.into(),
            required_tags,
            last_fired_minute: None,
        })
    }
}

pub struct CronScheduler {
    bus: EventBus,
    jobs: RwLock<Vec<CronJob>>,
    poll_interval: Duration,
}

impl CronScheduler {
    pub fn new(bus: EventBus, poll_interval: Duration) -> Arc<Self> {
        Arc::new(Self { bus, jobs: RwLock::new(Vec::new()), poll_interval })
    }

    pub async fn add_job(&self, job: CronJob) {
        self.jobs.write().await.push(job);
    }

    pub async fn remove_job(&self, job_id: Uuid) {
        self.jobs.write().await.retain(|j| j.job_id != job_id);
    }

    /// Check every job against the current minute, firing at most once per
    /// matching minute via a per-job minute-bucket guard plus the bus's own
    /// idempotency key as a second line of defense.
    pub async fn tick(&self) {
        self.tick_at(Utc::now()).await;
    }

    async fn tick_at(&self, now: DateTime<Utc>) {
        let minute_bucket = now.timestamp() / 60;
        let due: Vec<(String, String, Vec<String>)> = {
            let mut jobs = self.jobs.write().await;
            let mut due = Vec::new();
            for job in jobs.iter_mut() {
                if job.last_fired_minute == Some(minute_bucket) {
                    continue;
                }
                if !job.cron_expr.matches(now) {
                    continue;
                }
                job.last_fired_minute = Some(minute_bucket);
                due.push((job.name.clone(), job.intent.clone(), job.required_tags.clone()));
            }
            due
        };

        for (name, intent, required_tags) in due {
            debug!(job = %name, %intent, "cron job firing");
            let event = Event::new(
                Topic::TaskPosted,
                intent,
                Payload::default(),
                None,
                required_tags,
                RiskLevel::Low,
                None,
                Some(format!("cron:{name}:{minute_bucket}")),
            );
            self.bus.publish(event).await;
        }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}
