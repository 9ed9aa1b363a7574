//! Autonomy Engine: background drivers that originate work and reactions
//! without a human or upstream event prompting them directly.

pub mod agent_comms;
pub mod cron_scheduler;
pub mod watch_reactor;

pub use agent_comms::{AgentComms, AgentMessage, CollabMessage, CollabMessageType};
pub use cron_scheduler::{CronJob, CronScheduler};
pub use watch_reactor::{WatchPattern, WatchReactor};
