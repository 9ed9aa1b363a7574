//! CLI type definitions.
//!
//! This module contains clap command structures that define the `swarmctl`
//! interface.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "swarmctl")]
#[command(about = "SwarmEngine — local operation and inspection CLI", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Route a free-form intent into the pipeline and wait for it to settle
    Intent {
        /// The intent text (e.g. "scrape leads from the west region")
        text: String,

        /// Risk level: low, medium, high
        #[arg(long, default_value = "low")]
        risk: String,

        /// Extra required tags beyond what the intent router derives
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Token budget ceiling
        #[arg(long)]
        max_tokens: Option<u64>,

        /// Wall-clock minute budget ceiling
        #[arg(long)]
        max_minutes: Option<u64>,

        /// Cash budget ceiling
        #[arg(long)]
        max_cash: Option<f64>,

        /// Demo agents to register before routing, so the Matcher has
        /// someone to claim the work (agents are recruited with every tag
        /// the intent-tagging rule table can produce)
        #[arg(long, default_value = "2")]
        demo_agents: usize,

        /// How long to wait for the task to reach a terminal state before
        /// printing whatever trace exists so far
        #[arg(long, default_value = "5")]
        timeout_secs: u64,
    },

    /// Event Bus operations
    #[command(subcommand)]
    Events(EventsCommands),

    /// Approval Engine operations
    #[command(subcommand)]
    Approvals(ApprovalsCommands),

    /// Skill Security Gate operations
    #[command(subcommand)]
    Skills(SkillsCommands),

    /// Execution mode control
    #[command(subcommand)]
    Mode(ModeCommands),

    /// Run the engine as a long-lived process: all subscribers wired,
    /// autonomy drivers spawned, until interrupted
    Serve {
        /// Demo agents to seed the Matcher with at start-up
        #[arg(long, default_value = "3")]
        demo_agents: usize,

        /// Seconds between HUD/metrics status lines
        #[arg(long, default_value = "10")]
        tick_secs: u64,
    },
}

#[derive(Subcommand)]
pub enum EventsCommands {
    /// Post a bare TASK_POSTED event and print it (no subscribers wired —
    /// demonstrates the bus's publish/idempotency path in isolation)
    Post {
        intent: String,
        #[arg(long, default_value = "low")]
        risk: String,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },

    /// Post several demo events across a few tag combinations and list them
    List {
        #[arg(long, default_value = "low")]
        risk: String,
    },

    /// Post a demo event and immediately fetch it back by id
    Get {
        intent: String,
        #[arg(long, default_value = "low")]
        risk: String,
    },

    /// Post a demo event and claim it for the given agent
    Claim {
        intent: String,
        #[arg(long)]
        agent_id: String,
        #[arg(long, default_value = "low")]
        risk: String,
        #[arg(long)]
        lease_ms: Option<i64>,
    },

    /// Post, claim, and heartbeat a demo event for the given agent
    Heartbeat {
        intent: String,
        #[arg(long)]
        agent_id: String,
        #[arg(long, default_value = "low")]
        risk: String,
    },

    /// Post, claim, and release (complete) a demo event for the given agent
    Complete {
        intent: String,
        #[arg(long)]
        agent_id: String,
        #[arg(long, default_value = "low")]
        risk: String,
    },
}

#[derive(Subcommand)]
pub enum ApprovalsCommands {
    /// Raise a synthetic approval request and immediately decide it
    Decide {
        /// Risk level driving the SLA tier: low, medium, high
        #[arg(long, default_value = "high")]
        risk: String,

        /// Approve the request (mutually exclusive with --reject)
        #[arg(long)]
        approve: bool,

        /// Reject the request (mutually exclusive with --approve)
        #[arg(long)]
        reject: bool,

        /// Identity recorded as the decider
        #[arg(long, default_value = "operator")]
        by: String,
    },
}

#[derive(Subcommand)]
pub enum SkillsCommands {
    /// Install a skill manifest (JSON) through the security gate
    Install {
        /// Path to a skill manifest JSON file
        manifest_path: std::path::PathBuf,

        /// Whether the manifest's signature has been externally verified
        #[arg(long)]
        signature_valid: bool,

        /// Pre-approve this skill id for high-risk THIRD_PARTY permissions
        #[arg(long)]
        allowlist: bool,
    },
}

#[derive(Subcommand)]
pub enum ModeCommands {
    /// Print the execution mode from the layered configuration
    Get,

    /// Validate an execution mode value (mock, claude, team)
    Set {
        mode: String,
    },
}
