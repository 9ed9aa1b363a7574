//! `swarmctl` CLI: command definitions and output formatting. Command
//! dispatch logic lives in the binary crate (`src/main.rs`) since it wires
//! together the full set of services.

pub mod output;
pub mod types;

pub use types::{ApprovalsCommands, Cli, Commands, EventsCommands, ModeCommands, SkillsCommands};
