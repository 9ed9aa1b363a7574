//! SwarmEngine: event-driven task coordination core for a multi-agent
//! orchestration platform.
//!
//! `domain` holds pure models and errors (no I/O). `infrastructure` wires
//! config and logging. `services` hosts the Event Bus plus every pipeline
//! stage and Autonomy Engine driver that subscribes to it.

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
