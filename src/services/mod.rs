//! SwarmEngine services: the pipeline stages wired onto the Event Bus plus
//! the Autonomy Engine's background drivers.

pub mod approval_engine;
pub mod audit_log;
pub mod autonomy;
pub mod budget_tracker;
pub mod compaction;
pub mod decomposer;
pub mod emp_handler;
pub mod event_bus;
pub mod execution_mode;
pub mod executor;
pub mod intent_router;
pub mod matcher;
pub mod recovery;
pub mod security_gate;
pub mod substrates;
pub mod summoner;
pub mod task_analyzer;

pub use approval_engine::ApprovalEngine;
pub use audit_log::AuditLog;
pub use budget_tracker::BudgetTracker;
pub use compaction::CompactionSvc;
pub use decomposer::Decomposer;
pub use emp_handler::EmpHandler;
pub use event_bus::{EventBus, EventFilter, Subscriber};
pub use execution_mode::{ExecutionMode, ExecutionModeHandle};
pub use executor::Executor;
pub use intent_router::IntentRouter;
pub use matcher::Matcher;
pub use recovery::Recovery;
pub use security_gate::SecurityGate;
pub use summoner::Summoner;
pub use task_analyzer::TaskAnalyzer;
