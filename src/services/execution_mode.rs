//! Process-wide execution mode toggle shared between the Decomposer and the
//! Executor: `{mock, claude, team}`, settable at runtime via the CLI and
//! read from `CORPCRAFT_EXECUTION_MODE` at start-up.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Mock,
    Claude,
    Team,
}

impl ExecutionMode {
    fn to_u8(self) -> u8 {
        match self {
            Self::Mock => 0,
            Self::Claude => 1,
            Self::Team => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Claude,
            2 => Self::Team,
            _ => Self::Mock,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(Self::Mock),
            "claude" => Some(Self::Claude),
            "team" => Some(Self::Team),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Claude => "claude",
            Self::Team => "team",
        }
    }
}

#[derive(Clone)]
pub struct ExecutionModeHandle(Arc<AtomicU8>);

impl ExecutionModeHandle {
    pub fn new(initial: ExecutionMode) -> Self {
        Self(Arc::new(AtomicU8::new(initial.to_u8())))
    }

    pub fn get(&self) -> ExecutionMode {
        ExecutionMode::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, mode: ExecutionMode) {
        self.0.store(mode.to_u8(), Ordering::SeqCst);
    }
}

impl Default for ExecutionModeHandle {
    fn default() -> Self {
        Self::new(ExecutionMode::Mock)
    }
}
