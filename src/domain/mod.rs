//! Domain layer: pure data models and error taxonomy, no I/O.

pub mod error;
pub mod models;
