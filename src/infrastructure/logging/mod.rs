//! Logging infrastructure: structured `tracing` output (JSON or pretty),
//! optional daily-rotated file sink, and secret scrubbing for raw strings
//! that bypass `tracing`'s field macros.

mod logger;
mod secret_scrubbing;

pub use logger::LoggerHandle;
pub use secret_scrubbing::SecretScrubbingLayer;
