//! Configuration management: hierarchical `figment` loading, validation,
//! and type-safe config structs (defined in `domain::models::config`).

mod loader;

pub use loader::ConfigLoader;
