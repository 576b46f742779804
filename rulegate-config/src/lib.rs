//! Configuration for rulegate hosts.
//!
//! This crate owns everything that happens before the first scan: reading
//! the rule table and checker settings from TOML/JSON (file path or inline
//! JSON from the environment, falling back to well-known file names),
//! rejecting malformed option values, and turning the result into the
//! immutable rule set and checker registry the scheduler runs on. It also
//! installs the tracing subscriber hosts log through.

pub mod build;
pub mod loader;
pub mod models;
pub mod telemetry;
pub mod validation;

pub use build::LoadedConfig;
pub use loader::ConfigSource;
pub use models::{RuleConfig, RulegateConfig};
pub use validation::{ConfigError, ConfigWarning, ConfigWarnings};
