//! Configuration management for the VTuber orchestrator
//!
//! One TOML file (`config.toml`, seeded from `config-template.toml`)
//! drives the whole process. This crate provides:
//! - [`ConfigService`]: load, template seeding, schema-version migration,
//!   section lookup
//! - [`deep_merge`]: the two-level merge used for provider configs
//!   (schema defaults ← main-config override)
//!
//! Per-provider tables under `[providers.<layer>.<name>]` are opaque to
//! the core: they are merged and handed verbatim to the provider.

pub mod merge;
pub mod migration;
pub mod service;

pub use merge::deep_merge;
pub use service::{ConfigService, InitReport, ProviderLayer};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("missing required section: {0}")]
    MissingSection(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("schema validation failed for '{provider}': {message}")]
    SchemaValidation { provider: String, message: String },

    #[error("config migration failed: {0}")]
    Migration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}
