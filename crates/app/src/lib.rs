//! Orchestrator assembly for the VTuber agent
//!
//! One process runs one agent: config and services are built once, the
//! provider registry is populated with the enabled builtins, and the
//! three domain managers plus the extension manager are wired over the
//! shared event bus.

pub mod orchestrator;
pub mod registration;

pub use orchestrator::Orchestrator;
pub use registration::register_builtin_providers;
