//! Extension system: composite plugins bundling several providers
//!
//! An extension owns a group of providers that ship together (say, a
//! platform integration with one input and two outputs) and declares
//! dependencies on other extensions. The [`ExtensionManager`] orders
//! setup topologically over those dependencies and refuses cyclic graphs
//! outright: a cycle loads nothing.

pub mod extension;
pub mod manager;

pub use extension::{Extension, ExtensionInfo};
pub use manager::{ExtensionFactory, ExtensionManager};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtensionError {
    /// The declared dependency graph contains a cycle; no extension was
    /// loaded.
    #[error("circular dependency involving extension '{0}'")]
    CircularDependency(String),

    /// Topological ordering lost nodes (defence in depth after the cycle
    /// check).
    #[error("dependency resolution failed: ordered {ordered} of {total} extensions")]
    DependencyResolution { ordered: usize, total: usize },

    #[error("unknown extension '{0}'")]
    Unknown(String),

    /// Refused to unload while dependents are still loaded.
    #[error("extension '{name}' is required by: {dependents}")]
    HasDependents { name: String, dependents: String },

    #[error("extension '{name}' setup failed: {message}")]
    Setup { name: String, message: String },

    #[error("extension '{name}' cleanup failed: {message}")]
    Cleanup { name: String, message: String },
}
