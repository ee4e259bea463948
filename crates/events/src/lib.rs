//! In-process typed publish/subscribe for the VTuber orchestrator
//!
//! This crate provides:
//! - [`EventBus`]: priority-ordered concurrent dispatch with error
//!   isolation, per-event statistics, and cancellable shutdown
//! - [`EventPayload`]: the closed sum type of every core event payload
//! - [`EventRegistry`]: event-name → payload-kind bindings used to reject
//!   mistyped emits synchronously
//! - [`names`]: the catalogue of core event names

pub mod bus;
pub mod names;
pub mod payload;
pub mod registry;
pub mod stats;

pub use bus::{EmitOptions, EventBus, EventContext, HandlerResult, SubscriptionId};
pub use payload::{
    CustomPayload, DecisionRequestPayload, ErrorPayload, EventPayload, IntentPayload,
    MessageReadyPayload, ObsSendTextPayload, ObsSetSourceVisibilityPayload,
    ObsSwitchScenePayload, ProviderConnectedPayload, ProviderDisconnectedPayload, RawDataPayload,
    RemoteStreamRequestImagePayload, RenderCompletedPayload, RenderFailedPayload, ShutdownPayload,
    StartupPayload, TypedPayload,
};
pub use registry::EventRegistry;
pub use stats::EventStats;

use thiserror::Error;

/// Event bus errors.
#[derive(Error, Debug)]
pub enum EventError {
    /// The payload kind does not match the registered binding for the
    /// event name. Raised synchronously by `emit`; no handler runs.
    #[error("payload type mismatch for '{event}': expected {expected}, got {actual}")]
    PayloadType {
        event: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Non-force cleanup timed out with emits still in flight; the bus
    /// has been re-opened.
    #[error("cleanup timed out with {remaining} emit(s) still active")]
    CleanupTimeout { remaining: usize },

    /// A handler failed while `error_isolate` was off.
    #[error("handler failed for '{event}': {message}")]
    HandlerFailed { event: String, message: String },
}
