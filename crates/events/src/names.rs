//! Core event names
//!
//! Constants instead of magic strings, so subscriptions and emits stay in
//! sync across crates.

// Input domain
pub const DATA_RAW: &str = "data.raw";
pub const DATA_MESSAGE: &str = "data.message";

// Decision domain
pub const DECISION_REQUEST: &str = "decision.request";
pub const DECISION_INTENT: &str = "decision.intent";
pub const DECISION_PROVIDER_CONNECTED: &str = "decision.provider.connected";
pub const DECISION_PROVIDER_DISCONNECTED: &str = "decision.provider.disconnected";

// Output domain
pub const RENDER_COMPLETED: &str = "render.completed";
pub const RENDER_FAILED: &str = "render.failed";

// System
pub const CORE_STARTUP: &str = "core.startup";
pub const CORE_SHUTDOWN: &str = "core.shutdown";
pub const CORE_ERROR: &str = "core.error";

// Stream graphics control
pub const OBS_SEND_TEXT: &str = "obs.send_text";
pub const OBS_SWITCH_SCENE: &str = "obs.switch_scene";
pub const OBS_SET_SOURCE_VISIBILITY: &str = "obs.set_source_visibility";

// Remote streaming
pub const REMOTE_STREAM_REQUEST_IMAGE: &str = "remote_stream.request_image";

/// Name prefixes reserved for core events. Anything else is treated as an
/// extension-defined event and carries an unvalidated custom payload.
pub const CORE_PREFIXES: &[&str] = &[
    "data.",
    "decision.",
    "render.",
    "core.",
    "obs.",
    "remote_stream.",
];

/// Every core event name, for diagnostics and exhaustive registration.
pub const ALL: &[&str] = &[
    DATA_RAW,
    DATA_MESSAGE,
    DECISION_REQUEST,
    DECISION_INTENT,
    DECISION_PROVIDER_CONNECTED,
    DECISION_PROVIDER_DISCONNECTED,
    RENDER_COMPLETED,
    RENDER_FAILED,
    CORE_STARTUP,
    CORE_SHUTDOWN,
    CORE_ERROR,
    OBS_SEND_TEXT,
    OBS_SWITCH_SCENE,
    OBS_SET_SOURCE_VISIBILITY,
    REMOTE_STREAM_REQUEST_IMAGE,
];

/// Whether a name falls under one of the core prefixes.
pub fn is_core_event(name: &str) -> bool {
    CORE_PREFIXES.iter().any(|p| name.starts_with(p))
}
