//! Event payload catalogue
//!
//! Every core event carries one variant of [`EventPayload`]. Extension
//! events use [`CustomPayload`], which is explicitly unvalidated.
//!
//! The serialized shape of each struct is the wire format documented in
//! the event schema; field names are load-bearing.

use aituber_core::{unix_now, DataType, Intent, NormalizedMessage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw data captured by an input provider before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDataPayload {
    pub content: Value,
    pub source: String,
    pub data_type: DataType,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub preserve_original: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_data: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A normalized message is ready for the decision domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReadyPayload {
    pub message: NormalizedMessage,
    pub source: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MessageReadyPayload {
    pub fn from_message(message: NormalizedMessage) -> Self {
        let source = message.source.clone();
        let timestamp = message.timestamp;
        Self {
            message,
            source,
            timestamp,
            metadata: Map::new(),
        }
    }
}

/// Explicit request for a decision, outside the normal message flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequestPayload {
    pub text: String,
    pub source: String,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// A decision provider produced an intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPayload {
    pub intent_data: Intent,
    pub provider: String,
}

impl IntentPayload {
    pub fn from_intent(intent: Intent, provider: impl Into<String>) -> Self {
        Self {
            intent_data: intent,
            provider: provider.into(),
        }
    }
}

/// The active decision provider connected to its backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConnectedPayload {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ProviderConnectedPayload {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            endpoint: None,
            timestamp: unix_now(),
            metadata: Map::new(),
        }
    }
}

/// The active decision provider disconnected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDisconnectedPayload {
    pub provider: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub will_retry: bool,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ProviderDisconnectedPayload {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
            will_retry: false,
            timestamp: unix_now(),
            metadata: Map::new(),
        }
    }
}

/// An output provider finished rendering an intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderCompletedPayload {
    pub provider: String,
    pub output_type: String,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

/// An output provider failed or timed out while rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderFailedPayload {
    pub provider: String,
    pub output_type: String,
    pub error_type: String,
    pub error_message: String,
    #[serde(default)]
    pub recoverable: bool,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Emitted once when the orchestrator finishes assembling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupPayload {
    pub version: String,
    #[serde(default)]
    pub timestamp: f64,
}

/// Emitted once when a graceful shutdown begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownPayload {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub timestamp: f64,
}

/// A component hit a persistent failure worth surfacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub component: String,
    pub message: String,
    #[serde(default)]
    pub recoverable: bool,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsSendTextPayload {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsSwitchScenePayload {
    pub scene_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObsSetSourceVisibilityPayload {
    pub source_name: String,
    pub visible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteStreamRequestImagePayload {
    #[serde(default)]
    pub timestamp: f64,
}

/// Extension-defined payload. The bus never validates its shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomPayload {
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Closed sum of every payload the bus can carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    RawData(RawDataPayload),
    MessageReady(MessageReadyPayload),
    DecisionRequest(DecisionRequestPayload),
    Intent(IntentPayload),
    ProviderConnected(ProviderConnectedPayload),
    ProviderDisconnected(ProviderDisconnectedPayload),
    RenderCompleted(RenderCompletedPayload),
    RenderFailed(RenderFailedPayload),
    Startup(StartupPayload),
    Shutdown(ShutdownPayload),
    CoreError(ErrorPayload),
    ObsSendText(ObsSendTextPayload),
    ObsSwitchScene(ObsSwitchScenePayload),
    ObsSetSourceVisibility(ObsSetSourceVisibilityPayload),
    RemoteStreamRequestImage(RemoteStreamRequestImagePayload),
    Custom(CustomPayload),
}

impl EventPayload {
    /// Stable kind tag used for registry bindings and mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::RawData(_) => "RawDataPayload",
            EventPayload::MessageReady(_) => "MessageReadyPayload",
            EventPayload::DecisionRequest(_) => "DecisionRequestPayload",
            EventPayload::Intent(_) => "IntentPayload",
            EventPayload::ProviderConnected(_) => "ProviderConnectedPayload",
            EventPayload::ProviderDisconnected(_) => "ProviderDisconnectedPayload",
            EventPayload::RenderCompleted(_) => "RenderCompletedPayload",
            EventPayload::RenderFailed(_) => "RenderFailedPayload",
            EventPayload::Startup(_) => "StartupPayload",
            EventPayload::Shutdown(_) => "ShutdownPayload",
            EventPayload::CoreError(_) => "ErrorPayload",
            EventPayload::ObsSendText(_) => "ObsSendTextPayload",
            EventPayload::ObsSwitchScene(_) => "ObsSwitchScenePayload",
            EventPayload::ObsSetSourceVisibility(_) => "ObsSetSourceVisibilityPayload",
            EventPayload::RemoteStreamRequestImage(_) => "RemoteStreamRequestImagePayload",
            EventPayload::Custom(_) => "CustomPayload",
        }
    }

    /// One-line human-readable summary used for the per-emit INFO log.
    pub fn log_format(&self) -> String {
        match self {
            EventPayload::MessageReady(p) => {
                let text = truncate(&p.message.text, 50);
                match p.message.user_name() {
                    Some(user) => format!("{text} ({user})"),
                    None => text,
                }
            }
            EventPayload::Intent(p) => format!(
                "provider={} emotion={:?} response=\"{}\" actions=[{}]",
                p.provider,
                p.intent_data.emotion,
                truncate(&p.intent_data.response_text, 50),
                p.intent_data
                    .actions
                    .iter()
                    .map(|a| format!("{:?}", a.action_type))
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            EventPayload::RenderCompleted(p) => format!(
                "{}({}) success={} duration_ms={:.0}",
                p.provider, p.output_type, p.success, p.duration_ms
            ),
            EventPayload::RenderFailed(p) => format!(
                "{}({}) {}: {}",
                p.provider,
                p.output_type,
                p.error_type,
                truncate(&p.error_message, 80)
            ),
            EventPayload::ProviderConnected(p) => match &p.endpoint {
                Some(e) => format!("{} @ {e}", p.provider),
                None => p.provider.clone(),
            },
            EventPayload::ProviderDisconnected(p) => {
                format!("{} reason={}", p.provider, p.reason)
            }
            other => {
                let json = serde_json::to_string(other).unwrap_or_default();
                format!("{}({})", other.kind(), truncate(&json, 120))
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

/// A payload struct that can be extracted from [`EventPayload`] for typed
/// subscriptions.
pub trait TypedPayload: Sized + Send + 'static {
    /// Kind tag registered against the event name when subscribing.
    const KIND: &'static str;

    fn from_payload(payload: EventPayload) -> Option<Self>;
}

macro_rules! typed_payload {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl TypedPayload for $ty {
            const KIND: &'static str = $kind;

            fn from_payload(payload: EventPayload) -> Option<Self> {
                match payload {
                    EventPayload::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

typed_payload!(RawDataPayload, RawData, "RawDataPayload");
typed_payload!(MessageReadyPayload, MessageReady, "MessageReadyPayload");
typed_payload!(DecisionRequestPayload, DecisionRequest, "DecisionRequestPayload");
typed_payload!(IntentPayload, Intent, "IntentPayload");
typed_payload!(ProviderConnectedPayload, ProviderConnected, "ProviderConnectedPayload");
typed_payload!(ProviderDisconnectedPayload, ProviderDisconnected, "ProviderDisconnectedPayload");
typed_payload!(RenderCompletedPayload, RenderCompleted, "RenderCompletedPayload");
typed_payload!(RenderFailedPayload, RenderFailed, "RenderFailedPayload");
typed_payload!(StartupPayload, Startup, "StartupPayload");
typed_payload!(ShutdownPayload, Shutdown, "ShutdownPayload");
typed_payload!(ErrorPayload, CoreError, "ErrorPayload");
typed_payload!(ObsSendTextPayload, ObsSendText, "ObsSendTextPayload");
typed_payload!(ObsSwitchScenePayload, ObsSwitchScene, "ObsSwitchScenePayload");
typed_payload!(
    ObsSetSourceVisibilityPayload,
    ObsSetSourceVisibility,
    "ObsSetSourceVisibilityPayload"
);
typed_payload!(
    RemoteStreamRequestImagePayload,
    RemoteStreamRequestImage,
    "RemoteStreamRequestImagePayload"
);
typed_payload!(CustomPayload, Custom, "CustomPayload");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_typed_payload() {
        let payload = EventPayload::Intent(IntentPayload::from_intent(
            Intent::new("hi", "hello"),
            "replay",
        ));
        assert_eq!(payload.kind(), IntentPayload::KIND);
    }

    #[test]
    fn test_typed_extraction() {
        let intent = Intent::new("hi", "hello");
        let payload = EventPayload::Intent(IntentPayload::from_intent(intent.clone(), "replay"));
        let extracted = IntentPayload::from_payload(payload).unwrap();
        assert_eq!(extracted.intent_data.id, intent.id);
        assert_eq!(extracted.provider, "replay");

        let wrong = EventPayload::Startup(StartupPayload {
            version: "0.1.0".into(),
            timestamp: 0.0,
        });
        assert!(IntentPayload::from_payload(wrong).is_none());
    }

    #[test]
    fn test_message_ready_log_format() {
        let msg = NormalizedMessage::new("hello there", "console_input");
        let payload = EventPayload::MessageReady(MessageReadyPayload::from_message(msg));
        assert_eq!(payload.log_format(), "hello there");
    }

    #[test]
    fn test_log_format_truncates() {
        let msg = NormalizedMessage::new("a".repeat(200), "console_input");
        let payload = EventPayload::MessageReady(MessageReadyPayload::from_message(msg));
        assert!(payload.log_format().ends_with("..."));
        assert!(payload.log_format().chars().count() <= 50);
    }

    #[test]
    fn test_intent_wire_shape() {
        let payload = IntentPayload::from_intent(Intent::new("a", "b"), "llm");
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("intent_data").is_some());
        assert_eq!(json["provider"], "llm");
    }
}
