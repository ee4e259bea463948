//! Builtin provider registration
//!
//! The compile-time counterpart of import-side-effect discovery: each
//! builtin provider has a factory here, and only the providers named in
//! the enabled lists get registered. Unknown names are left for
//! extensions to supply and are reported when nothing ever registers
//! them.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use aituber_config::{ConfigService, ProviderLayer};
use aituber_decision::providers::{
    KeywordActionConfig, KeywordActionDecisionProvider, LlmDecisionConfig, LlmDecisionProvider,
    ReplayConfig, ReplayDecisionProvider, RuleEngineConfig, RuleEngineDecisionProvider,
};
use aituber_input::providers::{
    ConsoleInputConfig, ConsoleInputProvider, MockDanmakuConfig, MockDanmakuProvider,
};
use aituber_output::providers::{
    DebugConsoleConfig, DebugConsoleOutputProvider, SubtitleConfig, SubtitleOutputProvider,
    ToneSynthesizer, TtsConfig, TtsOutputProvider,
};
use aituber_provider::{ProviderRegistry, RegistryError, RegistryInfo};

fn parse_config<C: DeserializeOwned>(name: &str, value: serde_json::Value) -> Result<C, RegistryError> {
    serde_json::from_value(value).map_err(|e| RegistryError::Construction {
        name: name.to_string(),
        message: e.to_string(),
    })
}

fn register_input(registry: &ProviderRegistry, name: &str) -> bool {
    match name {
        "console_input" => {
            registry.register_input_with_schema::<ConsoleInputConfig, _>(
                name,
                "builtin:console_input",
                |config, _context| {
                    let config = parse_config("console_input", config)?;
                    Ok(Arc::new(ConsoleInputProvider::new(config)))
                },
            );
            true
        }
        "mock_danmaku" => {
            registry.register_input_with_schema::<MockDanmakuConfig, _>(
                name,
                "builtin:mock_danmaku",
                |config, _context| {
                    let config = parse_config("mock_danmaku", config)?;
                    Ok(Arc::new(MockDanmakuProvider::new(config)))
                },
            );
            true
        }
        _ => false,
    }
}

fn register_decision(registry: &ProviderRegistry, name: &str) -> bool {
    match name {
        "llm" => {
            registry.register_decision_with_schema::<LlmDecisionConfig, _>(
                name,
                "builtin:llm",
                |config, context| {
                    let config = parse_config("llm", config)?;
                    Ok(Arc::new(LlmDecisionProvider::new(config, context)))
                },
            );
            true
        }
        "rule_engine" => {
            registry.register_decision_with_schema::<RuleEngineConfig, _>(
                name,
                "builtin:rule_engine",
                |config, context| {
                    let config = parse_config("rule_engine", config)?;
                    Ok(Arc::new(RuleEngineDecisionProvider::new(config, context)))
                },
            );
            true
        }
        "replay" => {
            registry.register_decision_with_schema::<ReplayConfig, _>(
                name,
                "builtin:replay",
                |config, context| {
                    let config = parse_config("replay", config)?;
                    Ok(Arc::new(ReplayDecisionProvider::new(config, context)))
                },
            );
            true
        }
        "keyword_action" => {
            registry.register_decision_with_schema::<KeywordActionConfig, _>(
                name,
                "builtin:keyword_action",
                |config, context| {
                    let config = parse_config("keyword_action", config)?;
                    Ok(Arc::new(KeywordActionDecisionProvider::new(config, context)))
                },
            );
            true
        }
        _ => false,
    }
}

fn register_output(registry: &ProviderRegistry, name: &str) -> bool {
    match name {
        "subtitle" => {
            registry.register_output_with_schema::<SubtitleConfig, _>(
                name,
                "builtin:subtitle",
                |config, context| {
                    let config = parse_config("subtitle", config)?;
                    Ok(Arc::new(SubtitleOutputProvider::new(config, context)))
                },
            );
            true
        }
        "debug_console" => {
            registry.register_output_with_schema::<DebugConsoleConfig, _>(
                name,
                "builtin:debug_console",
                |config, context| {
                    let config = parse_config("debug_console", config)?;
                    Ok(Arc::new(DebugConsoleOutputProvider::new(config, context)))
                },
            );
            true
        }
        "tts" => {
            registry.register_output_with_schema::<TtsConfig, _>(
                name,
                "builtin:tts",
                |config, context| {
                    let config = parse_config("tts", config)?;
                    Ok(Arc::new(TtsOutputProvider::new(
                        config,
                        context,
                        Arc::new(ToneSynthesizer),
                    )))
                },
            );
            true
        }
        _ => false,
    }
}

/// Registers every enabled builtin provider and returns per-layer counts.
pub fn register_builtin_providers(
    registry: &ProviderRegistry,
    config_service: &ConfigService,
) -> RegistryInfo {
    for (layer, register) in [
        (
            ProviderLayer::Input,
            register_input as fn(&ProviderRegistry, &str) -> bool,
        ),
        (ProviderLayer::Decision, register_decision),
        (ProviderLayer::Output, register_output),
    ] {
        for name in config_service.enabled_providers(layer) {
            if register(registry, &name) {
                debug!(layer = %layer, provider = %name, "builtin provider registered");
            } else {
                warn!(
                    layer = %layer,
                    provider = %name,
                    "no builtin provider under that name (an extension may supply it)"
                );
            }
        }
    }

    let counts = registry.counts();
    info!(
        input = counts.input,
        decision = counts.decision,
        output = counts.output,
        total = counts.total(),
        "provider registration complete"
    );
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[providers.input]
enabled_inputs = ["console_input", "unknown_thing"]

[providers.decision]
active_provider = "replay"
available_providers = ["replay", "llm"]

[providers.output]
enabled_outputs = ["debug_console"]
"#;

    #[test]
    fn test_only_enabled_builtins_registered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.toml"), CONFIG).unwrap();
        let config_service = ConfigService::new(dir.path());
        config_service.initialize().unwrap();

        let registry = ProviderRegistry::new();
        let counts = register_builtin_providers(&registry, &config_service);

        assert_eq!(counts.input, 1); // unknown_thing is not a builtin
        assert_eq!(counts.decision, 2);
        assert_eq!(counts.output, 1);
        assert!(registry.registered_inputs().contains(&"console_input".to_string()));
        assert!(!registry.registered_outputs().contains(&"tts".to_string()));
    }
}
