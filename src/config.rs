//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`OPENAI_API_KEY`, `HOST`, `PORT`, `APP_...`)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The AI backend credential has no default and is validated at startup:
//! a missing key fails the process fast rather than surfacing mid-call.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
}

/// HTTP/WebSocket server settings.
///
/// `host = "0.0.0.0"` is the default because the telephony gateway connects
/// from outside; deployments that front the service with a proxy can narrow
/// it via config.toml or `HOST`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// AI backend (realtime voice) settings.
///
/// ## Fields:
/// - `api_key`: backend credential, required, no default
/// - `model`: realtime model identifier
/// - `voice`: voice persona for audio output
/// - `instructions`: system instructions for the whole session
/// - `greeting_instructions`: one-shot instructions for the opening
///   greeting, so the assistant speaks before the caller does
/// - `temperature`: response randomness, accepted range 0.0..=2.0
/// - `greeting_settle_ms`: fallback delay before the greeting trigger when
///   no session acknowledgment has arrived yet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub instructions: String,
    pub greeting_instructions: String,
    pub temperature: f32,
    pub greeting_settle_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            openai: OpenAiConfig {
                api_key: String::new(), // must come from env or file
                model: "gpt-4o-realtime-preview-2024-10-01".to_string(),
                voice: "shimmer".to_string(),
                instructions: "You are Genie, a helpful AI assistant with a warm, \
                    friendly personality. Keep responses concise and conversational - \
                    this is a phone call, not a text chat. Be natural and personable."
                    .to_string(),
                greeting_instructions: "Greet the caller warmly and ask how you can \
                    help. Be friendly but natural."
                    .to_string(),
                temperature: 0.8,
                greeting_settle_ms: 250,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml and the environment.
    ///
    /// `HOST`, `PORT` and `OPENAI_API_KEY` are honored without the `APP_`
    /// prefix because that is what deployment platforms and the backend's
    /// own tooling export.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("openai.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration can actually run a call.
    ///
    /// The credential check is deliberately a startup failure: an absent key
    /// would otherwise only show up as a refused AI leg in the middle of the
    /// first phone call.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.openai.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "OpenAI API key is missing; set OPENAI_API_KEY or openai.api_key in config.toml"
            ));
        }

        if !(0.0..=2.0).contains(&self.openai.temperature) {
            return Err(anyhow::anyhow!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.openai.temperature
            ));
        }

        if self.openai.greeting_settle_ms > 5_000 {
            return Err(anyhow::anyhow!(
                "Greeting settle delay must be at most 5000ms, got {}",
                self.openai.greeting_settle_ms
            ));
        }

        Ok(())
    }

    /// Apply a partial update from a JSON document (runtime config endpoint).
    ///
    /// Only session-tuning fields can change at runtime; the credential and
    /// the listen address are fixed for the life of the process. Fields not
    /// present in the JSON are left unchanged.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(openai) = partial.get("openai") {
            if let Some(voice) = openai.get("voice").and_then(|v| v.as_str()) {
                self.openai.voice = voice.to_string();
            }
            if let Some(instructions) = openai.get("instructions").and_then(|v| v.as_str()) {
                self.openai.instructions = instructions.to_string();
            }
            if let Some(greeting) = openai
                .get("greeting_instructions")
                .and_then(|v| v.as_str())
            {
                self.openai.greeting_instructions = greeting.to_string();
            }
            if let Some(temperature) = openai.get("temperature").and_then(|v| v.as_f64()) {
                self.openai.temperature = temperature as f32;
            }
            if let Some(settle) = openai.get("greeting_settle_ms").and_then(|v| v.as_u64()) {
                self.openai.greeting_settle_ms = settle;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.openai.api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_default_config_has_expected_values() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.openai.voice, "shimmer");
        assert_eq!(config.openai.greeting_settle_ms, 250);
    }

    #[test]
    fn test_missing_credential_fails_validation() {
        // The default config has no API key and must not pass
        assert!(AppConfig::default().validate().is_err());
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_invalid_port_fails_validation() {
        let mut config = configured();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_temperature_range_is_enforced() {
        let mut config = configured();
        config.openai.temperature = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_update() {
        let mut config = configured();
        let json = r#"{"openai": {"voice": "alloy", "temperature": 0.6}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.openai.voice, "alloy");
        assert!((config.openai.temperature - 0.6).abs() < f32::EPSILON);
        // Untouched fields keep their values
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_update_rejects_invalid_values() {
        let mut config = configured();
        let json = r#"{"openai": {"temperature": 9.0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
