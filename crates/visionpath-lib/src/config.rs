//! Configuration — TOML file, environment, then CLI overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use visionpath_core::types::RelayConfig;

use crate::{Error, Result};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub speech: SpeechConfig,
    pub generation: GenerationConfig,
    pub connectivity: ConnectivityConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 2004,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// TTS server base URL. Empty means speech is only logged.
    pub url: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:2003".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub temperature: f32,
    pub chat_temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub timeout_secs: u64,
    pub navigation_instruction: String,
    pub chat_instruction: String,
    pub navigation_prompt: String,
    pub reading_prompt: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".into(),
            model: "gemini-1.5-flash".into(),
            api_key: String::new(),
            temperature: 1.0,
            chat_temperature: 1.5,
            top_k: 64,
            top_p: 0.95,
            max_output_tokens: 8192,
            timeout_secs: 60,
            navigation_instruction: "You guide a visually impaired person through live camera \
                frames. Keep each answer to three or four short sentences. Name obstacles with \
                their color, size and position, say whether the user is on a sidewalk, road or \
                in a crowd, and give direct instructions such as \"Stop\", \"Turn right\" or \
                \"Step over\". Warn about stairs, curbs, uneven ground, traffic and platform \
                edges. Never talk about image quality; ask the user to move the camera instead. \
                Do not repeat yourself when consecutive frames look the same."
                .into(),
            chat_instruction: "You answer a visually impaired user's questions about their \
                surroundings. Another model watches the live camera and gives you its latest \
                description as frame data. Use it to give clear, detailed answers."
                .into(),
            navigation_prompt: "Analyze this frame and provide brief navigation prompts.".into(),
            reading_prompt: "Read out all legible text in this image, in reading order.".into(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` probed with a TCP connect.
    pub probe_addr: String,
    pub timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_addr: "generativelanguage.googleapis.com:443".into(),
            timeout_ms: 2000,
        }
    }
}

impl ConnectivityConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AppConfig {
    /// Load from `path` if given, otherwise defaults. The API key falls back
    /// to [`API_KEY_ENV`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        if config.generation.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                config.generation.api_key = key;
            }
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.generation.model.trim().is_empty() {
            return Err(Error::Config("generation.model must not be empty".into()));
        }
        if self.relay.advance_interval_secs == 0 || self.relay.connectivity_interval_secs == 0 {
            return Err(Error::Config("relay intervals must be at least one second".into()));
        }
        Ok(())
    }
}
