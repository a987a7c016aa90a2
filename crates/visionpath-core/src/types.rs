//! Shared types for the visionpath relay.
//!
//! These types are used across visionpath-lib and visionpath-cli. Keeping them
//! in visionpath-core means consumers can depend on them without pulling in
//! tokio, reqwest, or axum.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::voice::VoiceState;

// ─── Modes and responses ───────────────────────────────────────────────────

/// Which response field is authoritative for speech and display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Navigation,
    Assistant,
    Reading,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Navigation => "navigation",
            Mode::Assistant => "assistant",
            Mode::Reading => "reading",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "navigation" => Ok(Mode::Navigation),
            "assistant" => Ok(Mode::Assistant),
            "reading" => Ok(Mode::Reading),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// One response string per mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Responses {
    pub navigation: String,
    pub chat: String,
    pub reading: String,
}

impl Responses {
    pub fn get(&self, mode: Mode) -> &str {
        match mode {
            Mode::Navigation => &self.navigation,
            Mode::Assistant => &self.chat,
            Mode::Reading => &self.reading,
        }
    }

    pub fn get_mut(&mut self, mode: Mode) -> &mut String {
        match mode {
            Mode::Navigation => &mut self.navigation,
            Mode::Assistant => &mut self.chat,
            Mode::Reading => &mut self.reading,
        }
    }
}

// ─── Speech types ──────────────────────────────────────────────────────────

/// How a speech request interacts with whatever is already queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechMode {
    /// Discard anything queued or playing, then speak.
    Flush,
    /// Append after the queued utterances.
    Add,
}

/// A single utterance handed to the speech output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub mode: SpeechMode,
    pub utterance_id: String,
}

impl SpeechRequest {
    pub fn flush(text: impl Into<String>, utterance_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: SpeechMode::Flush,
            utterance_id: utterance_id.into(),
        }
    }

    pub fn add(text: impl Into<String>, utterance_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            mode: SpeechMode::Add,
            utterance_id: utterance_id.into(),
        }
    }
}

/// Utterance ids used by the relay. The platform echoes them back in its
/// progress callbacks.
pub mod utterance {
    pub const SENTENCE: &str = "sentence";
    pub const NEW_RESPONSE: &str = "new_response";
    pub const NAVIGATION: &str = "navigation";
    pub const OFFLINE: &str = "offline_warning";
    pub const NARRATION: &str = "narration";
    pub const INITIAL_GREETING: &str = "initial_greeting";
    pub const INSTRUCTIONS: &str = "instructions";
    pub const START_BLIND_MODE: &str = "start_blind_mode";
    pub const TIMEOUT_RESTART: &str = "timeout_restart";
}

// ─── Config ────────────────────────────────────────────────────────────────

/// Relay timing and the fixed phrases it speaks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Seconds between reachability polls.
    pub connectivity_interval_secs: u64,
    /// Seconds between auto-advance ticks of the pacer.
    pub advance_interval_secs: u64,
    /// Seconds between idle-prompt checks while listening for the wake phrase.
    pub prompt_interval_secs: u64,
    /// Seconds between welcome-repeat checks.
    pub welcome_interval_secs: u64,
    /// Seconds without interaction before a prompt is repeated.
    pub idle_timeout_secs: u64,
    /// Greet and wait for the wake phrase before blind mode starts.
    pub onboarding: bool,
    pub offline_message: String,
    pub welcome_message: String,
    pub instructions_message: String,
    pub prompt_message: String,
    pub starting_message: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connectivity_interval_secs: 3,
            advance_interval_secs: 5,
            prompt_interval_secs: 10,
            welcome_interval_secs: 1,
            idle_timeout_secs: 20,
            onboarding: true,
            offline_message: "You are not connected to the internet".into(),
            welcome_message: "Welcome to VisionPath. Say Hey Metro for Instructions, and Say \
                              Start Metro, or double tap anywhere to start Blind Mode."
                .into(),
            instructions_message: "Let me explain how to use the app. The default screen is \
                                   blind mode. In blind mode screen, double tap anywhere to \
                                   enter or exit assistant mode. Also in blind mode screen, \
                                   long press and hold to enter or exit reading mode. Okay! \
                                   Now, say Start Metro, or double tap anywhere in screen to \
                                   start blind mode."
                .into(),
            prompt_message: "Say Hey Metro for Instructions, and Say Start Metro, or double \
                             tap anywhere to start Blind Mode."
                .into(),
            starting_message: "Starting Blind Mode".into(),
        }
    }
}

impl RelayConfig {
    pub fn connectivity_interval(&self) -> Duration {
        Duration::from_secs(self.connectivity_interval_secs.max(1))
    }

    pub fn advance_interval(&self) -> Duration {
        Duration::from_secs(self.advance_interval_secs.max(1))
    }

    pub fn prompt_interval(&self) -> Duration {
        Duration::from_secs(self.prompt_interval_secs.max(1))
    }

    pub fn welcome_interval(&self) -> Duration {
        Duration::from_secs(self.welcome_interval_secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

// ─── Status ────────────────────────────────────────────────────────────────

/// Session status snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub mode: Mode,
    pub online: bool,
    pub cursor: usize,
    pub sentences: Vec<String>,
    pub last_utterance: String,
    pub watermark: usize,
    pub voice_state: VoiceState,
    pub listening: bool,
    pub blind_mode: bool,
    pub responses: Responses,
    pub last_error: Option<String>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            mode: Mode::Navigation,
            online: true,
            cursor: 0,
            sentences: Vec::new(),
            last_utterance: String::new(),
            watermark: 0,
            voice_state: VoiceState::Idle,
            listening: false,
            blind_mode: false,
            responses: Responses::default(),
            last_error: None,
        }
    }
}
