//! Voice interaction state machine.
//!
//! The platform reports speech synthesis and recognition through callbacks.
//! They arrive here as [`VoiceEvent`]s and move a single [`VoiceState`].

use serde::{Deserialize, Serialize};

/// Observable voice state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Listening,
    Speaking,
}

/// Callback events from the speech platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum VoiceEvent {
    ListenStarted,
    ListenStopped,
    SpeechStarted,
    SpeechDone,
    SpeechError,
    ResultsReceived { transcript: String },
}

#[derive(Debug, Clone, Default)]
pub struct VoiceMachine {
    state: VoiceState,
    listening: bool,
}

impl VoiceMachine {
    pub fn state(&self) -> VoiceState {
        self.state
    }

    /// Whether recognition should be (re)started after speech finishes.
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_speaking(&self) -> bool {
        self.state == VoiceState::Speaking
    }

    /// Apply an event. Returns the transcript when a recognition result
    /// arrives while listening.
    pub fn handle(&mut self, event: VoiceEvent) -> Option<String> {
        match event {
            VoiceEvent::ListenStarted => {
                self.listening = true;
                if self.state == VoiceState::Idle {
                    self.state = VoiceState::Listening;
                }
                None
            }
            VoiceEvent::ListenStopped => {
                self.listening = false;
                self.state = VoiceState::Idle;
                None
            }
            VoiceEvent::SpeechStarted => {
                self.state = VoiceState::Speaking;
                None
            }
            VoiceEvent::SpeechDone | VoiceEvent::SpeechError => {
                self.state = self.resting_state();
                None
            }
            VoiceEvent::ResultsReceived { transcript } => {
                if !self.listening {
                    return None;
                }
                if self.state == VoiceState::Idle {
                    self.state = VoiceState::Listening;
                }
                Some(transcript)
            }
        }
    }

    /// Stop listening without waiting for the platform to report it.
    pub fn stop_listening(&mut self) {
        self.listening = false;
        if self.state == VoiceState::Listening {
            self.state = VoiceState::Idle;
        }
    }

    fn resting_state(&self) -> VoiceState {
        if self.listening {
            VoiceState::Listening
        } else {
            VoiceState::Idle
        }
    }
}
