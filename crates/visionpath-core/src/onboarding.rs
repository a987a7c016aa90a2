//! Wake-phrase onboarding before blind mode starts.
//!
//! The session greets the user, waits for "hey metro" / "start metro", and
//! repeats its prompts when nobody has spoken for a while. Timestamps are
//! passed in so the checks are deterministic.

use std::time::{Duration, Instant};

use crate::command::VoiceCommand;
use crate::types::{utterance, RelayConfig, SpeechRequest};

/// Result of handling one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnboardingStep {
    pub speech: Option<SpeechRequest>,
    pub blind_mode_started: bool,
}

#[derive(Debug, Clone)]
pub struct Onboarding {
    first_activation: bool,
    instructions_given: bool,
    listening: bool,
    last_interaction: Instant,
    last_voice_input: Instant,
    idle_timeout: Duration,
    welcome: String,
    instructions: String,
    prompt: String,
    starting: String,
}

impl Onboarding {
    pub fn new(config: &RelayConfig, now: Instant) -> Self {
        Self {
            first_activation: true,
            instructions_given: false,
            listening: true,
            last_interaction: now,
            last_voice_input: now,
            idle_timeout: config.idle_timeout(),
            welcome: config.welcome_message.clone(),
            instructions: config.instructions_message.clone(),
            prompt: config.prompt_message.clone(),
            starting: config.starting_message.clone(),
        }
    }

    /// Still waiting for the wake phrase.
    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn greeting(&self) -> SpeechRequest {
        SpeechRequest::flush(self.welcome.clone(), utterance::INITIAL_GREETING)
    }

    /// The recognizer became ready. Only postpones the prompt; the welcome
    /// repeat waits on actual voice input.
    pub fn record_ready(&mut self, now: Instant) {
        self.last_interaction = now;
    }

    /// Voice input arrived.
    pub fn record_interaction(&mut self, now: Instant) {
        self.last_interaction = now;
        self.last_voice_input = now;
    }

    pub fn handle(&mut self, command: &VoiceCommand, now: Instant) -> OnboardingStep {
        self.record_interaction(now);
        if !self.listening {
            return OnboardingStep::default();
        }

        match command {
            VoiceCommand::HeyMetro if self.first_activation => {
                self.first_activation = false;
                self.instructions_given = true;
                OnboardingStep {
                    speech: Some(SpeechRequest::flush(
                        self.instructions.clone(),
                        utterance::INSTRUCTIONS,
                    )),
                    blind_mode_started: false,
                }
            }
            VoiceCommand::HeyMetro if self.instructions_given => self.start_blind_mode(),
            VoiceCommand::StartMetro => self.start_blind_mode(),
            _ => OnboardingStep::default(),
        }
    }

    /// Leave onboarding, e.g. after a double tap on the screen.
    pub fn start_blind_mode(&mut self) -> OnboardingStep {
        self.listening = false;
        OnboardingStep {
            speech: Some(SpeechRequest::flush(
                self.starting.clone(),
                utterance::START_BLIND_MODE,
            )),
            blind_mode_started: true,
        }
    }

    /// Prompt-check timer fired.
    pub fn check_prompt(&mut self, now: Instant) -> Option<SpeechRequest> {
        if !self.listening || now.saturating_duration_since(self.last_interaction) <= self.idle_timeout
        {
            return None;
        }
        self.last_interaction = now;
        Some(SpeechRequest::flush(self.prompt.clone(), utterance::TIMEOUT_RESTART))
    }

    /// Welcome-check timer fired.
    pub fn check_welcome(&mut self, now: Instant, speaking: bool) -> Option<SpeechRequest> {
        if !self.listening
            || speaking
            || now.saturating_duration_since(self.last_voice_input) <= self.idle_timeout
        {
            return None;
        }
        self.last_voice_input = now;
        Some(SpeechRequest::flush(self.welcome.clone(), utterance::TIMEOUT_RESTART))
    }
}
