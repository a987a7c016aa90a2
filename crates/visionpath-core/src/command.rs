//! Voice command recognition.
//!
//! Recognizers return free-form transcripts ("hey metro can you hear me"), so
//! commands are matched as case-insensitive phrases anywhere in the text.

use crate::types::Mode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Wake phrase. First use plays the instructions.
    HeyMetro,
    /// Start blind mode straight away.
    StartMetro,
    SwitchMode(Mode),
    Narrate,
    /// Anything else; forwarded to the assistant in assistant mode.
    Utterance(String),
}

const MODE_PHRASES: [(&str, Mode); 3] = [
    ("navigation mode", Mode::Navigation),
    ("assistant mode", Mode::Assistant),
    ("reading mode", Mode::Reading),
];

const NARRATE_PHRASES: [&str; 2] = ["read this", "narrate"];

pub fn parse_command(transcript: &str) -> Option<VoiceCommand> {
    let text = transcript.trim();
    if text.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();

    if lower.contains("hey metro") {
        return Some(VoiceCommand::HeyMetro);
    }
    if lower.contains("start metro") {
        return Some(VoiceCommand::StartMetro);
    }
    if let Some((_, mode)) = MODE_PHRASES.iter().find(|(p, _)| lower.contains(p)) {
        return Some(VoiceCommand::SwitchMode(*mode));
    }
    if NARRATE_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some(VoiceCommand::Narrate);
    }
    Some(VoiceCommand::Utterance(text.to_string()))
}
