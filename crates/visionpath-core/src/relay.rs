//! Mode relay — decides what, if anything, is spoken when a mode's text or
//! the active mode changes.
//!
//! Only navigation speaks on its own, and only the part of the navigation
//! text past the watermark. Assistant and reading responses are shown, not
//! spoken, until narration is requested explicitly.

use crate::text_prep::{normalize, unspoken_suffix};
use crate::types::{utterance, Mode, Responses, SpeechRequest};

/// Route the current responses to speech.
///
/// `last_spoken_index` is the character offset up to which the navigation
/// text has already been narrated.
pub fn route(mode: Mode, responses: &Responses, last_spoken_index: usize) -> Option<SpeechRequest> {
    match mode {
        Mode::Navigation => {
            let text = normalize(unspoken_suffix(&responses.navigation, last_spoken_index));
            if text.is_empty() {
                return None;
            }
            Some(SpeechRequest::add(text, utterance::NAVIGATION))
        }
        Mode::Assistant | Mode::Reading => None,
    }
}

/// Explicit narration of whatever the active mode currently shows.
pub fn narrate(mode: Mode, responses: &Responses) -> Option<SpeechRequest> {
    let text = normalize(responses.get(mode));
    if text.is_empty() {
        return None;
    }
    Some(SpeechRequest::flush(text, utterance::NARRATION))
}
