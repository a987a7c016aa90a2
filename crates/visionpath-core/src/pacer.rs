//! Playback pacer — walks the sentences of a response on a timer.
//!
//! Two inputs drive it:
//!
//! ```text
//! on_tick(online)          every advance interval → next sentence, Flush
//! on_response_changed(s)   whenever the text changes → sentence at cursor, Add
//! ```
//!
//! A tick interrupts whatever is playing because it marks deliberate
//! progression. New text is appended so an utterance in progress is not cut
//! off. Both paths go through [`decide`] against the last dispatched text.
//!
//! While offline no sentence is dispatched; instead a single connectivity
//! warning is produced per offline period.

use crate::dedup::{decide, Decision};
use crate::text_prep::{normalize, segment};
use crate::types::{utterance, SpeechMode, SpeechRequest};

#[derive(Debug, Clone)]
pub struct PlaybackPacer {
    sentences: Vec<String>,
    /// Always `< sentences.len()` when `sentences` is non-empty.
    cursor: usize,
    last_utterance: String,
    offline_warned: bool,
    offline_message: String,
}

impl PlaybackPacer {
    pub fn new(offline_message: impl Into<String>) -> Self {
        Self {
            sentences: Vec::new(),
            cursor: 0,
            last_utterance: String::new(),
            offline_warned: false,
            offline_message: offline_message.into(),
        }
    }

    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_utterance(&self) -> &str {
        &self.last_utterance
    }

    /// Move the cursor, wrapping modulo the sentence count.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = match self.sentences.len() {
            0 => 0,
            len => cursor % len,
        };
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = 0;
    }

    /// Re-derive sentences without speaking. The cursor wraps into the new
    /// range.
    pub fn set_text(&mut self, text: &str) {
        self.sentences = segment(text);
        let cursor = self.cursor;
        self.set_cursor(cursor);
    }

    /// Re-derive sentences from new source text and speak the one under the
    /// cursor. The cursor is kept, wrapped into the new range.
    pub fn on_response_changed(&mut self, text: &str) -> Option<SpeechRequest> {
        self.set_text(text);
        if self.sentences.is_empty() {
            return None;
        }
        let candidate = normalize(&self.sentences[self.cursor]);
        self.dispatch(candidate, SpeechMode::Add, utterance::NEW_RESPONSE)
    }

    /// Auto-advance timer fired.
    pub fn on_tick(&mut self, online: bool) -> Option<SpeechRequest> {
        if !online {
            return self.on_connectivity(false);
        }
        self.offline_warned = false;
        if self.sentences.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.sentences.len();
        let candidate = normalize(&self.sentences[self.cursor]);
        self.dispatch(candidate, SpeechMode::Flush, utterance::SENTENCE)
    }

    /// Connectivity was observed. Returns the warning the first time an
    /// offline period is seen; coming back online re-arms it.
    pub fn on_connectivity(&mut self, online: bool) -> Option<SpeechRequest> {
        if online {
            self.offline_warned = false;
            return None;
        }
        if self.offline_warned {
            return None;
        }
        self.offline_warned = true;
        self.last_utterance = self.offline_message.clone();
        Some(SpeechRequest::flush(self.offline_message.clone(), utterance::OFFLINE))
    }

    fn dispatch(
        &mut self,
        candidate: String,
        mode: SpeechMode,
        id: &str,
    ) -> Option<SpeechRequest> {
        match decide(&candidate, &self.last_utterance) {
            Decision::Dispatch => {
                self.last_utterance.clone_from(&candidate);
                Some(SpeechRequest {
                    text: candidate,
                    mode,
                    utterance_id: id.to_string(),
                })
            }
            Decision::Suppress => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFLINE: &str = "You are not connected to the internet";

    fn pacer_with(text: &str) -> PlaybackPacer {
        let mut p = PlaybackPacer::new(OFFLINE);
        p.on_response_changed(text);
        p
    }

    #[test]
    fn new_response_speaks_sentence_at_cursor_with_add() {
        let mut p = PlaybackPacer::new(OFFLINE);
        let req = p.on_response_changed("Stop now. Turn left.").unwrap();
        assert_eq!(req.text, "Stop now");
        assert_eq!(req.mode, SpeechMode::Add);
        assert_eq!(p.last_utterance(), "Stop now");
        assert_eq!(p.cursor(), 0);
    }

    #[test]
    fn tick_advances_and_flushes() {
        let mut p = pacer_with("A. B. C.");
        let req = p.on_tick(true).unwrap();
        assert_eq!(req.text, "B");
        assert_eq!(req.mode, SpeechMode::Flush);
        assert_eq!(p.cursor(), 1);
        assert_eq!(p.on_tick(true).unwrap().text, "C");
        assert_eq!(p.on_tick(true).unwrap().text, "A");
        assert_eq!(p.cursor(), 0);
    }

    #[test]
    fn cursor_wraps_modulo_length() {
        for n in 1..=5usize {
            let text: String = (0..n).map(|i| format!("S{i}. ")).collect();
            for c0 in 0..n {
                for k in 0..=12usize {
                    let mut p = pacer_with(&text);
                    p.set_cursor(c0);
                    for _ in 0..k {
                        p.on_tick(true);
                    }
                    assert_eq!(p.cursor(), (c0 + k) % n, "n={n} c0={c0} k={k}");
                }
            }
        }
    }

    #[test]
    fn single_sentence_tick_is_suppressed() {
        let mut p = pacer_with("Only one.");
        assert!(p.on_tick(true).is_none());
        assert_eq!(p.cursor(), 0);
    }

    #[test]
    fn new_response_with_same_sentence_under_cursor_is_suppressed() {
        let mut p = pacer_with("A. B.");
        p.on_tick(true); // cursor 1, last "B"
        assert_eq!(p.last_utterance(), "B");

        assert!(p.on_response_changed("A. B. C.").is_none());
        assert_eq!(p.sentences(), ["A", "B", "C"]);
        assert_eq!(p.cursor(), 1);
    }

    #[test]
    fn shorter_response_wraps_cursor() {
        let mut p = pacer_with("A. B. C.");
        p.set_cursor(2);
        let req = p.on_response_changed("X. Y.").unwrap();
        assert_eq!(p.cursor(), 0);
        assert_eq!(req.text, "X");
    }

    #[test]
    fn empty_response_does_nothing() {
        let mut p = PlaybackPacer::new(OFFLINE);
        assert!(p.on_response_changed("   ").is_none());
        assert!(p.on_tick(true).is_none());
        assert!(p.sentences().is_empty());
    }

    #[test]
    fn offline_tick_warns_once_per_period() {
        let mut p = pacer_with("A. B. C.");
        let warn = p.on_tick(false).unwrap();
        assert_eq!(warn.text, OFFLINE);
        assert_eq!(warn.mode, SpeechMode::Flush);
        assert!(p.on_tick(false).is_none());
        assert!(p.on_tick(false).is_none());
        assert_eq!(p.cursor(), 0);

        // back online: pacing resumes, then a new offline period warns again
        assert_eq!(p.on_tick(true).unwrap().text, "B");
        assert!(p.on_tick(false).is_some());
        assert!(p.on_tick(false).is_none());
    }

    #[test]
    fn connectivity_change_and_tick_share_the_warning() {
        let mut p = pacer_with("A. B.");
        assert!(p.on_connectivity(false).is_some());
        assert!(p.on_tick(false).is_none());
        assert!(p.on_connectivity(true).is_none());
        assert!(p.on_connectivity(false).is_some());
    }

    #[test]
    fn set_text_is_silent() {
        let mut p = pacer_with("A. B. C.");
        p.set_cursor(2);
        p.set_text("X. Y.");
        assert_eq!(p.sentences(), ["X", "Y"]);
        assert_eq!(p.cursor(), 0);
        assert_eq!(p.last_utterance(), "A");
    }

    #[test]
    fn sentence_after_warning_is_spoken_again() {
        let mut p = pacer_with("A.");
        p.on_connectivity(false);
        let req = p.on_response_changed("A.").unwrap();
        assert_eq!(req.text, "A");
    }
}
