//! Text preparation for speech — normalization and sentence segmentation.
//!
//! Pure functions, no I/O. Model output arrives with irregular spacing and
//! stray punctuation ("Car ahead..  Stop ."), so everything that gets spoken
//! goes through [`normalize`] first.

use regex::Regex;
use std::sync::LazyLock;

// Compiled regexes — allocated once, reused across calls.
static RE_PERIOD_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").unwrap());
static RE_SPACE_BEFORE_PERIOD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\.").unwrap());
static RE_MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").unwrap());

/// Clean up text so it reads naturally when spoken.
///
/// Applied in order: runs of periods collapse to one, whitespace before a
/// period is removed, runs of whitespace collapse to one space, and the
/// result is trimmed.
pub fn normalize(text: &str) -> String {
    let c = RE_PERIOD_RUN.replace_all(text, ".");
    let c = RE_SPACE_BEFORE_PERIOD.replace_all(&c, ".");
    let c = RE_MULTI_SPACE.replace_all(&c, " ");
    c.trim().to_string()
}

/// Split text into sentences on periods.
///
/// Returns trimmed, non-empty fragments in source order, without the
/// terminating period. Text with no periods yields a single element unless it
/// is blank, in which case the result is empty.
pub fn segment(text: &str) -> Vec<String> {
    normalize(text)
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The part of `text` starting at character offset `watermark`.
///
/// Offsets count `char`s, not bytes. An offset at or past the end yields an
/// empty string.
pub fn unspoken_suffix(text: &str, watermark: usize) -> &str {
    match text.char_indices().nth(watermark) {
        Some((byte, _)) => &text[byte..],
        None => "",
    }
}

/// Length of `text` in the units [`unspoken_suffix`] uses.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
