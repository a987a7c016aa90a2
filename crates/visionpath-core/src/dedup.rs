//! Suppression of immediately repeated utterances.

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Dispatch,
    Suppress,
}

/// Dispatch `candidate` only if it is non-empty and differs from `last`.
///
/// The caller owns `last` and overwrites it only after a dispatch.
pub fn decide(candidate: &str, last: &str) -> Decision {
    if candidate.is_empty() || candidate == last {
        Decision::Suppress
    } else {
        Decision::Dispatch
    }
}
