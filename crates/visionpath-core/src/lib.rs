//! visionpath-core — Pure types, text processing and relay state machines.
//!
//! No async runtime, no I/O, no platform dependencies. Every timer-driven
//! behaviour is exposed as a method the engine calls when its timer fires.

pub mod command;
pub mod dedup;
pub mod hazard;
pub mod onboarding;
pub mod pacer;
pub mod relay;
pub mod text_prep;
pub mod types;
pub mod voice;
