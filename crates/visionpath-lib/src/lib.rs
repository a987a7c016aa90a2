//! visionpath-lib — Response relay engine.
//!
//! Session actor, connectivity polling, speech dispatch, Gemini streaming,
//! configuration, and HTTP API. Depends on visionpath-core for pure types and
//! state machines.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod generation;
pub mod pipeline;
pub mod server;
pub mod session;
pub mod speech;

pub use error::{Error, GenerationError, Result};

// Re-export visionpath-core for convenience
pub use visionpath_core;
