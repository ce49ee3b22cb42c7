//! callvox - Real-time voice conversation coordinator
//!
//! Runs one spoken call between a human and a remote dialogue service:
//! energy-based endpointing, turn correlation, single-owner playback with
//! barge-in, and per-turn latency measurement.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod service;
pub mod stt;

#[cfg(feature = "cli")]
pub mod app;
#[cfg(feature = "cli")]
pub mod cli;

// Collaborator seams
pub use audio::{AudioOutput, CaptureDevice, Clock};
pub use service::DialogueService;
pub use stt::SpeechRecognizer;

// Coordination
pub use conversation::{
    CallCoordinator, CallEvent, CallSnapshot, CallState, CallStatus, Collaborators, Conversation,
    ConversationHandle, CoordinatorConfig, Effect,
};

// Error handling
pub use error::{CallError, ErrorKind, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
