//! Error types for callvox.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a failure, used to route it and to pick the
/// message shown to the human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    PermissionDenied,
    DeviceNotFound,
    DeviceBusy,
    Network,
    Timeout,
    InsecureContext,
    UnsupportedEnvironment,
    ConfigurationRequired,
    Unknown,
}

impl ErrorKind {
    /// Stable identifier, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::DeviceNotFound => "device-not-found",
            ErrorKind::DeviceBusy => "device-busy",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InsecureContext => "insecure-context",
            ErrorKind::UnsupportedEnvironment => "unsupported-environment",
            ErrorKind::ConfigurationRequired => "configuration-required",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Maps error codes reported by capture and recognition facilities.
    ///
    /// Accepts both our own identifiers and the codes browsers and speech
    /// engines commonly report (`not-allowed`, `audio-capture`, ...).
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "permission-denied" | "not-allowed" | "notallowederror" | "service-not-allowed" => {
                ErrorKind::PermissionDenied
            }
            "device-not-found" | "audio-capture" | "notfounderror" => ErrorKind::DeviceNotFound,
            "device-busy" | "notreadableerror" | "trackstarterror" => ErrorKind::DeviceBusy,
            "network" | "connection" => ErrorKind::Network,
            "timeout" => ErrorKind::Timeout,
            "insecure-context" | "securityerror" => ErrorKind::InsecureContext,
            "unsupported-environment" | "unsupported" | "language-not-supported" => {
                ErrorKind::UnsupportedEnvironment
            }
            "configuration-required" | "setup-required" | "not-configured" => {
                ErrorKind::ConfigurationRequired
            }
            _ => ErrorKind::Unknown,
        }
    }

    /// Message shown to the human in the transient error banner.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::PermissionDenied => {
                "Microphone access was denied. Allow microphone access and start the call again."
            }
            ErrorKind::DeviceNotFound => "No microphone was found. Connect one and try again.",
            ErrorKind::DeviceBusy => {
                "The microphone is in use by another application. Close it and try again."
            }
            ErrorKind::Network => "Connection problem. Check your network and try again.",
            ErrorKind::Timeout => "The voice service took too long to respond. Please try again.",
            ErrorKind::InsecureContext => "Voice calls require a secure (HTTPS) connection.",
            ErrorKind::UnsupportedEnvironment => "Voice calls are not supported in this environment.",
            ErrorKind::ConfigurationRequired => {
                "Voice calls are not set up yet. Ask an administrator to configure the voice service."
            }
            ErrorKind::Unknown => "Something went wrong. Please try again.",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum CallError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Capture and playback facility errors
    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Audio device busy: {message}")]
    DeviceBusy { message: String },

    #[error("Audio capture failed: {message}")]
    Capture { message: String },

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    #[error("Invalid audio payload: {message}")]
    InvalidAudio { message: String },

    #[error("Speech recognition failed ({kind}): {message}")]
    Recognition { kind: ErrorKind, message: String },

    // Environment errors
    #[error("Secure context required: {message}")]
    InsecureContext { message: String },

    #[error("Unsupported environment: {message}")]
    UnsupportedEnvironment { message: String },

    // Remote service errors
    #[error("Connection failed: {message}")]
    Network { message: String },

    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("Voice service requires setup: {message}")]
    ConfigurationRequired { message: String },

    #[error("Voice service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("Invalid service payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CallError {
    /// Builds the canonical error for a classified failure.
    pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        match kind {
            ErrorKind::PermissionDenied => CallError::PermissionDenied { message },
            ErrorKind::DeviceNotFound => CallError::DeviceNotFound { device: message },
            ErrorKind::DeviceBusy => CallError::DeviceBusy { message },
            ErrorKind::Network => CallError::Network { message },
            ErrorKind::Timeout => CallError::Timeout { message },
            ErrorKind::InsecureContext => CallError::InsecureContext { message },
            ErrorKind::UnsupportedEnvironment => CallError::UnsupportedEnvironment { message },
            ErrorKind::ConfigurationRequired => CallError::ConfigurationRequired { message },
            ErrorKind::Unknown => CallError::Other(message),
        }
    }

    /// Classifies this error onto the routing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            CallError::DeviceNotFound { .. } => ErrorKind::DeviceNotFound,
            CallError::DeviceBusy { .. } => ErrorKind::DeviceBusy,
            CallError::Recognition { kind, .. } => *kind,
            CallError::InsecureContext { .. } => ErrorKind::InsecureContext,
            CallError::UnsupportedEnvironment { .. } => ErrorKind::UnsupportedEnvironment,
            CallError::Network { .. } => ErrorKind::Network,
            CallError::Timeout { .. } => ErrorKind::Timeout,
            CallError::ConfigurationRequired { .. } => ErrorKind::ConfigurationRequired,
            CallError::Service { status, .. } => match status {
                408 | 504 => ErrorKind::Timeout,
                502 | 503 => ErrorKind::Network,
                _ => ErrorKind::Unknown,
            },
            #[cfg(feature = "http")]
            CallError::Http(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_connect() || e.is_request() {
                    ErrorKind::Network
                } else {
                    ErrorKind::Unknown
                }
            }
            CallError::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut => ErrorKind::Timeout,
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected => ErrorKind::Network,
                _ => ErrorKind::Unknown,
            },
            _ => ErrorKind::Unknown,
        }
    }

    /// True when the failure means the remote collaborator is not provisioned.
    pub fn is_configuration_required(&self) -> bool {
        self.kind() == ErrorKind::ConfigurationRequired
    }

    /// Message shown to the human for this error.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
