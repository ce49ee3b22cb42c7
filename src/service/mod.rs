//! Remote dialogue service: call start, per-turn replies and call end.

#[cfg(feature = "http")]
pub mod http;
pub mod scripted;

#[cfg(feature = "http")]
pub use http::HttpDialogueService;
pub use scripted::{ScriptedDialogueService, ScriptedReply, ServiceCall};

use crate::audio::AudioPayload;
use crate::conversation::Role;
use crate::error::{CallError, ErrorKind, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StartCallRequest {
    pub scenario: Option<String>,
    pub course_id: Option<String>,
    pub language: String,
}

/// Reply to a successful call start.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGreeting {
    pub call_id: String,
    pub greeting: String,
    pub greeting_audio: Option<AudioPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

/// Reply to one human turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub history: Vec<HistoryEntry>,
    pub reply_audio: Option<AudioPayload>,
}

impl TurnReply {
    /// Text of the last synthetic entry in the returned history.
    pub fn reply_text(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.role == Role::Synthetic)
            .map(|entry| entry.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallSummary {
    pub summary: String,
}

/// The remote speech and dialogue collaborator.
#[async_trait]
pub trait DialogueService: Send + Sync {
    async fn start_call(&self, request: &StartCallRequest) -> Result<SessionGreeting>;

    async fn send_turn(&self, call_id: &str, transcript: &str) -> Result<TurnReply>;

    async fn end_call(&self, call_id: &str, reason: &str) -> Result<CallSummary>;
}

/// Error body the service returns alongside a failure status.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
    pub code: Option<String>,
    #[serde(alias = "setup_required")]
    pub setup_required: Option<bool>,
}

impl ErrorBody {
    fn text(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// Maps a failed response onto a [`CallError`].
///
/// Configuration-required is decided from the body metadata only: a 403 or
/// 503 without `code`/`setupRequired` is an ordinary service failure.
pub fn classify_failure(status: u16, body: &str) -> CallError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .text()
        .map(str::to_string)
        .unwrap_or_else(|| match body.trim() {
            "" => format!("service returned status {}", status),
            text => text.to_string(),
        });

    if parsed.setup_required == Some(true) {
        return CallError::ConfigurationRequired { message };
    }

    match parsed.code.as_deref().map(ErrorKind::from_code) {
        Some(kind @ (ErrorKind::ConfigurationRequired | ErrorKind::Timeout | ErrorKind::Network)) => {
            CallError::from_kind(kind, message)
        }
        _ => CallError::Service { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_required_flag_routes_to_configuration() {
        let err = classify_failure(
            400,
            r#"{"error":"Voice not configured","setupRequired":true}"#,
        );
        assert!(err.is_configuration_required());
        assert_eq!(err.to_string(), "Voice service requires setup: Voice not configured");
    }

    #[test]
    fn test_snake_case_flag_is_accepted() {
        let err = classify_failure(500, r#"{"message":"missing key","setup_required":true}"#);
        assert!(err.is_configuration_required());
    }

    #[test]
    fn test_setup_code_routes_to_configuration() {
        let err = classify_failure(503, r#"{"error":"no provider","code":"SETUP_REQUIRED"}"#);
        assert!(err.is_configuration_required());
    }

    #[test]
    fn test_status_alone_never_means_setup() {
        for status in [401, 403, 404, 503] {
            let err = classify_failure(status, r#"{"error":"nope"}"#);
            assert!(!err.is_configuration_required(), "status {}", status);
        }
    }

    #[test]
    fn test_non_json_body_keeps_text() {
        match classify_failure(502, "Bad Gateway") {
            CallError::Service { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(classify_failure(502, "").kind(), ErrorKind::Network);
    }

    #[test]
    fn test_timeout_code_maps_to_timeout() {
        let err = classify_failure(500, r#"{"error":"upstream slow","code":"timeout"}"#);
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_reply_text_is_last_synthetic_entry() {
        let reply = TurnReply {
            history: vec![
                HistoryEntry {
                    role: Role::Synthetic,
                    content: "Hello, how can I help?".to_string(),
                },
                HistoryEntry {
                    role: Role::Human,
                    content: "My order is late".to_string(),
                },
                HistoryEntry {
                    role: Role::Synthetic,
                    content: "Sorry to hear that.".to_string(),
                },
            ],
            reply_audio: None,
        };
        assert_eq!(reply.reply_text(), Some("Sorry to hear that."));

        let empty = TurnReply {
            history: vec![],
            reply_audio: None,
        };
        assert_eq!(empty.reply_text(), None);
    }
}
