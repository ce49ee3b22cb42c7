//! HTTP client for the remote dialogue service.
//!
//! Endpoints, all `POST` with JSON bodies:
//! - `{base}/calls` starts a call
//! - `{base}/calls/{id}/turns` sends one human turn
//! - `{base}/calls/{id}/end` ends the call

use super::{
    CallSummary, DialogueService, HistoryEntry, SessionGreeting, StartCallRequest, TurnReply,
    classify_failure,
};
use crate::audio::AudioPayload;
use crate::config::ServiceSection;
use crate::error::{CallError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartCallBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    scenario: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    course_id: Option<&'a str>,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartCallResponse {
    call_id: String,
    #[serde(default)]
    greeting: String,
    #[serde(default)]
    greeting_audio: Option<String>,
}

#[derive(Debug, Serialize)]
struct TurnBody<'a> {
    transcript: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurnResponse {
    #[serde(default)]
    conversation_history: Vec<HistoryEntry>,
    #[serde(default)]
    reply_audio: Option<String>,
}

#[derive(Debug, Serialize)]
struct EndBody<'a> {
    reason: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct EndResponse {
    #[serde(default)]
    summary: String,
}

pub struct HttpDialogueService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpDialogueService {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
        }
    }

    pub fn from_config(service: &ServiceSection) -> Self {
        let mut client = Self::new(&service.base_url);
        client.api_key = service.api_key.clone();
        client
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        let invalid = |message: String| CallError::ConfigInvalidValue {
            key: "service.base_url".to_string(),
            message,
        };
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T> {
        let url = self.url(segments)?;
        debug!("POST {}", url);

        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text));
        }

        let value: serde_json::Value = serde_json::from_str(&text)?;
        if reports_failure(&value) {
            return Err(classify_failure(status.as_u16(), &text));
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Some deployments answer 200 with an error body.
fn reports_failure(value: &serde_json::Value) -> bool {
    let flag = |key: &str| value.get(key).and_then(|v| v.as_bool());
    flag("setupRequired") == Some(true)
        || flag("setup_required") == Some(true)
        || flag("success") == Some(false)
        || value.get("error").is_some_and(|e| !e.is_null())
}

fn decode_audio(encoded: Option<String>) -> Result<Option<AudioPayload>> {
    match encoded.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => AudioPayload::from_base64(text).map(Some),
    }
}

impl StartCallResponse {
    fn into_greeting(self) -> Result<SessionGreeting> {
        Ok(SessionGreeting {
            call_id: self.call_id,
            greeting: self.greeting,
            greeting_audio: decode_audio(self.greeting_audio)?,
        })
    }
}

impl TurnResponse {
    fn into_reply(self) -> Result<TurnReply> {
        Ok(TurnReply {
            history: self.conversation_history,
            reply_audio: decode_audio(self.reply_audio)?,
        })
    }
}

#[async_trait]
impl DialogueService for HttpDialogueService {
    async fn start_call(&self, request: &StartCallRequest) -> Result<SessionGreeting> {
        let body = StartCallBody {
            scenario: request.scenario.as_deref(),
            course_id: request.course_id.as_deref(),
            language: &request.language,
        };
        let response: StartCallResponse = self.post(&["calls"], &body).await?;
        response.into_greeting()
    }

    async fn send_turn(&self, call_id: &str, transcript: &str) -> Result<TurnReply> {
        let response: TurnResponse = self
            .post(&["calls", call_id, "turns"], &TurnBody { transcript })
            .await?;
        response.into_reply()
    }

    async fn end_call(&self, call_id: &str, reason: &str) -> Result<CallSummary> {
        let response: EndResponse = self
            .post(&["calls", call_id, "end"], &EndBody { reason })
            .await?;
        Ok(CallSummary {
            summary: response.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;

    #[test]
    fn test_url_joins_without_double_slash() {
        let service = HttpDialogueService::new("https://voice.example.com/api/");
        assert_eq!(
            service.url(&["calls", "abc", "turns"]).unwrap().as_str(),
            "https://voice.example.com/api/calls/abc/turns"
        );
        let bare = HttpDialogueService::new("https://voice.example.com");
        assert_eq!(
            bare.url(&["calls"]).unwrap().as_str(),
            "https://voice.example.com/calls"
        );
    }

    #[test]
    fn test_call_id_cannot_change_the_route() {
        let service = HttpDialogueService::new("https://voice.example.com/api");
        let url = service.url(&["calls", "../admin?x=1#y", "end"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://voice.example.com/api/calls/..%2Fadmin%3Fx=1%23y/end"
        );
        assert_eq!(url.query(), None);
    }

    #[test]
    fn test_invalid_base_url_is_a_config_error() {
        let service = HttpDialogueService::new("not a url");
        assert!(matches!(
            service.url(&["calls"]),
            Err(CallError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_from_config_carries_api_key() {
        let section = ServiceSection {
            api_key: Some("k".to_string()),
            ..ServiceSection::default()
        };
        let service = HttpDialogueService::from_config(&section);
        assert_eq!(service.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_start_body_is_camel_case_and_skips_missing() {
        let body = StartCallBody {
            scenario: None,
            course_id: Some("course-9"),
            language: "en-US",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"courseId": "course-9", "language": "en-US"})
        );
    }

    #[test]
    fn test_start_response_decodes_greeting_audio() {
        let response: StartCallResponse = serde_json::from_str(
            r#"{"callId":"c-1","greeting":"Hi there","greetingAudio":"data:audio/mpeg;base64,AQID"}"#,
        )
        .unwrap();
        let greeting = response.into_greeting().unwrap();
        assert_eq!(greeting.call_id, "c-1");
        assert_eq!(greeting.greeting, "Hi there");
        assert_eq!(greeting.greeting_audio.unwrap().as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_turn_response_without_audio() {
        let response: TurnResponse = serde_json::from_str(
            r#"{"conversationHistory":[{"role":"user","content":"hi"},{"role":"assistant","content":"hello"}]}"#,
        )
        .unwrap();
        let reply = response.into_reply().unwrap();
        assert_eq!(reply.history.len(), 2);
        assert_eq!(reply.history[0].role, Role::Human);
        assert_eq!(reply.reply_text(), Some("hello"));
        assert!(reply.reply_audio.is_none());
    }

    #[test]
    fn test_corrupt_reply_audio_is_an_error() {
        let response = TurnResponse {
            conversation_history: vec![],
            reply_audio: Some("%%%".to_string()),
        };
        assert!(matches!(
            response.into_reply(),
            Err(CallError::InvalidAudio { .. })
        ));
    }

    #[test]
    fn test_reports_failure_on_success_status() {
        assert!(reports_failure(
            &serde_json::json!({"setupRequired": true, "error": "no key"})
        ));
        assert!(reports_failure(&serde_json::json!({"success": false})));
        assert!(!reports_failure(
            &serde_json::json!({"callId": "c", "error": null})
        ));
    }
}
