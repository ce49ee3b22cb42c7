//! In-process dialogue service that replays a script.
//!
//! Used by tests and by `callvox simulate`.

use super::{
    CallSummary, DialogueService, HistoryEntry, SessionGreeting, StartCallRequest, TurnReply,
};
use crate::audio::AudioPayload;
use crate::conversation::Role;
use crate::error::{CallError, ErrorKind, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// One scripted reply to a human turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedReply {
    pub text: String,
    pub audio: Option<AudioPayload>,
    pub delay: Duration,
    pub failure: Option<(ErrorKind, String)>,
}

impl ScriptedReply {
    /// A spoken reply with a small synthetic audio clip.
    pub fn spoken(text: &str) -> Self {
        Self {
            text: text.to_string(),
            audio: Some(AudioPayload::new(text.as_bytes().to_vec())),
            delay: Duration::ZERO,
            failure: None,
        }
    }

    /// A reply with no audio; the text is still appended to the transcript.
    pub fn silent(text: &str) -> Self {
        Self {
            audio: None,
            ..Self::spoken(text)
        }
    }

    pub fn failing(kind: ErrorKind, message: &str) -> Self {
        Self {
            failure: Some((kind, message.to_string())),
            ..Self::silent("")
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Calls observed by the scripted service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceCall {
    Start(StartCallRequest),
    Turn { call_id: String, transcript: String },
    End { call_id: String, reason: String },
}

#[derive(Debug, Default)]
struct ScriptState {
    replies: VecDeque<ScriptedReply>,
    history: Vec<HistoryEntry>,
    calls: Vec<ServiceCall>,
    next_call: u64,
}

#[derive(Debug, Clone)]
pub struct ScriptedDialogueService {
    state: Arc<Mutex<ScriptState>>,
    greeting: String,
    greeting_audio: Option<AudioPayload>,
    start_failure: Option<(ErrorKind, String)>,
    start_delay: Duration,
}

impl ScriptedDialogueService {
    pub fn new(greeting: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
            greeting: greeting.to_string(),
            greeting_audio: Some(AudioPayload::new(greeting.as_bytes().to_vec())),
            start_failure: None,
            start_delay: Duration::ZERO,
        }
    }

    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.lock().replies.push_back(reply);
        self
    }

    pub fn without_greeting_audio(mut self) -> Self {
        self.greeting_audio = None;
        self
    }

    /// Configure the mock to fail on call start
    pub fn with_start_failure(mut self, kind: ErrorKind, message: &str) -> Self {
        self.start_failure = Some((kind, message.to_string()));
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.lock().replies.push_back(reply);
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.lock().calls.clone()
    }

    pub fn turn_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ServiceCall::Turn { .. }))
            .count()
    }

    pub fn end_reasons(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                ServiceCall::End { reason, .. } => Some(reason.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DialogueService for ScriptedDialogueService {
    async fn start_call(&self, request: &StartCallRequest) -> Result<SessionGreeting> {
        let call_id = {
            let mut state = self.lock();
            state.calls.push(ServiceCall::Start(request.clone()));
            state.next_call += 1;
            format!("scripted-{}", state.next_call)
        };

        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if let Some((kind, message)) = &self.start_failure {
            return Err(CallError::from_kind(*kind, message.clone()));
        }

        let mut state = self.lock();
        state.history = vec![HistoryEntry {
            role: Role::Synthetic,
            content: self.greeting.clone(),
        }];
        Ok(SessionGreeting {
            call_id,
            greeting: self.greeting.clone(),
            greeting_audio: self.greeting_audio.clone(),
        })
    }

    async fn send_turn(&self, call_id: &str, transcript: &str) -> Result<TurnReply> {
        let reply = {
            let mut state = self.lock();
            state.calls.push(ServiceCall::Turn {
                call_id: call_id.to_string(),
                transcript: transcript.to_string(),
            });
            state
                .replies
                .pop_front()
                .unwrap_or_else(|| ScriptedReply::spoken(&format!("You said: {}", transcript)))
        };

        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        if let Some((kind, message)) = reply.failure {
            return Err(CallError::from_kind(kind, message));
        }

        let mut state = self.lock();
        state.history.push(HistoryEntry {
            role: Role::Human,
            content: transcript.to_string(),
        });
        state.history.push(HistoryEntry {
            role: Role::Synthetic,
            content: reply.text,
        });
        Ok(TurnReply {
            history: state.history.clone(),
            reply_audio: reply.audio,
        })
    }

    async fn end_call(&self, call_id: &str, reason: &str) -> Result<CallSummary> {
        let mut state = self.lock();
        state.calls.push(ServiceCall::End {
            call_id: call_id.to_string(),
            reason: reason.to_string(),
        });
        let turns = state
            .history
            .iter()
            .filter(|entry| entry.role == Role::Human)
            .count();
        Ok(CallSummary {
            summary: format!("{} human turn(s), ended: {}", turns, reason),
        })
    }
}
