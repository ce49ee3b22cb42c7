//! Call session data: transcript entries and per-turn records.

use super::correlator::TurnToken;
use super::latency::{LatencyMarks, LatencyRecord};
use crate::audio::PlaybackId;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Speaker of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    Human,
    #[serde(rename = "assistant")]
    Synthetic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    pub at: Instant,
    /// The turn that produced this entry; `None` for greetings and
    /// locally authored prompts.
    pub token: Option<TurnToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// Waiting for the remote reply.
    Pending,
    /// Reply audio is playing.
    Playing,
    Completed,
    /// A newer turn started before this one finished.
    Superseded,
    /// The human barged in over the reply.
    Interrupted,
    /// The remote reply failed.
    Failed,
    /// The call ended while the turn was open.
    Cancelled,
}

impl TurnStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStatus::Pending | TurnStatus::Playing)
    }
}

/// One request/response cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub token: TurnToken,
    pub transcript: String,
    pub sent_at: Option<Instant>,
    pub status: TurnStatus,
    pub reply_text: Option<String>,
    pub reply_playback: Option<PlaybackId>,
    pub marks: LatencyMarks,
    pub latency: Option<LatencyRecord>,
}

impl Turn {
    pub fn new(token: TurnToken, transcript: String, marks: LatencyMarks) -> Self {
        Self {
            token,
            transcript,
            sent_at: None,
            status: TurnStatus::Pending,
            reply_text: None,
            reply_playback: None,
            marks,
            latency: None,
        }
    }

    /// Moves an open turn to `status`; terminal turns are left alone.
    pub fn close(&mut self, status: TurnStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }
}

/// One conversation, from call start to call end.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallSession {
    /// Assigned by the remote service once the session exists.
    pub call_id: Option<String>,
    pub language: String,
    pub transcript: Vec<TranscriptEntry>,
    pub turns: Vec<Turn>,
}

impl CallSession {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..Self::default()
        }
    }

    pub fn push_entry(&mut self, role: Role, content: &str, at: Instant, token: Option<TurnToken>) {
        self.transcript.push(TranscriptEntry {
            role,
            content: content.to_string(),
            at,
            token,
        });
    }

    pub fn turn(&self, token: TurnToken) -> Option<&Turn> {
        self.turns.iter().rev().find(|t| t.token == token)
    }

    pub fn turn_mut(&mut self, token: TurnToken) -> Option<&mut Turn> {
        self.turns.iter_mut().rev().find(|t| t.token == token)
    }

    /// Closes every open turn with `status`.
    pub fn close_open_turns(&mut self, status: TurnStatus) {
        for turn in &mut self.turns {
            turn.close(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::correlator::TurnCounter;

    #[test]
    fn test_role_wire_names() {
        assert_eq!(serde_json::to_string(&Role::Human).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"assistant\"").unwrap(),
            Role::Synthetic
        );
    }

    #[test]
    fn test_close_does_not_reopen_terminal_turns() {
        let counter = TurnCounter::new();
        let mut turn = Turn::new(counter.next(), "hi".to_string(), LatencyMarks::default());
        turn.close(TurnStatus::Completed);
        turn.close(TurnStatus::Cancelled);
        assert_eq!(turn.status, TurnStatus::Completed);
    }

    #[test]
    fn test_close_open_turns() {
        let counter = TurnCounter::new();
        let mut session = CallSession::new("en-US");
        let done = counter.next();
        let open = counter.next();
        session
            .turns
            .push(Turn::new(done, "a".to_string(), LatencyMarks::default()));
        session
            .turns
            .push(Turn::new(open, "b".to_string(), LatencyMarks::default()));
        if let Some(turn) = session.turn_mut(done) {
            turn.close(TurnStatus::Completed);
        }

        session.close_open_turns(TurnStatus::Cancelled);
        assert_eq!(session.turn(done).map(|t| t.status), Some(TurnStatus::Completed));
        assert_eq!(session.turn(open).map(|t| t.status), Some(TurnStatus::Cancelled));
    }
}
