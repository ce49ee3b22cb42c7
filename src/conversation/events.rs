//! Observer events emitted by the coordinator.

use super::correlator::TurnToken;
use super::latency::LatencyRecord;
use super::state::CallStatus;
use crate::audio::PlaybackId;
use crate::error::ErrorKind;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    StateChanged {
        from: CallStatus,
        to: CallStatus,
    },
    Listening,
    SpeechStarted,
    /// The human spoke over synthetic audio; the playback was hard stopped.
    BargeIn {
        interrupted: TurnToken,
    },
    TurnStarted {
        token: TurnToken,
        transcript: String,
    },
    TurnCompleted {
        token: TurnToken,
        reply: Option<String>,
        latency: Option<LatencyRecord>,
    },
    /// A continuation arrived for a turn that is no longer current.
    TurnDiscarded {
        token: TurnToken,
        reason: String,
    },
    PlaybackStarted {
        token: TurnToken,
        playback: PlaybackId,
    },
    PlaybackFinished {
        token: TurnToken,
        playback: PlaybackId,
    },
    ReEngaged {
        prompt: String,
    },
    ErrorShown {
        kind: ErrorKind,
        message: String,
    },
    ErrorCleared,
    CallEnded {
        reason: String,
        summary: Option<String>,
    },
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEvent::StateChanged { from, to } => write!(f, "state {} -> {}", from, to),
            CallEvent::Listening => write!(f, "listening"),
            CallEvent::SpeechStarted => write!(f, "speech started"),
            CallEvent::BargeIn { interrupted } => write!(f, "barge-in over {}", interrupted),
            CallEvent::TurnStarted { token, transcript } => {
                write!(f, "{} sent: \"{}\"", token, transcript)
            }
            CallEvent::TurnCompleted {
                token,
                reply,
                latency,
            } => {
                write!(f, "{} reply: \"{}\"", token, reply.as_deref().unwrap_or(""))?;
                if let Some(latency) = latency {
                    write!(f, " ({}ms)", latency.total_ms)?;
                }
                Ok(())
            }
            CallEvent::TurnDiscarded { token, reason } => {
                write!(f, "{} discarded: {}", token, reason)
            }
            CallEvent::PlaybackStarted { token, playback } => {
                write!(f, "{} started for {}", playback, token)
            }
            CallEvent::PlaybackFinished { token, playback } => {
                write!(f, "{} finished for {}", playback, token)
            }
            CallEvent::ReEngaged { prompt } => write!(f, "re-engaged: \"{}\"", prompt),
            CallEvent::ErrorShown { kind, message } => write!(f, "error [{}]: {}", kind, message),
            CallEvent::ErrorCleared => write!(f, "error cleared"),
            CallEvent::CallEnded { reason, summary } => match summary {
                Some(summary) => write!(f, "call ended ({}): {}", reason, summary),
                None => write!(f, "call ended ({})", reason),
            },
        }
    }
}
