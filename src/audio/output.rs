//! Audio playback facility.
//!
//! Completion is reported by message: each `play` call gets a sender and the
//! output posts exactly one [`PlaybackCompletion`] for that segment when it
//! ends naturally, is stopped, or fails.

use crate::error::{CallError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

/// Identifies one playback segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PlaybackId(pub u64);

impl fmt::Display for PlaybackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "playback#{}", self.0)
    }
}

/// Encoded audio held in memory. The codec is opaque to the coordinator.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioPayload {
    bytes: Arc<[u8]>,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Decode base64 audio, accepting a `data:<mime>;base64,` prefix.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let body = match encoded.split_once("base64,") {
            Some((prefix, body)) if prefix.starts_with("data:") => body,
            _ => encoded,
        };
        let bytes = STANDARD
            .decode(body)
            .map_err(|e| CallError::InvalidAudio {
                message: format!("invalid base64 audio: {}", e),
            })?;
        if bytes.is_empty() {
            return Err(CallError::InvalidAudio {
                message: "audio payload is empty".to_string(),
            });
        }
        Ok(Self::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for AudioPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioPayload({} bytes)", self.bytes.len())
    }
}

/// How a segment finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Ended,
    Stopped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackCompletion {
    pub id: PlaybackId,
    pub outcome: PlaybackOutcome,
}

pub type CompletionSender = UnboundedSender<PlaybackCompletion>;

/// Trait for playback devices.
///
/// The output holds at most one source; `pause`, `rewind` and `release`
/// act on whatever source it currently holds and are no-ops without one.
pub trait AudioOutput: Send {
    /// Load `payload` as the current source and start it at `volume` (0.0 to 1.0).
    fn play(
        &mut self,
        id: PlaybackId,
        payload: &AudioPayload,
        volume: f32,
        done: CompletionSender,
    ) -> Result<()>;

    fn set_volume(&mut self, id: PlaybackId, volume: f32);

    fn pause(&mut self);

    /// Reset the current source's position to the start.
    fn rewind(&mut self);

    /// Drop the current source.
    fn release(&mut self);
}

/// Calls recorded by [`MockAudioOutput`].
#[derive(Debug, Clone, PartialEq)]
pub enum OutputCall {
    Play { id: PlaybackId, volume: f32 },
    SetVolume { id: PlaybackId, volume: f32 },
    Pause,
    Rewind,
    Release,
}

#[derive(Debug, Default)]
struct OutputState {
    calls: Vec<OutputCall>,
    current: Option<PlaybackId>,
    playing: HashSet<PlaybackId>,
    volumes: HashMap<PlaybackId, f32>,
    senders: HashMap<PlaybackId, CompletionSender>,
    max_concurrent: usize,
    fail_next_play: bool,
}

/// Shared view into a [`MockAudioOutput`].
#[derive(Debug, Clone, Default)]
pub struct OutputProbe {
    state: Arc<Mutex<OutputState>>,
}

impl OutputProbe {
    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<OutputCall> {
        self.lock().calls.clone()
    }

    /// Segments currently audible.
    pub fn playing(&self) -> Vec<PlaybackId> {
        let mut ids: Vec<_> = self.lock().playing.iter().copied().collect();
        ids.sort();
        ids
    }

    /// Highest number of segments that were ever audible at once.
    pub fn max_concurrent(&self) -> usize {
        self.lock().max_concurrent
    }

    pub fn play_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, OutputCall::Play { .. }))
            .count()
    }

    pub fn pause_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, OutputCall::Pause))
            .count()
    }

    pub fn volume(&self, id: PlaybackId) -> Option<f32> {
        self.lock().volumes.get(&id).copied()
    }

    /// Make the next `play` call fail.
    pub fn fail_next_play(&self) {
        self.lock().fail_next_play = true;
    }

    /// Finish `id` naturally. Returns false if it was not playing.
    pub fn finish(&self, id: PlaybackId) -> bool {
        self.complete(id, PlaybackOutcome::Ended)
    }

    /// Fail `id` mid-stream. Returns false if it was not playing.
    pub fn fail(&self, id: PlaybackId, message: &str) -> bool {
        self.complete(id, PlaybackOutcome::Failed(message.to_string()))
    }

    fn complete(&self, id: PlaybackId, outcome: PlaybackOutcome) -> bool {
        let mut state = self.lock();
        if !state.playing.remove(&id) {
            return false;
        }
        if state.current == Some(id) {
            state.current = None;
        }
        if let Some(done) = state.senders.remove(&id)
            && done.send(PlaybackCompletion { id, outcome }).is_err()
        {
            warn!("Playback completion receiver dropped for {}", id);
        }
        true
    }
}

/// Mock playback device for testing and simulation.
///
/// Segments stay "playing" until the probe finishes them or they are paused.
#[derive(Debug, Clone, Default)]
pub struct MockAudioOutput {
    probe: OutputProbe,
}

impl MockAudioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> OutputProbe {
        self.probe.clone()
    }
}

impl AudioOutput for MockAudioOutput {
    fn play(
        &mut self,
        id: PlaybackId,
        payload: &AudioPayload,
        volume: f32,
        done: CompletionSender,
    ) -> Result<()> {
        let mut state = self.probe.lock();
        if std::mem::take(&mut state.fail_next_play) {
            return Err(CallError::Playback {
                message: format!("mock output refused {} bytes", payload.len()),
            });
        }
        state.calls.push(OutputCall::Play { id, volume });
        state.current = Some(id);
        state.playing.insert(id);
        state.volumes.insert(id, volume);
        state.senders.insert(id, done);
        state.max_concurrent = state.max_concurrent.max(state.playing.len());
        Ok(())
    }

    fn set_volume(&mut self, id: PlaybackId, volume: f32) {
        let mut state = self.probe.lock();
        state.calls.push(OutputCall::SetVolume { id, volume });
        state.volumes.insert(id, volume);
    }

    fn pause(&mut self) {
        let mut state = self.probe.lock();
        state.calls.push(OutputCall::Pause);
        if let Some(id) = state.current {
            state.playing.remove(&id);
        }
    }

    fn rewind(&mut self) {
        self.probe.lock().calls.push(OutputCall::Rewind);
    }

    fn release(&mut self) {
        let mut state = self.probe.lock();
        state.calls.push(OutputCall::Release);
        if let Some(id) = state.current.take() {
            // A stopped source never reports completion on its own.
            state.senders.remove(&id);
        }
    }
}
