//! Single owner of the audible output.
//!
//! Every start goes through [`PlaybackOwner::acquire_and_play`], which hard
//! stops whatever is held before looking at the new request.

use super::correlator::{Correlator, TurnToken};
use crate::audio::{AudioOutput, AudioPayload, CompletionSender, PlaybackCompletion, PlaybackId};
use crate::config::PlaybackSection;
use crate::error::CallError;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Linear fade-in ramp in equal steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeIn {
    duration: Duration,
    steps: u32,
}

impl FadeIn {
    pub fn new(duration: Duration, steps: u32) -> Self {
        Self { duration, steps }
    }

    /// Volume `elapsed` after the segment started.
    pub fn volume_at(&self, elapsed: Duration) -> f32 {
        if self.steps == 0 || self.duration.is_zero() {
            return 1.0;
        }
        let step_len = self.duration / self.steps;
        if step_len.is_zero() {
            return 1.0;
        }
        let step = (elapsed.as_nanos() / step_len.as_nanos()).min(self.steps as u128) as u32;
        step as f32 / self.steps as f32
    }
}

impl From<&PlaybackSection> for FadeIn {
    fn from(section: &PlaybackSection) -> Self {
        Self::new(
            Duration::from_millis(section.fade_in_ms as u64),
            section.fade_in_steps,
        )
    }
}

/// The segment currently owned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: PlaybackId,
    pub token: TurnToken,
    pub started_at: Instant,
    pub volume: f32,
    pub playing: bool,
}

#[derive(Debug, Error)]
pub enum PlaybackRefused {
    #[error("{0} is no longer current")]
    Stale(TurnToken),

    #[error(transparent)]
    Failed(#[from] CallError),
}

pub struct PlaybackOwner {
    output: Box<dyn AudioOutput>,
    completions: CompletionSender,
    fade: FadeIn,
    current: Option<PlaybackHandle>,
    next_id: u64,
    hard_stops: u64,
}

impl PlaybackOwner {
    pub fn new(output: Box<dyn AudioOutput>, completions: CompletionSender, fade: FadeIn) -> Self {
        Self {
            output,
            completions,
            fade,
            current: None,
            next_id: 0,
            hard_stops: 0,
        }
    }

    /// Stops anything held, then starts `payload` if `token` is still current.
    pub fn acquire_and_play(
        &mut self,
        payload: &AudioPayload,
        token: TurnToken,
        correlator: &Correlator,
        now: Instant,
    ) -> Result<PlaybackHandle, PlaybackRefused> {
        self.hard_stop();

        if !correlator.admit(token, "playback") {
            return Err(PlaybackRefused::Stale(token));
        }

        self.next_id += 1;
        let id = PlaybackId(self.next_id);
        let volume = self.fade.volume_at(Duration::ZERO);
        self.output
            .play(id, payload, volume, self.completions.clone())?;

        let handle = PlaybackHandle {
            id,
            token,
            started_at: now,
            volume,
            playing: true,
        };
        debug!("Playing {} for {} ({} bytes)", id, token, payload.len());
        self.current = Some(handle);
        Ok(handle)
    }

    /// Steps the fade-in ramp of the current segment.
    pub fn advance_fade(&mut self, now: Instant) {
        let Some(handle) = self.current.as_mut() else {
            return;
        };
        if !handle.playing || handle.volume >= 1.0 {
            return;
        }
        let volume = self
            .fade
            .volume_at(now.saturating_duration_since(handle.started_at));
        if volume > handle.volume {
            handle.volume = volume;
            self.output.set_volume(handle.id, volume);
        }
    }

    /// Pauses, rewinds and releases the output. Safe with nothing held.
    pub fn hard_stop(&mut self) -> Option<PlaybackHandle> {
        self.output.pause();
        self.output.rewind();
        self.output.release();
        self.hard_stops += 1;
        self.current.take().map(|mut handle| {
            handle.playing = false;
            debug!("Hard stopped {} for {}", handle.id, handle.token);
            handle
        })
    }

    /// Retires the current handle if `completion` belongs to it.
    ///
    /// Completions for segments that were already replaced return `None`.
    pub fn complete(&mut self, completion: &PlaybackCompletion) -> Option<PlaybackHandle> {
        match self.current {
            Some(handle) if handle.id == completion.id => {
                self.current = None;
                Some(PlaybackHandle {
                    playing: false,
                    ..handle
                })
            }
            _ => {
                debug!("Ignoring late completion of {}", completion.id);
                None
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some_and(|h| h.playing)
    }

    pub fn current(&self) -> Option<&PlaybackHandle> {
        self.current.as_ref()
    }

    /// Number of hard stops performed so far.
    pub fn hard_stop_count(&self) -> u64 {
        self.hard_stops
    }
}
