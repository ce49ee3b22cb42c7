//! Voice Activity Detection (VAD) module.
//!
//! Turns a stream of capture frames into speech/silence events using
//! RMS thresholding with two debounce windows: a silence duration before a
//! pause becomes an endpoint, and a minimum speech duration below which a
//! burst is absorbed.

use crate::config::VadSection;
use crate::defaults;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<Instant>>,
}

impl MockClock {
    /// Creates a new mock clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Advances the mock clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        *current += duration;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Duration of silence before speech is considered ended (milliseconds).
    pub silence_duration_ms: u32,
    /// Minimum duration of speech before it's considered an utterance (milliseconds).
    pub min_speech_ms: u32,
    /// Hard cap on unbroken speech. `None` lets the speaker talk indefinitely.
    pub max_speech_ms: Option<u32>,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            max_speech_ms: None,
        }
    }
}

impl From<&VadSection> for VadConfig {
    fn from(section: &VadSection) -> Self {
        Self {
            speech_threshold: section.speech_threshold,
            silence_duration_ms: section.silence_duration_ms,
            min_speech_ms: section.min_speech_ms,
            max_speech_ms: section.max_speech_ms,
        }
    }
}

/// Snapshot of the detector's internal state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VadState {
    pub is_speaking: bool,
    pub speech_start: Option<Instant>,
    pub silence_start: Option<Instant>,
    /// Most recent normalized RMS level.
    pub level: f32,
}

/// Events emitted by the VAD processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Not speaking, or not listening.
    Silence,
    /// Level crossed the threshold while not speaking.
    SpeechStart,
    /// Ongoing speech.
    Speech,
    /// Below threshold while speaking, not yet an endpoint.
    Pause { silence_ms: u32 },
    /// The utterance is over.
    EndOfSpeech { speech_ms: u32, silence_ms: u32 },
    /// A burst shorter than the minimum speech duration ended; no endpoint.
    Absorbed { speech_ms: u32 },
}

/// Voice Activity Detector state machine.
///
/// Knows nothing about turns: callers decide what an endpoint means.
pub struct Vad<C: Clock = SystemClock> {
    config: VadConfig,
    state: VadState,
    listening: bool,
    clock: C,
}

impl<C: Clock> Vad<C> {
    /// Creates a new VAD instance with the given configuration and clock.
    ///
    /// The detector starts not listening; see [`Vad::set_listening`].
    pub fn with_clock(config: VadConfig, clock: C) -> Self {
        Self {
            config,
            state: VadState::default(),
            listening: false,
            clock,
        }
    }

    /// Processes one capture frame.
    ///
    /// While not listening only the level is tracked.
    pub fn process(&mut self, samples: &[i16]) -> VadEvent {
        let rms = calculate_rms(samples);
        self.state.level = rms;

        if !self.listening {
            return VadEvent::Silence;
        }

        let is_speech = rms > self.config.speech_threshold;
        let now = self.clock.now();

        if !self.state.is_speaking {
            if is_speech {
                self.state.is_speaking = true;
                self.state.speech_start = Some(now);
                self.state.silence_start = None;
                return VadEvent::SpeechStart;
            }
            return VadEvent::Silence;
        }

        if is_speech {
            self.state.silence_start = None;
            if let Some(max) = self.config.max_speech_ms {
                let speech_ms = self.elapsed_ms(self.state.speech_start, now);
                if speech_ms >= max {
                    self.clear_speech();
                    return VadEvent::EndOfSpeech {
                        speech_ms,
                        silence_ms: 0,
                    };
                }
            }
            return VadEvent::Speech;
        }

        let silence_start = *self.state.silence_start.get_or_insert(now);
        let silence_ms = self.elapsed_ms(Some(silence_start), now);
        if silence_ms < self.config.silence_duration_ms {
            return VadEvent::Pause { silence_ms };
        }

        // Speech length excludes the trailing silence.
        let speech_ms = self
            .state
            .speech_start
            .map(|start| silence_start.saturating_duration_since(start).as_millis() as u32)
            .unwrap_or(0);
        self.clear_speech();

        if speech_ms >= self.config.min_speech_ms {
            VadEvent::EndOfSpeech {
                speech_ms,
                silence_ms,
            }
        } else {
            VadEvent::Absorbed { speech_ms }
        }
    }

    /// Enables or disables speech tracking. Disabling drops any utterance in progress.
    pub fn set_listening(&mut self, listening: bool) {
        if !listening {
            self.clear_speech();
        }
        self.listening = listening;
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_speaking(&self) -> bool {
        self.state.is_speaking
    }

    /// Current normalized RMS level (0.0 to 1.0).
    pub fn level(&self) -> f32 {
        self.state.level
    }

    /// Returns the current VAD state.
    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Resets to not speaking and not listening.
    pub fn reset(&mut self) {
        self.state = VadState::default();
        self.listening = false;
    }

    /// Updates the speech threshold without resetting state.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.config.speech_threshold = threshold;
    }

    fn clear_speech(&mut self) {
        self.state.is_speaking = false;
        self.state.speech_start = None;
        self.state.silence_start = None;
    }

    fn elapsed_ms(&self, since: Option<Instant>, now: Instant) -> u32 {
        since
            .map(|start| now.saturating_duration_since(start).as_millis() as u32)
            .unwrap_or(0)
    }
}

impl Vad<SystemClock> {
    /// Creates a new VAD instance with the given configuration using the system clock.
    pub fn new(config: VadConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// # Returns
/// Normalized RMS value (0.0 to 1.0), where:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents maximum amplitude
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
