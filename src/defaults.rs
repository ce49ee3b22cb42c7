//! Default configuration constants for callvox.
//!
//! Shared between the TOML config schema and the runtime config types so both
//! agree on the same numbers.

/// Default audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Default Voice Activity Detection (VAD) threshold.
///
/// Normalized RMS (0.0 to 1.0) above which a frame counts as speech.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Silence in milliseconds before a pause becomes an end-of-speech endpoint.
pub const SILENCE_DURATION_MS: u32 = 600;

/// Minimum speech in milliseconds for a burst to count as an utterance.
///
/// Shorter bursts (coughs, clicks, a chair creaking) are absorbed silently.
pub const MIN_SPEECH_MS: u32 = 200;

/// Sampling cadence of the coordinator loop (~60 Hz, one animation frame).
pub const FRAME_INTERVAL_MS: u64 = 16;

/// Duration of the playback fade-in ramp.
pub const FADE_IN_MS: u32 = 300;

/// Number of equal volume steps in the fade-in ramp (10% each).
pub const FADE_IN_STEPS: u32 = 10;

/// Quiet period after which an active call re-engages the human.
pub const QUIET_PERIOD_MS: u64 = 8000;

/// A final recognition fragment followed by this much quiet is an endpoint.
pub const RECOGNITION_SETTLE_MS: u64 = 300;

/// How long a surfaced error stays visible before it auto-clears.
pub const ERROR_DISPLAY_MS: u64 = 5000;

/// Upper bound on waiting for a remote reply. `0` waits indefinitely.
pub const REPLY_TIMEOUT_MS: u64 = 30_000;

/// Consecutive capture read failures tolerated before the call faults.
pub const MAX_CONSECUTIVE_CAPTURE_ERRORS: u32 = 10;

/// Default conversation locale.
pub const DEFAULT_LANGUAGE: &str = "en-US";

/// Default base URL of the remote dialogue service.
pub const DEFAULT_SERVICE_URL: &str = "http://localhost:8080/api/voice";

/// Locally authored prompt used by silence re-engagement.
pub const RE_ENGAGEMENT_PROMPT: &str = "Are you still there? Take your time, I'm listening.";

/// End reason sent when the human hangs up.
pub const END_REASON_USER: &str = "user_ended";

/// End reason sent when a session arrives for an abandoned call attempt.
pub const END_REASON_ABANDONED: &str = "abandoned";

/// End reason sent when the call faults.
pub const END_REASON_ERROR: &str = "error";

/// End reason sent when the client tears down mid-call.
pub const END_REASON_TEARDOWN: &str = "client_teardown";
