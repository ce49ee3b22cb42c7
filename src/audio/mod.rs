//! Audio input and output seams: capture frames in, energy-based endpointing,
//! and a single playback source out.

pub mod capture;
pub mod output;
pub mod vad;

pub use capture::{CaptureDevice, CaptureProbe, MockCaptureDevice};
pub use output::{
    AudioOutput, AudioPayload, CompletionSender, MockAudioOutput, OutputCall, OutputProbe,
    PlaybackCompletion, PlaybackId, PlaybackOutcome,
};
pub use vad::{Clock, MockClock, SystemClock, Vad, VadConfig, VadEvent, VadState, calculate_rms};
