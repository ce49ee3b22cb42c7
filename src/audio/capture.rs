//! Microphone capture facility.
//!
//! The coordinator only needs access negotiation, start/stop and a stream of
//! PCM frames to compute energy from. Device backends live outside this crate.

use crate::defaults;
use crate::error::{CallError, ErrorKind, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Trait for capture devices.
///
/// This trait allows swapping implementations (real device vs mock).
pub trait CaptureDevice: Send {
    /// Ask for microphone access.
    ///
    /// # Errors
    /// `PermissionDenied`, `DeviceNotFound` or `DeviceBusy` when access fails.
    fn request_access(&mut self) -> Result<()>;

    /// Start continuous sampling.
    fn start(&mut self) -> Result<()>;

    /// Stop sampling. Safe to call when not started.
    fn stop(&mut self) -> Result<()>;

    /// Read the next frame of 16-bit PCM samples.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Give the device back to the system.
    fn release(&mut self);
}

/// Samples in one silent frame at the default rate and frame interval.
const SILENT_FRAME_LEN: usize =
    (defaults::SAMPLE_RATE as u64 * defaults::FRAME_INTERVAL_MS / 1000) as usize;

#[derive(Debug, Default)]
struct CaptureState {
    frames: VecDeque<Vec<i16>>,
    failing_reads: u32,
    started: bool,
    released: bool,
    access_requests: u32,
    start_count: u32,
}

/// Shared view into a [`MockCaptureDevice`], kept by tests to feed frames and
/// inspect lifecycle calls after the device has been moved into a coordinator.
#[derive(Debug, Clone, Default)]
pub struct CaptureProbe {
    state: Arc<Mutex<CaptureState>>,
}

impl CaptureProbe {
    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue one frame for the next read.
    pub fn push_frame(&self, samples: Vec<i16>) {
        self.lock().frames.push_back(samples);
    }

    /// Queue `count` copies of a frame.
    pub fn push_frames(&self, samples: &[i16], count: usize) {
        let mut state = self.lock();
        for _ in 0..count {
            state.frames.push_back(samples.to_vec());
        }
    }

    /// Make the next `count` reads fail.
    pub fn fail_reads(&self, count: u32) {
        self.lock().failing_reads = count;
    }

    pub fn pending_frames(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn is_released(&self) -> bool {
        self.lock().released
    }

    pub fn access_requests(&self) -> u32 {
        self.lock().access_requests
    }

    pub fn start_count(&self) -> u32 {
        self.lock().start_count
    }
}

/// Mock capture device for testing and simulation.
///
/// Reads return queued frames, or a silent frame when the queue is empty.
#[derive(Debug, Clone, Default)]
pub struct MockCaptureDevice {
    probe: CaptureProbe,
    access_failure: Option<ErrorKind>,
    error_message: String,
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self {
            probe: CaptureProbe::default(),
            access_failure: None,
            error_message: "mock capture error".to_string(),
        }
    }

    /// Configure the mock to refuse access with the given failure kind
    pub fn with_access_failure(mut self, kind: ErrorKind) -> Self {
        self.access_failure = Some(kind);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    pub fn probe(&self) -> CaptureProbe {
        self.probe.clone()
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn request_access(&mut self) -> Result<()> {
        let mut state = self.probe.lock();
        state.access_requests += 1;
        match self.access_failure {
            Some(kind) => Err(CallError::from_kind(kind, self.error_message.clone())),
            None => {
                state.released = false;
                Ok(())
            }
        }
    }

    fn start(&mut self) -> Result<()> {
        let mut state = self.probe.lock();
        state.started = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.lock().started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut state = self.probe.lock();
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(CallError::Capture {
                message: self.error_message.clone(),
            });
        }
        Ok(state
            .frames
            .pop_front()
            .unwrap_or_else(|| vec![0i16; SILENT_FRAME_LEN]))
    }

    fn release(&mut self) {
        let mut state = self.probe.lock();
        state.started = false;
        state.released = true;
    }
}
