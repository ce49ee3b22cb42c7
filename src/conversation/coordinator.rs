//! The call state machine.
//!
//! [`CallCoordinator`] owns every piece of mutable call state and is driven
//! from a single logical thread. It never performs remote calls itself:
//! operations that need the dialogue service queue an [`Effect`], and the
//! caller feeds the outcome back through `on_session_created`,
//! `on_turn_reply` or `on_session_ended` together with the token the effect
//! carried.

use super::correlator::{Correlator, TurnCounter, TurnToken};
use super::events::CallEvent;
use super::latency::{LatencyMarks, LatencyTracker};
use super::playback::{FadeIn, PlaybackOwner, PlaybackRefused};
use super::session::{CallSession, Role, TranscriptEntry, Turn, TurnStatus};
use super::state::{ActivePhase, CallState, CallStatus};
use crate::audio::{
    AudioOutput, AudioPayload, CaptureDevice, Clock, PlaybackCompletion, PlaybackOutcome,
    SystemClock, Vad, VadConfig, VadEvent,
};
use crate::config::Config;
use crate::defaults;
use crate::error::{CallError, ErrorKind, Result};
use crate::service::{CallSummary, SessionGreeting, StartCallRequest, TurnReply};
use crate::stt::{
    RecognitionSender, RecognitionUpdate, SpeechRecognizer, TranscriptAssembler,
};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, info, warn};

/// Runtime settings of one coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub vad: VadConfig,
    pub fade: FadeIn,
    pub language: String,
    pub quiet_period: Duration,
    pub recognition_settle: Duration,
    pub error_display: Duration,
    pub re_engagement_prompt: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vad: VadConfig::from(&config.vad),
            fade: FadeIn::from(&config.playback),
            language: config.call.language.clone(),
            quiet_period: Duration::from_millis(config.call.quiet_period_ms),
            recognition_settle: Duration::from_millis(config.call.recognition_settle_ms),
            error_display: Duration::from_millis(config.call.error_display_ms),
            re_engagement_prompt: config.call.re_engagement_prompt.clone(),
        }
    }
}

/// The devices a coordinator drives.
pub struct Collaborators {
    pub capture: Box<dyn CaptureDevice>,
    pub output: Box<dyn AudioOutput>,
    pub recognizer: Box<dyn SpeechRecognizer>,
}

/// Remote work requested by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Create a session; report back with `on_session_created(token, ..)`.
    StartSession {
        token: TurnToken,
        request: StartCallRequest,
    },
    /// Send a turn; report back with `on_turn_reply(token, ..)`.
    SendTurn {
        token: TurnToken,
        call_id: String,
        transcript: String,
    },
    /// Terminate a session; report back with `on_session_ended(call_id, ..)`.
    EndSession { call_id: String, reason: String },
}

/// The transient error shown to the human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
struct ErrorBanner {
    notice: ErrorNotice,
    expires_at: Instant,
}

/// Point-in-time view of the call for observers.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSnapshot {
    pub status: CallStatus,
    pub phase: Option<ActivePhase>,
    pub call_id: Option<String>,
    pub current_turn: Option<TurnToken>,
    pub is_listening: bool,
    /// The human is speaking, per the VAD.
    pub is_speaking: bool,
    /// Synthetic audio is playing.
    pub is_playing: bool,
    pub level: f32,
    pub error: Option<ErrorNotice>,
    pub transcript: Vec<TranscriptEntry>,
    pub turns: Vec<Turn>,
}

pub struct CallCoordinator<C: Clock + Clone = SystemClock> {
    config: CoordinatorConfig,
    clock: C,
    state: CallState,
    session: Option<CallSession>,
    correlator: Correlator,
    vad: Vad<C>,
    playback: PlaybackOwner,
    completions: UnboundedReceiver<PlaybackCompletion>,
    capture: Box<dyn CaptureDevice>,
    capturing: bool,
    capture_errors: u32,
    recognizer: Box<dyn SpeechRecognizer>,
    recognizing: bool,
    recognition_tx: RecognitionSender,
    recognition_rx: UnboundedReceiver<RecognitionUpdate>,
    assembler: TranscriptAssembler,
    /// VAD endpoint seen before any transcript arrived.
    pending_endpoint: Option<Instant>,
    /// A turn was already started from the current utterance; fragments
    /// arriving before the next speech start belong to it and are dropped.
    utterance_taken: bool,
    last_activity: Instant,
    ending_reason: Option<String>,
    error: Option<ErrorBanner>,
    effects: Vec<Effect>,
    latency: LatencyTracker,
    event_tx: Option<crossbeam_channel::Sender<CallEvent>>,
}

impl CallCoordinator<SystemClock> {
    pub fn new(config: CoordinatorConfig, collaborators: Collaborators) -> Self {
        Self::with_clock(config, collaborators, SystemClock)
    }
}

impl<C: Clock + Clone> CallCoordinator<C> {
    pub fn with_clock(config: CoordinatorConfig, collaborators: Collaborators, clock: C) -> Self {
        let (completion_tx, completions) = unbounded_channel();
        let (recognition_tx, recognition_rx) = unbounded_channel();
        let now = clock.now();
        Self {
            vad: Vad::with_clock(config.vad, clock.clone()),
            playback: PlaybackOwner::new(collaborators.output, completion_tx, config.fade),
            assembler: TranscriptAssembler::new(config.recognition_settle),
            config,
            clock,
            state: CallState::Idle,
            session: None,
            correlator: Correlator::new(TurnCounter::new()),
            completions,
            capture: collaborators.capture,
            capturing: false,
            capture_errors: 0,
            recognizer: collaborators.recognizer,
            recognizing: false,
            recognition_tx,
            recognition_rx,
            pending_endpoint: None,
            utterance_taken: false,
            last_activity: now,
            ending_reason: None,
            error: None,
            effects: Vec::new(),
            latency: LatencyTracker::new(),
            event_tx: None,
        }
    }

    /// Draw turn tokens from a shared counter.
    pub fn with_turn_counter(mut self, counter: TurnCounter) -> Self {
        self.correlator = Correlator::new(counter);
        self
    }

    /// Stream [`CallEvent`]s to an observer (non-blocking).
    pub fn with_event_sender(mut self, tx: crossbeam_channel::Sender<CallEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    // --- lifecycle -------------------------------------------------------

    /// Begins a call: acquires the microphone and requests a session.
    ///
    /// A no-op while a call is already connecting, active or ending.
    pub fn start_call(&mut self, mut request: StartCallRequest) -> Result<()> {
        if self.state == CallState::SetupRequired {
            return Err(CallError::ConfigurationRequired {
                message: "the voice service must be configured before calls can start".to_string(),
            });
        }
        if !self.state.can_start() {
            debug!("start_call ignored while {}", self.state.status());
            return Ok(());
        }

        if request.language.trim().is_empty() {
            request.language = self.config.language.clone();
        }

        self.clear_error();
        self.set_state(CallState::Connecting);

        if let Err(err) = self.acquire_capture() {
            self.release_capture();
            let next = if err.is_configuration_required() {
                CallState::SetupRequired
            } else {
                CallState::Idle
            };
            self.set_state(next);
            self.show_error(&err);
            return Err(err);
        }

        self.session = Some(CallSession::new(&request.language));
        self.vad.reset();
        self.assembler.clear();
        self.pending_endpoint = None;
        self.utterance_taken = false;
        self.ending_reason = None;
        self.latency.clear();

        let token = self.correlator.begin();
        info!("Starting call ({}) under {}", request.language, token);
        self.effects.push(Effect::StartSession { token, request });
        Ok(())
    }

    /// Applies the outcome of [`Effect::StartSession`].
    pub fn on_session_created(&mut self, token: TurnToken, result: Result<SessionGreeting>) {
        let greeting = match result {
            Ok(greeting) => greeting,
            Err(err) => {
                if self.correlator.admit(token, "session start failure") {
                    warn!("Call start failed: {}", err);
                    self.fault(err);
                }
                return;
            }
        };

        if self.state != CallState::Connecting || !self.correlator.is_current(token) {
            info!(
                "Session {} arrived for an abandoned attempt, ending it",
                greeting.call_id
            );
            self.effects.push(Effect::EndSession {
                call_id: greeting.call_id,
                reason: defaults::END_REASON_ABANDONED.to_string(),
            });
            return;
        }

        let now = self.clock.now();
        if let Some(session) = self.session.as_mut() {
            session.call_id = Some(greeting.call_id.clone());
            if !greeting.greeting.is_empty() {
                session.push_entry(Role::Synthetic, &greeting.greeting, now, None);
            }
        }
        info!("Session {} created", greeting.call_id);

        self.set_state(CallState::Active(ActivePhase::Listening));
        self.last_activity = now;
        self.vad.set_listening(true);
        self.start_recognizer();
        if !self.state.is_active() {
            return;
        }

        match greeting.greeting_audio {
            Some(audio) => self.play(token, &audio),
            None if self.recognizing => self.resume_listening(),
            None => {}
        }
    }

    /// Hangs up: stops capture and playback, invalidates in-flight work and
    /// requests session termination.
    pub fn end_call(&mut self) {
        self.end_with_reason(defaults::END_REASON_USER);
    }

    fn end_with_reason(&mut self, reason: &str) {
        match self.state {
            CallState::Connecting => {
                self.correlator.invalidate();
                self.silence_everything();
                self.ending_reason = Some(reason.to_string());
                self.set_state(CallState::Ending);
                // No session exists yet; a late one is ended as abandoned.
                self.finish_ending(None);
            }
            CallState::Active(_) => {
                self.correlator.invalidate();
                self.silence_everything();
                if let Some(session) = self.session.as_mut() {
                    session.close_open_turns(TurnStatus::Cancelled);
                }
                self.ending_reason = Some(reason.to_string());
                self.set_state(CallState::Ending);
                match self.call_id() {
                    Some(call_id) => self.effects.push(Effect::EndSession {
                        call_id,
                        reason: reason.to_string(),
                    }),
                    None => self.finish_ending(None),
                }
            }
            _ => debug!("end_call ignored while {}", self.state.status()),
        }
    }

    /// Applies the outcome of [`Effect::EndSession`].
    pub fn on_session_ended(&mut self, call_id: &str, result: Result<CallSummary>) {
        if self.state != CallState::Ending || self.call_id().as_deref() != Some(call_id) {
            match result {
                Ok(_) => debug!("Session {} terminated", call_id),
                Err(err) => warn!("Failed to terminate session {}: {}", call_id, err),
            }
            return;
        }
        match result {
            Ok(summary) => self.finish_ending(Some(summary.summary)),
            Err(err) => {
                warn!("Failed to terminate session {}: {}", call_id, err);
                self.fault(err);
            }
        }
    }

    fn finish_ending(&mut self, summary: Option<String>) {
        let reason = self
            .ending_reason
            .take()
            .unwrap_or_else(|| defaults::END_REASON_USER.to_string());
        self.set_state(CallState::Ended);
        info!("Call ended ({})", reason);
        self.emit(CallEvent::CallEnded { reason, summary });
    }

    /// Client teardown: ends any live session and returns to idle.
    pub fn shutdown(&mut self) {
        if self.state.is_active()
            && let Some(call_id) = self.call_id()
        {
            self.effects.push(Effect::EndSession {
                call_id,
                reason: defaults::END_REASON_TEARDOWN.to_string(),
            });
        }
        self.correlator.invalidate();
        self.silence_everything();
        self.session = None;
        self.ending_reason = None;
        self.clear_error();
        self.set_state(CallState::Idle);
    }

    // --- inputs ----------------------------------------------------------

    /// One frame-cadence step: drains completions and recognition results,
    /// samples the microphone, and runs the timers.
    pub fn tick(&mut self) {
        while let Ok(completion) = self.completions.try_recv() {
            self.on_playback_finished(completion);
        }
        // Speech start is seen before fragments of the same frame.
        if self.capturing {
            self.poll_capture();
        }
        while let Ok(update) = self.recognition_rx.try_recv() {
            self.on_recognition(update);
        }

        let now = self.clock.now();
        self.playback.advance_fade(now);
        self.check_settled(now);
        self.expire_unfinished_utterance(now);
        self.check_re_engagement(now);
        self.check_error_expiry(now);
    }

    /// Reads one frame from the capture device.
    pub fn poll_capture(&mut self) {
        match self.capture.read_samples() {
            Ok(samples) => {
                self.capture_errors = 0;
                self.on_audio_frame(&samples);
            }
            Err(err) => self.on_capture_error(err),
        }
    }

    pub fn on_capture_error(&mut self, err: CallError) {
        self.capture_errors += 1;
        warn!(
            "Capture read failed ({}/{}): {}",
            self.capture_errors,
            defaults::MAX_CONSECUTIVE_CAPTURE_ERRORS,
            err
        );
        if self.capture_errors == 1 {
            self.show_error(&err);
        }
        if self.capture_errors >= defaults::MAX_CONSECUTIVE_CAPTURE_ERRORS {
            self.fault(err);
        }
    }

    /// Runs one frame of samples through the VAD.
    pub fn on_audio_frame(&mut self, samples: &[i16]) {
        let event = self.vad.process(samples);
        if !self.state.is_active() {
            return;
        }
        let now = self.clock.now();

        match event {
            VadEvent::SpeechStart => {
                self.last_activity = now;
                self.pending_endpoint = None;
                self.utterance_taken = false;
                self.emit(CallEvent::SpeechStarted);
                if self.playback.is_playing() {
                    self.barge_in();
                }
            }
            VadEvent::Speech => self.last_activity = now,
            VadEvent::EndOfSpeech {
                speech_ms,
                silence_ms,
            } => {
                debug!("Endpoint after {}ms speech, {}ms silence", speech_ms, silence_ms);
                self.last_activity = now;
                self.on_endpoint(now);
            }
            VadEvent::Absorbed { speech_ms } => {
                debug!("Absorbed {}ms burst", speech_ms);
            }
            VadEvent::Silence | VadEvent::Pause { .. } => {}
        }
    }

    pub fn on_recognition(&mut self, update: RecognitionUpdate) {
        if !self.state.is_active() || !self.recognizing {
            debug!("Dropping recognition update while {}", self.state.status());
            return;
        }
        match update {
            RecognitionUpdate::Fragment(fragment) => {
                if self.utterance_taken {
                    debug!("Dropping late fragment of an answered utterance");
                    return;
                }
                let now = self.clock.now();
                let is_final = fragment.is_final;
                self.last_activity = now;
                self.assembler.push(fragment, now);

                if is_final
                    && let Some(silence_detected) = self.pending_endpoint
                    && let Some(transcript) = self.assembler.take()
                {
                    let mut marks = LatencyMarks::new(silence_detected);
                    marks.mark_recognition_complete(now);
                    self.begin_turn(transcript, marks);
                }
            }
            RecognitionUpdate::Failed(err) => {
                warn!("Recognition stopped: {}", err);
                self.recognition_failed(err);
            }
        }
    }

    /// Applies the outcome of [`Effect::SendTurn`].
    pub fn on_turn_reply(&mut self, token: TurnToken, result: Result<TurnReply>) {
        if !self.state.is_active() || !self.correlator.admit(token, "reply") {
            self.emit(CallEvent::TurnDiscarded {
                token,
                reason: "stale reply".to_string(),
            });
            return;
        }

        let now = self.clock.now();
        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                warn!("{} failed: {}", token, err);
                self.close_turn(token, TurnStatus::Failed);
                if err.is_configuration_required() {
                    self.fault(err);
                    return;
                }
                self.show_error(&err);
                self.resume_listening();
                return;
            }
        };

        let reply_text = reply.reply_text().map(str::to_string);
        if let Some(session) = self.session.as_mut() {
            if let Some(text) = &reply_text {
                session.push_entry(Role::Synthetic, text, now, Some(token));
            }
            if let Some(turn) = session.turn_mut(token) {
                turn.reply_text = reply_text.clone();
                turn.marks.mark_synthesis_start(now);
                let record = turn.marks.finish(now);
                turn.latency = Some(record);
                self.latency.record(record);
            }
        }

        match reply.reply_audio {
            Some(audio) => self.play(token, &audio),
            None => self.complete_turn(token),
        }
    }

    pub fn on_playback_finished(&mut self, completion: PlaybackCompletion) {
        let Some(handle) = self.playback.complete(&completion) else {
            return;
        };
        self.emit(CallEvent::PlaybackFinished {
            token: handle.token,
            playback: handle.id,
        });
        if let PlaybackOutcome::Failed(message) = &completion.outcome {
            self.show_error(&CallError::Playback {
                message: message.clone(),
            });
        }
        if self.state == CallState::Active(ActivePhase::Speaking(handle.token)) {
            // Whatever was recognized over our own voice is not a turn.
            self.assembler.clear();
            self.complete_turn(handle.token);
        }
    }

    // --- observation -----------------------------------------------------

    /// Remote work queued since the last call.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn current_turn(&self) -> Option<TurnToken> {
        self.correlator.current()
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    pub fn error(&self) -> Option<&ErrorNotice> {
        self.error.as_ref().map(|banner| &banner.notice)
    }

    pub fn hard_stop_count(&self) -> u64 {
        self.playback.hard_stop_count()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            status: self.state.status(),
            phase: self.state.phase(),
            call_id: self.call_id(),
            current_turn: self.correlator.current(),
            is_listening: self.state == CallState::Active(ActivePhase::Listening)
                && self.vad.is_listening(),
            is_speaking: self.vad.is_speaking(),
            is_playing: self.playback.is_playing(),
            level: self.vad.level(),
            error: self.error().cloned(),
            transcript: self
                .session
                .as_ref()
                .map(|s| s.transcript.clone())
                .unwrap_or_default(),
            turns: self
                .session
                .as_ref()
                .map(|s| s.turns.clone())
                .unwrap_or_default(),
        }
    }

    // --- internals -------------------------------------------------------

    fn call_id(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.call_id.clone())
    }

    fn acquire_capture(&mut self) -> Result<()> {
        self.capture.request_access()?;
        self.capture.start()?;
        self.capturing = true;
        self.capture_errors = 0;
        Ok(())
    }

    fn release_capture(&mut self) {
        if let Err(err) = self.capture.stop() {
            warn!("Failed to stop capture: {}", err);
        }
        self.capture.release();
        self.capturing = false;
    }

    /// Stops playback, recognition and capture.
    fn silence_everything(&mut self) {
        self.playback.hard_stop();
        self.recognizer.stop();
        self.recognizing = false;
        self.release_capture();
        self.vad.reset();
        self.assembler.clear();
        self.pending_endpoint = None;
        self.utterance_taken = false;
    }

    /// Returns whether the recognizer is running afterwards.
    fn start_recognizer(&mut self) -> bool {
        if self.recognizing {
            return true;
        }
        let language = self
            .session
            .as_ref()
            .map(|s| s.language.clone())
            .unwrap_or_else(|| self.config.language.clone());
        match self.recognizer.start(&language, self.recognition_tx.clone()) {
            Ok(()) => {
                self.recognizing = true;
                true
            }
            Err(err) => {
                warn!("Recognizer failed to start: {}", err);
                self.recognition_failed(err);
                false
            }
        }
    }

    fn recognition_failed(&mut self, err: CallError) {
        self.recognizer.stop();
        self.recognizing = false;
        if err.is_configuration_required() {
            self.fault(err);
            return;
        }
        self.show_error(&err);
        self.assembler.clear();
        self.pending_endpoint = None;
        self.utterance_taken = false;
        if self.state == CallState::Active(ActivePhase::Listening) {
            self.vad.set_listening(false);
            self.state = CallState::Active(ActivePhase::Waiting);
        }
    }

    fn resume_listening(&mut self) {
        if !self.state.is_active() {
            return;
        }
        self.last_activity = self.clock.now();
        self.state = CallState::Active(ActivePhase::Listening);
        if !self.start_recognizer() {
            return;
        }
        self.vad.set_listening(true);
        self.emit(CallEvent::Listening);
    }

    fn play(&mut self, token: TurnToken, audio: &AudioPayload) {
        let now = self.clock.now();
        match self
            .playback
            .acquire_and_play(audio, token, &self.correlator, now)
        {
            Ok(handle) => {
                // Anything recognized so far is the synthetic voice or noise.
                self.assembler.clear();
                if let Some(turn) = self.session.as_mut().and_then(|s| s.turn_mut(token)) {
                    turn.status = TurnStatus::Playing;
                    turn.reply_playback = Some(handle.id);
                }
                self.state = CallState::Active(ActivePhase::Speaking(token));
                self.emit(CallEvent::PlaybackStarted {
                    token,
                    playback: handle.id,
                });
            }
            Err(PlaybackRefused::Stale(_)) => {
                self.emit(CallEvent::TurnDiscarded {
                    token,
                    reason: "stale playback".to_string(),
                });
            }
            Err(PlaybackRefused::Failed(err)) => {
                warn!("Playback for {} failed: {}", token, err);
                self.show_error(&err);
                self.complete_turn(token);
            }
        }
    }

    fn barge_in(&mut self) {
        let Some(handle) = self.playback.hard_stop() else {
            return;
        };
        info!("Barge-in: stopped {} for {}", handle.id, handle.token);
        self.close_turn(handle.token, TurnStatus::Interrupted);
        self.state = CallState::Active(ActivePhase::Listening);
        self.emit(CallEvent::BargeIn {
            interrupted: handle.token,
        });
    }

    fn on_endpoint(&mut self, now: Instant) {
        match self.assembler.take() {
            Some(transcript) => {
                let mut marks = LatencyMarks::new(now);
                marks.mark_recognition_complete(now);
                self.begin_turn(transcript, marks);
            }
            None => {
                debug!("Endpoint before any transcript; waiting for recognition");
                self.pending_endpoint = Some(now);
            }
        }
    }

    /// A final fragment followed by quiet is an endpoint of its own.
    fn check_settled(&mut self, now: Instant) {
        let phase_allows = matches!(
            self.state,
            CallState::Active(ActivePhase::Listening | ActivePhase::Processing(_))
        );
        if !phase_allows || !self.assembler.settled(now) {
            return;
        }
        let Some(transcript) = self.assembler.take() else {
            return;
        };
        debug!("Recognition settled; ending utterance");
        // Drop the VAD's view of this utterance so it does not endpoint twice.
        self.vad.set_listening(false);
        self.vad.set_listening(true);
        let mut marks = LatencyMarks::new(now);
        marks.mark_recognition_complete(now);
        self.begin_turn(transcript, marks);
    }

    fn begin_turn(&mut self, transcript: String, mut marks: LatencyMarks) {
        let Some(call_id) = self.call_id() else {
            debug!("Dropping utterance without a session");
            return;
        };
        let now = self.clock.now();

        match self.state.phase() {
            Some(ActivePhase::Processing(previous)) => {
                self.close_turn(previous, TurnStatus::Superseded)
            }
            Some(ActivePhase::Speaking(previous)) => {
                self.close_turn(previous, TurnStatus::Interrupted)
            }
            _ => {}
        }
        self.playback.hard_stop();

        let token = self.correlator.begin();
        self.pending_endpoint = None;
        self.utterance_taken = true;
        marks.mark_generation_start(now);

        let mut turn = Turn::new(token, transcript.clone(), marks);
        turn.sent_at = Some(now);
        if let Some(session) = self.session.as_mut() {
            session.push_entry(Role::Human, &transcript, now, Some(token));
            session.turns.push(turn);
        }

        info!("{} sent ({} chars)", token, transcript.len());
        self.effects.push(Effect::SendTurn {
            token,
            call_id,
            transcript: transcript.clone(),
        });
        self.state = CallState::Active(ActivePhase::Processing(token));
        self.last_activity = now;
        self.emit(CallEvent::TurnStarted { token, transcript });
    }

    fn complete_turn(&mut self, token: TurnToken) {
        let event = self
            .session
            .as_mut()
            .and_then(|s| s.turn_mut(token))
            .map(|turn| {
                turn.close(TurnStatus::Completed);
                CallEvent::TurnCompleted {
                    token,
                    reply: turn.reply_text.clone(),
                    latency: turn.latency,
                }
            });
        if let Some(event) = event {
            self.emit(event);
        }
        self.resume_listening();
    }

    fn close_turn(&mut self, token: TurnToken, status: TurnStatus) {
        if let Some(turn) = self.session.as_mut().and_then(|s| s.turn_mut(token)) {
            turn.close(status);
        }
    }

    /// Gives up on an utterance that stayed incomplete for the quiet period:
    /// an endpoint no transcript ever arrived for, or fragments that never
    /// settled. Recognized final text still becomes a turn.
    fn expire_unfinished_utterance(&mut self, now: Instant) {
        if self.state != CallState::Active(ActivePhase::Listening) || self.vad.is_speaking() {
            return;
        }
        let window = self.config.quiet_period;
        if self
            .pending_endpoint
            .is_some_and(|at| now.saturating_duration_since(at) >= window)
        {
            debug!("No transcript arrived for the last endpoint; dropping it");
            self.pending_endpoint = None;
        }
        if !self.assembler.idle_for(now).is_some_and(|idle| idle >= window) {
            return;
        }
        if self.assembler.has_final()
            && let Some(transcript) = self.assembler.take()
        {
            let mut marks = LatencyMarks::new(now);
            marks.mark_recognition_complete(now);
            self.begin_turn(transcript, marks);
        } else {
            debug!("Dropping unfinished interim transcript");
            self.assembler.clear();
        }
    }

    fn check_re_engagement(&mut self, now: Instant) {
        let idle = match self.state {
            CallState::Active(ActivePhase::Listening) => {
                !self.vad.is_speaking()
                    && !self.assembler.has_pending()
                    && self.pending_endpoint.is_none()
            }
            CallState::Active(ActivePhase::Waiting) => true,
            _ => false,
        };
        if !idle
            || self.playback.is_playing()
            || now.saturating_duration_since(self.last_activity) < self.config.quiet_period
        {
            return;
        }

        let prompt = self.config.re_engagement_prompt.clone();
        info!("No activity for {:?}, re-engaging", self.config.quiet_period);
        if let Some(session) = self.session.as_mut() {
            session.push_entry(Role::Synthetic, &prompt, now, None);
        }
        self.emit(CallEvent::ReEngaged { prompt });
        self.resume_listening();
    }

    fn check_error_expiry(&mut self, now: Instant) {
        if self.error.as_ref().is_some_and(|b| now >= b.expires_at) {
            self.clear_error();
        }
    }

    fn show_error(&mut self, err: &CallError) {
        let notice = ErrorNotice {
            kind: err.kind(),
            message: err.user_message().to_string(),
        };
        warn!("{} ({})", err, notice.kind);
        self.error = Some(ErrorBanner {
            notice: notice.clone(),
            expires_at: self.clock.now() + self.config.error_display,
        });
        self.emit(CallEvent::ErrorShown {
            kind: notice.kind,
            message: notice.message,
        });
    }

    fn clear_error(&mut self) {
        if self.error.take().is_some() {
            self.emit(CallEvent::ErrorCleared);
        }
    }

    /// Unrecoverable failure: tear the call down into `error`, or into
    /// `setup_required` for configuration failures.
    fn fault(&mut self, err: CallError) {
        let was_active = self.state.is_active();
        self.correlator.invalidate();
        self.silence_everything();
        if let Some(session) = self.session.as_mut() {
            session.close_open_turns(TurnStatus::Cancelled);
        }
        if was_active && let Some(call_id) = self.call_id() {
            self.effects.push(Effect::EndSession {
                call_id,
                reason: defaults::END_REASON_ERROR.to_string(),
            });
        }
        self.ending_reason = None;
        let next = if err.is_configuration_required() {
            CallState::SetupRequired
        } else {
            CallState::Error
        };
        self.set_state(next);
        self.show_error(&err);
    }

    fn set_state(&mut self, next: CallState) {
        let from = self.state.status();
        self.state = next;
        let to = next.status();
        if from != to {
            info!("Call {} -> {}", from, to);
            self.emit(CallEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: CallEvent) {
        if let Some(ref tx) = self.event_tx
            && tx.try_send(event).is_err()
        {
            // Observer gone or full; the call does not depend on it
        }
    }
}
