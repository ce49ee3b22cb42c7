//! `callvox simulate`: a scripted call against the mock collaborators.
//!
//! Runs the coordinator on a [`MockClock`] so the call plays out in
//! simulated time: greeting, a turn, a barge-in over the reply, a second
//! turn, a re-engagement prompt after the quiet period, then hang-up.

use crate::audio::{
    CaptureProbe, Clock, MockAudioOutput, MockCaptureDevice, MockClock, OutputProbe,
};
use crate::config::Config;
use crate::conversation::{
    CallCoordinator, CallEvent, Collaborators, CoordinatorConfig, Effect, LatencyTracker,
};
use crate::error::Result;
use crate::service::{DialogueService, ScriptedDialogueService, ScriptedReply, StartCallRequest};
use crate::stt::{MockRecognizer, RecognizerFeed};
use owo_colors::OwoColorize;
use std::time::{Duration, Instant};
use tracing::debug;

/// Simulated frame length.
const FRAME_MS: u64 = 20;
/// Amplitude of a simulated speech frame, well above the default threshold.
const SPEECH_AMPLITUDE: i16 = 3000;
/// Time the simulated service takes to answer a turn.
const SERVICE_THINK_TIME: Duration = Duration::from_millis(450);

#[derive(Debug, Clone, Default)]
pub struct SimulationOptions {
    pub scenario: Option<String>,
    pub language: Option<String>,
    /// Overrides `call.quiet_period_ms`.
    pub quiet_period: Option<Duration>,
    pub quiet: bool,
}

struct Simulator {
    call: CallCoordinator<MockClock>,
    clock: MockClock,
    started: Instant,
    capture: CaptureProbe,
    output: OutputProbe,
    feed: RecognizerFeed,
    service: ScriptedDialogueService,
    events: crossbeam_channel::Receiver<CallEvent>,
    quiet: bool,
}

impl Simulator {
    fn new(config: &Config, quiet: bool) -> Self {
        let clock = MockClock::new();
        let capture = MockCaptureDevice::new();
        let output = MockAudioOutput::new();
        let recognizer = MockRecognizer::new();
        let (tx, events) = crossbeam_channel::unbounded();

        let service = ScriptedDialogueService::new("Thanks for calling, how can I help you today?")
            .with_reply(ScriptedReply::spoken(
                "Of course. Your order shipped yesterday and should arrive on Friday.",
            ))
            .with_reply(ScriptedReply::spoken(
                "Understood, I have cancelled the order. Anything else?",
            ));

        Self {
            capture: capture.probe(),
            output: output.probe(),
            feed: recognizer.feed(),
            call: CallCoordinator::with_clock(
                CoordinatorConfig::from_config(config),
                Collaborators {
                    capture: Box::new(capture),
                    output: Box::new(output),
                    recognizer: Box::new(recognizer),
                },
                clock.clone(),
            )
            .with_event_sender(tx),
            started: clock.now(),
            clock,
            service,
            events,
            quiet,
        }
    }

    fn frames(&mut self, amplitude: i16, ms: u64) {
        let frame_len = (crate::defaults::SAMPLE_RATE as u64 * FRAME_MS / 1000) as usize;
        for _ in 0..ms / FRAME_MS {
            self.capture.push_frame(vec![amplitude; frame_len]);
            self.call.tick();
            self.clock.advance(Duration::from_millis(FRAME_MS));
            self.print_events();
        }
    }

    fn speak(&mut self, ms: u64, transcript: &str) {
        let half = ms / 2;
        let words: Vec<&str> = transcript.split_whitespace().collect();
        self.frames(SPEECH_AMPLITUDE, half);
        self.feed.interim(&words[..words.len() / 2].join(" "));
        self.frames(SPEECH_AMPLITUDE, ms - half);
        self.feed.final_text(transcript);
    }

    fn quiet_for(&mut self, ms: u64) {
        self.frames(0, ms);
    }

    /// Finishes whatever synthetic audio is playing.
    fn finish_playback(&mut self) {
        for id in self.output.playing() {
            self.output.finish(id);
        }
        self.call.tick();
        self.print_events();
    }

    /// Runs queued effects against the scripted service.
    async fn resolve(&mut self) {
        for effect in self.call.take_effects() {
            debug!("Resolving {:?}", effect);
            match effect {
                Effect::StartSession { token, request } => {
                    let result = self.service.start_call(&request).await;
                    self.call.on_session_created(token, result);
                }
                Effect::SendTurn {
                    token,
                    call_id,
                    transcript,
                } => {
                    self.clock.advance(SERVICE_THINK_TIME);
                    let result = self.service.send_turn(&call_id, &transcript).await;
                    self.call.on_turn_reply(token, result);
                }
                Effect::EndSession { call_id, reason } => {
                    let result = self.service.end_call(&call_id, &reason).await;
                    self.call.on_session_ended(&call_id, result);
                }
            }
            self.print_events();
        }
    }

    fn print_events(&self) {
        for event in self.events.try_iter() {
            if self.quiet {
                continue;
            }
            let at = self.clock.now().saturating_duration_since(self.started);
            let stamp = format!("[{:>7.3}s]", at.as_secs_f64());
            let line = event.to_string();
            match event {
                CallEvent::StateChanged { .. } | CallEvent::CallEnded { .. } => {
                    println!("{} {}", stamp.dimmed(), line.cyan())
                }
                CallEvent::TurnStarted { .. } => println!("{} {}", stamp.dimmed(), line.green()),
                CallEvent::TurnCompleted { .. } | CallEvent::ReEngaged { .. } => {
                    println!("{} {}", stamp.dimmed(), line.blue())
                }
                CallEvent::BargeIn { .. } | CallEvent::TurnDiscarded { .. } => {
                    println!("{} {}", stamp.dimmed(), line.yellow())
                }
                CallEvent::ErrorShown { .. } => println!("{} {}", stamp.dimmed(), line.red()),
                _ => println!("{} {}", stamp.dimmed(), line),
            }
        }
    }
}

/// Run a scripted call and return its latency measurements.
pub async fn run_simulation(mut config: Config, options: SimulationOptions) -> Result<LatencyTracker> {
    if let Some(language) = options.language.clone() {
        config.call.language = language;
    }
    if let Some(quiet_period) = options.quiet_period {
        config.call.quiet_period_ms = quiet_period.as_millis() as u64;
    }
    config.validate()?;

    let mut sim = Simulator::new(&config, options.quiet);

    sim.call.start_call(StartCallRequest {
        scenario: options.scenario.clone(),
        course_id: None,
        language: config.call.language.clone(),
    })?;
    sim.resolve().await;

    // Greeting plays, then the human asks a question.
    sim.quiet_for(800);
    sim.finish_playback();
    sim.quiet_for(400);
    sim.speak(900, "I'd like to check on my order");
    sim.quiet_for(700);
    sim.resolve().await;

    // Barge in over the reply.
    sim.quiet_for(400);
    sim.speak(700, "actually please cancel it");
    sim.quiet_for(700);
    sim.resolve().await;
    sim.quiet_for(600);
    sim.finish_playback();

    // Say nothing until re-engaged.
    sim.quiet_for(config.call.quiet_period_ms + 200);

    sim.call.end_call();
    sim.resolve().await;
    sim.print_events();

    Ok(sim.call.latency().clone())
}
