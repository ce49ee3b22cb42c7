//! Async driver for [`CallCoordinator`].
//!
//! The coordinator lives inside one tokio task. Commands from the handle,
//! outcomes of remote calls and the frame ticker are all serialized through
//! that task's `select!` loop, so coordinator state is never shared.

use super::coordinator::{CallCoordinator, CallSnapshot, Collaborators, CoordinatorConfig, Effect};
use super::correlator::TurnToken;
use super::events::CallEvent;
use super::latency::LatencyTracker;
use crate::config::Config;
use crate::defaults;
use crate::error::{CallError, Result};
use crate::service::{CallSummary, DialogueService, SessionGreeting, StartCallRequest, TurnReply};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

enum Command {
    Start {
        request: StartCallRequest,
        reply: oneshot::Sender<Result<()>>,
    },
    End,
    Snapshot(oneshot::Sender<CallSnapshot>),
    Shutdown,
}

/// Result of one [`Effect`], routed back into the actor.
enum Outcome {
    SessionCreated {
        token: TurnToken,
        result: Result<SessionGreeting>,
    },
    TurnReplied {
        token: TurnToken,
        result: Result<TurnReply>,
    },
    SessionEnded {
        call_id: String,
        result: Result<CallSummary>,
    },
}

/// Builder for a running conversation.
pub struct Conversation {
    config: CoordinatorConfig,
    collaborators: Collaborators,
    service: Arc<dyn DialogueService>,
    reply_timeout: Option<Duration>,
    frame_interval: Duration,
    event_tx: Option<crossbeam_channel::Sender<CallEvent>>,
}

impl Conversation {
    pub fn new(
        config: &Config,
        collaborators: Collaborators,
        service: Arc<dyn DialogueService>,
    ) -> Self {
        let reply_timeout = match config.service.reply_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        Self {
            config: CoordinatorConfig::from_config(config),
            collaborators,
            service,
            reply_timeout,
            frame_interval: Duration::from_millis(config.vad.frame_interval_ms.max(1)),
            event_tx: None,
        }
    }

    pub fn with_event_sender(mut self, tx: crossbeam_channel::Sender<CallEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Upper bound for each remote call; `None` waits indefinitely.
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Spawns the actor task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> ConversationHandle {
        let mut coordinator = CallCoordinator::new(self.config, self.collaborators);
        if let Some(tx) = self.event_tx {
            coordinator = coordinator.with_event_sender(tx);
        }
        let (commands, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            coordinator,
            service: self.service,
            reply_timeout: self.reply_timeout,
        };
        let task = tokio::spawn(actor.run(rx, self.frame_interval));
        ConversationHandle { commands, task }
    }
}

/// Handle to a spawned conversation.
pub struct ConversationHandle {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<LatencyTracker>,
}

impl ConversationHandle {
    pub async fn start_call(&self, request: StartCallRequest) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { request, reply })?;
        rx.await.map_err(|_| stopped())?
    }

    pub fn end_call(&self) -> Result<()> {
        self.send(Command::End)
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        rx.await.map_err(|_| stopped())
    }

    /// Tears the conversation down, ending any live session, and returns the
    /// latency measurements of the last call.
    pub async fn shutdown(self) -> Result<LatencyTracker> {
        if self.commands.send(Command::Shutdown).is_err() {
            debug!("Conversation already stopped");
        }
        self.task
            .await
            .map_err(|e| CallError::Other(format!("conversation task failed: {}", e)))
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

fn stopped() -> CallError {
    CallError::Other("conversation is not running".to_string())
}

struct Actor {
    coordinator: CallCoordinator,
    service: Arc<dyn DialogueService>,
    reply_timeout: Option<Duration>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        frame_interval: Duration,
    ) -> LatencyTracker {
        let (outcome_tx, mut outcomes) = mpsc::unbounded_channel();
        let mut ticker = tokio::time::interval(frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Session starts spawned but not yet applied.
        let mut pending_starts = 0usize;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start { request, reply }) => {
                        let result = self.coordinator.start_call(request);
                        if reply.send(result).is_err() {
                            debug!("start_call caller went away");
                        }
                    }
                    Some(Command::End) => self.coordinator.end_call(),
                    Some(Command::Snapshot(reply)) => {
                        if reply.send(self.coordinator.snapshot()).is_err() {
                            debug!("snapshot caller went away");
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(outcome) = outcomes.recv() => {
                    if matches!(outcome, Outcome::SessionCreated { .. }) {
                        pending_starts = pending_starts.saturating_sub(1);
                    }
                    self.apply(outcome);
                }
                _ = ticker.tick() => self.coordinator.tick(),
            }

            for effect in self.coordinator.take_effects() {
                if matches!(effect, Effect::StartSession { .. }) {
                    pending_starts += 1;
                }
                let service = Arc::clone(&self.service);
                let timeout = self.reply_timeout;
                let tx = outcome_tx.clone();
                tokio::spawn(async move {
                    let outcome = execute(service.as_ref(), effect, timeout).await;
                    if tx.send(outcome).is_err() {
                        debug!("Conversation stopped before a remote call finished");
                    }
                });
            }
        }

        self.coordinator.shutdown();
        self.flush_teardown().await;

        // A session created after teardown still has to be ended.
        drop(outcome_tx);
        let limit = self
            .reply_timeout
            .unwrap_or(Duration::from_millis(defaults::REPLY_TIMEOUT_MS));
        let deadline = tokio::time::Instant::now() + limit;
        while pending_starts > 0 {
            match tokio::time::timeout_at(deadline, outcomes.recv()).await {
                Ok(Some(outcome @ Outcome::SessionCreated { .. })) => {
                    pending_starts -= 1;
                    self.apply(outcome);
                    self.flush_teardown().await;
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} call start(s) still pending at shutdown; giving up",
                        pending_starts
                    );
                    break;
                }
            }
        }
        info!("Conversation stopped");
        self.coordinator.latency().clone()
    }

    /// Runs queued session ends inline.
    async fn flush_teardown(&mut self) {
        for effect in self.coordinator.take_effects() {
            if let Outcome::SessionEnded {
                call_id,
                result: Err(err),
            } = execute(self.service.as_ref(), effect, self.reply_timeout).await
            {
                warn!("Failed to end session {} on shutdown: {}", call_id, err);
            }
        }
    }

    fn apply(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::SessionCreated { token, result } => {
                self.coordinator.on_session_created(token, result)
            }
            Outcome::TurnReplied { token, result } => self.coordinator.on_turn_reply(token, result),
            Outcome::SessionEnded { call_id, result } => {
                self.coordinator.on_session_ended(&call_id, result)
            }
        }
    }
}

async fn execute(
    service: &dyn DialogueService,
    effect: Effect,
    timeout: Option<Duration>,
) -> Outcome {
    match effect {
        Effect::StartSession { token, request } => Outcome::SessionCreated {
            token,
            result: with_timeout(timeout, "call start", service.start_call(&request)).await,
        },
        Effect::SendTurn {
            token,
            call_id,
            transcript,
        } => Outcome::TurnReplied {
            token,
            result: with_timeout(timeout, "reply", service.send_turn(&call_id, &transcript))
                .await,
        },
        Effect::EndSession { call_id, reason } => {
            let result =
                with_timeout(timeout, "call end", service.end_call(&call_id, &reason)).await;
            Outcome::SessionEnded { call_id, result }
        }
    }
}

async fn with_timeout<T>(
    limit: Option<Duration>,
    what: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    let Some(limit) = limit else {
        return call.await;
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CallError::Timeout {
            message: format!("{} did not answer within {}ms", what, limit.as_millis()),
        }),
    }
}
