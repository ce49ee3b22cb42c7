//! The async driver against the scripted service, in real time.

use callvox::audio::{MockAudioOutput, MockCaptureDevice};
use callvox::config::Config;
use callvox::conversation::{
    CallEvent, CallSnapshot, CallStatus, Collaborators, Conversation, ConversationHandle,
    TurnStatus,
};
use callvox::error::ErrorKind;
use callvox::service::{ScriptedDialogueService, ScriptedReply, ServiceCall, StartCallRequest};
use callvox::stt::{MockRecognizer, RecognizerFeed};
use std::sync::Arc;
use std::time::Duration;

struct Running {
    handle: ConversationHandle,
    feed: RecognizerFeed,
    service: ScriptedDialogueService,
    events: crossbeam_channel::Receiver<CallEvent>,
}

fn spawn(service: ScriptedDialogueService, reply_timeout: Option<Duration>) -> Running {
    let recognizer = MockRecognizer::new();
    let feed = recognizer.feed();
    let (tx, events) = crossbeam_channel::unbounded();
    let handle = Conversation::new(
        &Config::default(),
        Collaborators {
            capture: Box::new(MockCaptureDevice::new()),
            output: Box::new(MockAudioOutput::new()),
            recognizer: Box::new(recognizer),
        },
        Arc::new(service.clone()),
    )
    .with_reply_timeout(reply_timeout)
    .with_event_sender(tx)
    .spawn();
    Running {
        handle,
        feed,
        service,
        events,
    }
}

fn request() -> StartCallRequest {
    StartCallRequest {
        scenario: Some("billing".to_string()),
        course_id: None,
        language: "en-US".to_string(),
    }
}

/// Polls snapshots until `done` holds, failing after two seconds.
async fn wait_for(
    handle: &ConversationHandle,
    what: &str,
    done: impl Fn(&CallSnapshot) -> bool,
) -> CallSnapshot {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let snapshot = handle.snapshot().await.unwrap();
        if done(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}: {:?}",
            what,
            snapshot
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_call_lifecycle_through_driver() {
    let service = ScriptedDialogueService::new("Hi there")
        .without_greeting_audio()
        .with_reply(ScriptedReply::silent("Your balance is zero."));
    let run = spawn(service, Some(Duration::from_secs(5)));

    run.handle.start_call(request()).await.unwrap();
    wait_for(&run.handle, "active", |s| s.status == CallStatus::Active).await;

    assert!(run.feed.final_text("what is my balance"));
    let snapshot = wait_for(&run.handle, "completed turn", |s| {
        s.turns
            .first()
            .is_some_and(|t| t.status == TurnStatus::Completed)
    })
    .await;
    assert_eq!(snapshot.turns[0].transcript, "what is my balance");
    assert_eq!(
        snapshot.turns[0].reply_text.as_deref(),
        Some("Your balance is zero.")
    );

    run.handle.end_call().unwrap();
    wait_for(&run.handle, "ended", |s| s.status == CallStatus::Ended).await;
    assert_eq!(run.service.end_reasons(), vec!["user_ended".to_string()]);
    assert!(run.events.try_iter().any(|e| matches!(e, CallEvent::CallEnded { .. })));

    let latency = run.handle.shutdown().await.unwrap();
    assert_eq!(latency.records().len(), 1);
}

#[tokio::test]
async fn test_reply_timeout_keeps_call_active() {
    let service = ScriptedDialogueService::new("Hi")
        .without_greeting_audio()
        .with_reply(ScriptedReply::silent("too late").after(Duration::from_millis(500)));
    let run = spawn(service, Some(Duration::from_millis(50)));

    run.handle.start_call(request()).await.unwrap();
    wait_for(&run.handle, "active", |s| s.status == CallStatus::Active).await;

    run.feed.final_text("hello");
    let snapshot = wait_for(&run.handle, "failed turn", |s| {
        s.turns
            .first()
            .is_some_and(|t| t.status == TurnStatus::Failed)
    })
    .await;
    assert_eq!(snapshot.status, CallStatus::Active);
    assert_eq!(snapshot.error.map(|e| e.kind), Some(ErrorKind::Timeout));

    run.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_failure_routes_to_setup_required() {
    let service = ScriptedDialogueService::new("Hi")
        .with_start_failure(ErrorKind::ConfigurationRequired, "voice provider missing");
    let run = spawn(service, None);

    run.handle.start_call(request()).await.unwrap();
    wait_for(&run.handle, "setup_required", |s| {
        s.status == CallStatus::SetupRequired
    })
    .await;

    let err = run.handle.start_call(request()).await.unwrap_err();
    assert!(err.is_configuration_required());
    run.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_session_created_after_hang_up_is_abandoned() {
    let service = ScriptedDialogueService::new("Hi").with_start_delay(Duration::from_millis(100));
    let run = spawn(service, None);

    run.handle.start_call(request()).await.unwrap();
    run.handle.end_call().unwrap();
    wait_for(&run.handle, "ended", |s| s.status == CallStatus::Ended).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while run.service.end_reasons().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "orphan never ended");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(run.service.end_reasons(), vec!["abandoned".to_string()]);
    run.handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_ends_live_session() {
    let service = ScriptedDialogueService::new("Hi").without_greeting_audio();
    let run = spawn(service, None);

    run.handle.start_call(request()).await.unwrap();
    wait_for(&run.handle, "active", |s| s.status == CallStatus::Active).await;

    run.handle.shutdown().await.unwrap();
    let ends: Vec<_> = run
        .service
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            ServiceCall::End { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec!["client_teardown".to_string()]);
}

#[tokio::test]
async fn test_shutdown_while_connecting_ends_late_session() {
    let service = ScriptedDialogueService::new("Hi").with_start_delay(Duration::from_millis(100));
    let run = spawn(service, Some(Duration::from_secs(1)));

    run.handle.start_call(request()).await.unwrap();
    run.handle.shutdown().await.unwrap();

    assert_eq!(run.service.end_reasons(), vec!["abandoned".to_string()]);
}
