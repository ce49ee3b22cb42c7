use crate::error::{CallError, ErrorKind, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;

/// One piece of a continuous recognition stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionFragment {
    pub text: String,
    pub is_final: bool,
}

impl RecognitionFragment {
    pub fn interim(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: false,
        }
    }

    pub fn final_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_final: true,
        }
    }
}

#[derive(Debug)]
pub enum RecognitionUpdate {
    Fragment(RecognitionFragment),
    /// The recognizer stopped on its own with an error.
    Failed(CallError),
}

pub type RecognitionSender = UnboundedSender<RecognitionUpdate>;

/// Trait for continuous speech recognizers.
///
/// This trait allows swapping implementations (platform recognizer vs mock).
pub trait SpeechRecognizer: Send {
    /// Begin streaming results for `language` into `results`.
    fn start(&mut self, language: &str, results: RecognitionSender) -> Result<()>;

    /// Stop streaming. Safe to call when not running.
    fn stop(&mut self);
}

#[derive(Debug, Default)]
struct FeedState {
    results: Option<RecognitionSender>,
    language: Option<String>,
    starts: u32,
}

/// Test handle that pushes results into a running [`MockRecognizer`].
///
/// Pushes are dropped while the recognizer is stopped, as a real stream would be.
#[derive(Debug, Clone, Default)]
pub struct RecognizerFeed {
    state: Arc<Mutex<FeedState>>,
}

impl RecognizerFeed {
    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, update: RecognitionUpdate) -> bool {
        match &self.lock().results {
            Some(tx) => tx.send(update).is_ok(),
            None => false,
        }
    }

    pub fn interim(&self, text: &str) -> bool {
        self.push(RecognitionUpdate::Fragment(RecognitionFragment::interim(text)))
    }

    pub fn final_text(&self, text: &str) -> bool {
        self.push(RecognitionUpdate::Fragment(RecognitionFragment::final_text(
            text,
        )))
    }

    pub fn fail(&self, kind: ErrorKind, message: &str) -> bool {
        self.push(RecognitionUpdate::Failed(CallError::Recognition {
            kind,
            message: message.to_string(),
        }))
    }

    pub fn is_running(&self) -> bool {
        self.lock().results.is_some()
    }

    /// Language of the most recent start.
    pub fn language(&self) -> Option<String> {
        self.lock().language.clone()
    }

    pub fn start_count(&self) -> u32 {
        self.lock().starts
    }
}

/// Mock recognizer for testing
#[derive(Debug, Clone, Default)]
pub struct MockRecognizer {
    feed: RecognizerFeed,
    start_failure: Option<ErrorKind>,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self, kind: ErrorKind) -> Self {
        self.start_failure = Some(kind);
        self
    }

    pub fn feed(&self) -> RecognizerFeed {
        self.feed.clone()
    }
}

impl SpeechRecognizer for MockRecognizer {
    fn start(&mut self, language: &str, results: RecognitionSender) -> Result<()> {
        if let Some(kind) = self.start_failure {
            return Err(CallError::Recognition {
                kind,
                message: "mock recognizer failed to start".to_string(),
            });
        }
        let mut state = self.feed.lock();
        state.results = Some(results);
        state.language = Some(language.to_string());
        state.starts += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.feed.lock().results = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[test]
    fn test_feed_delivers_only_while_running() {
        let (tx, mut rx) = unbounded_channel();
        let mut recognizer = MockRecognizer::new();
        let feed = recognizer.feed();

        assert!(!feed.final_text("too early"));

        recognizer.start("en-US", tx).unwrap();
        assert!(feed.interim("hel"));
        assert!(feed.final_text("hello"));

        match rx.try_recv().unwrap() {
            RecognitionUpdate::Fragment(f) => assert_eq!(f, RecognitionFragment::interim("hel")),
            other => panic!("unexpected {:?}", other),
        }
        match rx.try_recv().unwrap() {
            RecognitionUpdate::Fragment(f) => assert!(f.is_final),
            other => panic!("unexpected {:?}", other),
        }

        recognizer.stop();
        assert!(!feed.is_running());
        assert!(!feed.interim("late"));
        assert_eq!(feed.language().as_deref(), Some("en-US"));
    }

    #[test]
    fn test_start_failure_carries_kind() {
        let (tx, _rx) = unbounded_channel();
        let mut recognizer = MockRecognizer::new().with_start_failure(ErrorKind::PermissionDenied);

        let err = recognizer.start("en-US", tx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(recognizer.feed().start_count(), 0);
    }

    #[test]
    fn test_fail_pushes_recognition_error() {
        let (tx, mut rx) = unbounded_channel();
        let mut recognizer = MockRecognizer::new();
        recognizer.start("en-US", tx).unwrap();

        assert!(recognizer.feed().fail(ErrorKind::Network, "offline"));
        match rx.try_recv().unwrap() {
            RecognitionUpdate::Failed(err) => assert_eq!(err.kind(), ErrorKind::Network),
            other => panic!("unexpected {:?}", other),
        }
    }
}
