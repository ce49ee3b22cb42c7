//! Collects recognition fragments into one transcript per utterance.

use super::recognizer::RecognitionFragment;
use crate::defaults;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct TranscriptAssembler {
    finals: Vec<String>,
    interim: Option<String>,
    last_fragment_at: Option<Instant>,
    settle: Duration,
}

impl TranscriptAssembler {
    pub fn new(settle: Duration) -> Self {
        Self {
            finals: Vec::new(),
            interim: None,
            last_fragment_at: None,
            settle,
        }
    }

    pub fn push(&mut self, fragment: RecognitionFragment, now: Instant) {
        let text = fragment.text.trim();
        self.last_fragment_at = Some(now);
        if fragment.is_final {
            self.interim = None;
            if !text.is_empty() {
                self.finals.push(text.to_string());
            }
        } else if text.is_empty() {
            self.interim = None;
        } else {
            self.interim = Some(text.to_string());
        }
    }

    /// True once a final fragment has been followed by more than the settle
    /// window without any further fragment.
    pub fn settled(&self, now: Instant) -> bool {
        if self.finals.is_empty() || self.interim.is_some() {
            return false;
        }
        self.last_fragment_at
            .is_some_and(|at| now.saturating_duration_since(at) > self.settle)
    }

    pub fn has_pending(&self) -> bool {
        !self.finals.is_empty() || self.interim.is_some()
    }

    pub fn has_final(&self) -> bool {
        !self.finals.is_empty()
    }

    /// Time since the last fragment while anything is still held.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        if !self.has_pending() {
            return None;
        }
        self.last_fragment_at
            .map(|at| now.saturating_duration_since(at))
    }

    /// Joins the final fragments, falling back to a trailing interim one.
    /// Clears the assembler.
    pub fn take(&mut self) -> Option<String> {
        let mut parts = std::mem::take(&mut self.finals);
        if let Some(interim) = self.interim.take() {
            parts.push(interim);
        }
        self.last_fragment_at = None;
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    pub fn clear(&mut self) {
        self.finals.clear();
        self.interim = None;
        self.last_fragment_at = None;
    }
}

impl Default for TranscriptAssembler {
    fn default() -> Self {
        Self::new(Duration::from_millis(defaults::RECOGNITION_SETTLE_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_final_then_quiet_settles_after_window() {
        let t0 = Instant::now();
        let mut assembler = TranscriptAssembler::default();
        assembler.push(RecognitionFragment::final_text("I'd like a refund"), t0);

        assert!(!assembler.settled(t0 + ms(300)));
        assert!(assembler.settled(t0 + ms(301)));
    }

    #[test]
    fn test_later_fragment_restarts_settle_window() {
        let t0 = Instant::now();
        let mut assembler = TranscriptAssembler::default();
        assembler.push(RecognitionFragment::final_text("I'd like"), t0);
        assembler.push(RecognitionFragment::interim("a re"), t0 + ms(200));

        assert!(!assembler.settled(t0 + ms(1000)));

        assembler.push(RecognitionFragment::final_text("a refund"), t0 + ms(400));
        assert!(!assembler.settled(t0 + ms(600)));
        assert!(assembler.settled(t0 + ms(800)));
    }

    #[test]
    fn test_interim_alone_never_settles() {
        let t0 = Instant::now();
        let mut assembler = TranscriptAssembler::default();
        assembler.push(RecognitionFragment::interim("hmm"), t0);
        assert!(assembler.has_pending());
        assert!(!assembler.settled(t0 + ms(5000)));
    }

    #[test]
    fn test_take_joins_finals_and_trailing_interim() {
        let t0 = Instant::now();
        let mut assembler = TranscriptAssembler::default();
        assembler.push(RecognitionFragment::final_text(" my order "), t0);
        assembler.push(RecognitionFragment::final_text("arrived broken"), t0);
        assembler.push(RecognitionFragment::interim("yesterday"), t0);

        assert_eq!(
            assembler.take().as_deref(),
            Some("my order arrived broken yesterday")
        );
        assert!(!assembler.has_pending());
        assert_eq!(assembler.take(), None);
    }

    #[test]
    fn test_empty_final_is_ignored() {
        let t0 = Instant::now();
        let mut assembler = TranscriptAssembler::default();
        assembler.push(RecognitionFragment::final_text("   "), t0);
        assert!(!assembler.has_pending());
        assert!(!assembler.settled(t0 + ms(1000)));
    }

    #[test]
    fn test_idle_for_tracks_held_fragments_only() {
        let t0 = Instant::now();
        let mut assembler = TranscriptAssembler::default();
        assert_eq!(assembler.idle_for(t0 + ms(100)), None);

        assembler.push(RecognitionFragment::interim("uh"), t0);
        assert_eq!(assembler.idle_for(t0 + ms(250)), Some(ms(250)));
        assert!(!assembler.has_final());

        assembler.clear();
        assert_eq!(assembler.idle_for(t0 + ms(250)), None);
    }

    #[test]
    fn test_clear_drops_everything() {
        let t0 = Instant::now();
        let mut assembler = TranscriptAssembler::default();
        assembler.push(RecognitionFragment::final_text("hello"), t0);
        assembler.clear();
        assert!(!assembler.has_pending());
        assert_eq!(assembler.take(), None);
    }
}
