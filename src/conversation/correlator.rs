//! Turn tokens and the current-interaction pointer.
//!
//! Every asynchronous continuation carries the token it was started under and
//! is only applied while that token is still current.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Identifies one interaction. Strictly increasing for the lifetime of its counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TurnToken(u64);

impl TurnToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TurnToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "turn#{}", self.0)
    }
}

/// Shared source of turn tokens.
///
/// Clones share one sequence, so coordinators built from the same counter
/// never hand out the same token twice.
#[derive(Debug, Clone, Default)]
pub struct TurnCounter(Arc<AtomicU64>);

impl TurnCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> TurnToken {
        TurnToken(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Last token handed out, if any.
    pub fn last(&self) -> Option<TurnToken> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            n => Some(TurnToken(n)),
        }
    }
}

#[derive(Debug)]
pub struct Correlator {
    counter: TurnCounter,
    current: Option<TurnToken>,
}

impl Correlator {
    pub fn new(counter: TurnCounter) -> Self {
        Self {
            counter,
            current: None,
        }
    }

    /// Mints the next token and makes it current, superseding the previous one.
    pub fn begin(&mut self) -> TurnToken {
        let token = self.counter.next();
        self.current = Some(token);
        token
    }

    pub fn current(&self) -> Option<TurnToken> {
        self.current
    }

    pub fn is_current(&self, token: TurnToken) -> bool {
        self.current == Some(token)
    }

    /// Like [`Correlator::is_current`], logging the discard when it is not.
    pub fn admit(&self, token: TurnToken, what: &str) -> bool {
        if self.is_current(token) {
            return true;
        }
        match self.current {
            Some(current) => debug!("Discarding {} for {} (current is {})", what, token, current),
            None => debug!("Discarding {} for {} (no current interaction)", what, token),
        }
        false
    }

    /// Clears the current pointer; every outstanding token becomes stale.
    pub fn invalidate(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_strictly_increase() {
        let mut correlator = Correlator::new(TurnCounter::new());
        let mut previous = correlator.begin();
        for _ in 0..100 {
            let next = correlator.begin();
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn test_new_turn_supersedes_previous() {
        let mut correlator = Correlator::new(TurnCounter::new());
        let first = correlator.begin();
        let second = correlator.begin();

        assert!(!correlator.admit(first, "reply"));
        assert!(correlator.admit(second, "reply"));
    }

    #[test]
    fn test_invalidate_makes_everything_stale() {
        let mut correlator = Correlator::new(TurnCounter::new());
        let token = correlator.begin();
        correlator.invalidate();

        assert_eq!(correlator.current(), None);
        assert!(!correlator.is_current(token));
    }

    #[test]
    fn test_shared_counter_is_not_reset_between_correlators() {
        let counter = TurnCounter::new();
        let mut first_call = Correlator::new(counter.clone());
        let old = first_call.begin();

        let mut second_call = Correlator::new(counter.clone());
        let fresh = second_call.begin();

        assert!(fresh > old);
        assert!(!second_call.is_current(old));
        assert_eq!(counter.last(), Some(fresh));
    }

    #[test]
    fn test_display() {
        let counter = TurnCounter::new();
        assert_eq!(counter.next().to_string(), "turn#1");
    }
}
