//! Conversation coordination: call lifecycle, turn correlation, playback
//! ownership and latency instrumentation.
//!
//! [`CallCoordinator`] is the synchronous core; [`Conversation`] runs it as a
//! tokio actor and executes its remote effects.

pub mod coordinator;
pub mod correlator;
pub mod driver;
pub mod events;
pub mod latency;
pub mod playback;
pub mod session;
pub mod state;

pub use coordinator::{
    CallCoordinator, CallSnapshot, Collaborators, CoordinatorConfig, Effect, ErrorNotice,
};
pub use correlator::{Correlator, TurnCounter, TurnToken};
pub use driver::{Conversation, ConversationHandle};
pub use events::CallEvent;
pub use latency::{LatencyMarks, LatencyRecord, LatencyStats, LatencyTracker};
pub use playback::{FadeIn, PlaybackHandle, PlaybackOwner, PlaybackRefused};
pub use session::{CallSession, Role, TranscriptEntry, Turn, TurnStatus};
pub use state::{ActivePhase, CallState, CallStatus};
