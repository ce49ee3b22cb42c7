//! Speech recognition seam.
//!
//! The recognizer streams interim and final fragments; the assembler turns
//! them into one transcript per utterance and detects settle endpoints.

pub mod assembler;
pub mod recognizer;

pub use assembler::TranscriptAssembler;
pub use recognizer::{
    MockRecognizer, RecognitionFragment, RecognitionSender, RecognitionUpdate, RecognizerFeed,
    SpeechRecognizer,
};
