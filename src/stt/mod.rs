//! Speech-to-text capability.

pub mod transcriber;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use transcriber::{MockTranscriber, Transcriber, TranscriberConfig};
#[cfg(feature = "whisper")]
pub use whisper::WhisperTranscriber;
