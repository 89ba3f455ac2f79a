//! voxloop - Real-time voice loop for chat companions
//!
//! Segmented microphone capture handed to a transcription capability, and
//! synthesized speech played back with cross-fade and barge-in.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod pipeline;
pub mod stt;
pub mod tts;

// Capability seams (device, classifier, transcription, synthesis)
pub use audio::classifier::FrameClassifier;
pub use audio::output::AudioSink;
pub use audio::source::AudioSource;
pub use stt::transcriber::Transcriber;
pub use tts::synthesizer::{Synthesizer, VoiceProfile};

// Pipeline
pub use audio::segmenter::{SegmentationConfig, SegmentationEngine};
pub use pipeline::{
    CaptureLoop, ListenSession, PlaybackEngine, RecognitionDispatcher, SpeakSession,
    SynthesisDispatcher,
};
pub use pipeline::types::{AudioClip, AudioFrame, SegmentEvent, TranscriptEvent, Utterance};

// Error handling
pub use error::{ErrorKind, Result, VoxloopError};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
