//! Real-time voice pipeline.
//!
//! Every active component runs in its own thread and hands data to the next
//! through bounded crossbeam channels:
//!
//! ```text
//! mic -> CaptureLoop -> RecognitionDispatcher -> transcript events
//! text -> SynthesisDispatcher -> PlaybackEngine -> speaker
//! ```

pub mod capture_loop;
pub mod error;
pub mod playback;
pub mod queue;
pub mod recognition;
pub mod session;
pub mod station;
pub mod synthesis;
pub mod types;

pub use capture_loop::CaptureLoop;
pub use error::{ErrorReporter, LogReporter, StationError};
pub use playback::{ClipSender, PlaybackEngine};
pub use queue::{HandoffQueue, StopToken};
pub use recognition::{RecognitionDispatcher, RecognitionStation};
pub use session::{ListenOptions, ListenSession, SpeakOptions, SpeakSession};
pub use station::{Station, StationRunner};
pub use synthesis::SynthesisDispatcher;
pub use types::{AudioClip, AudioFrame, SegmentEvent, TranscriptEvent, Utterance};
