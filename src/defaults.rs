//! Default configuration constants for voxloop.
//!
//! Shared by the config file defaults and the component constructors so the
//! two never drift apart.

/// Microphone sample rate in Hz.
///
/// 16kHz is what speech classifiers and Whisper-family models expect.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Duration of one captured frame in milliseconds.
///
/// The capture loop reads this much audio per blocking device read and feeds
/// it to segmentation as one frame.
pub const FRAME_MS: u32 = 500;

/// Width of one classification sub-frame in milliseconds.
///
/// WebRTC-style classifiers only accept 10, 20 or 30 ms windows.
pub const SUBFRAME_MS: u32 = 30;

/// Fraction of active sub-frames needed to call a whole frame active.
pub const ACTIVATION_RATIO: f32 = 0.4;

/// Trailing silence that closes an utterance, in milliseconds.
pub const SILENCE_TIMEOUT_MS: u32 = 1000;

/// RMS threshold (0.0 to 1.0) used by the built-in energy classifier.
pub const ENERGY_THRESHOLD: f32 = 0.02;

/// Speaker sample rate in Hz (what the synthesis service renders at).
pub const PLAYBACK_SAMPLE_RATE: u32 = 32000;

/// Length of the cross-fade between consecutive clips, in milliseconds.
pub const TAIL_MS: u32 = 50;

/// Upper bound on how long any worker waits before re-checking its stop token.
pub const POLL_INTERVAL_MS: u64 = 100;

/// Capacity of the segment-event queue between capture and recognition.
pub const UTTERANCE_QUEUE: usize = 16;

/// Capacity of the transcript-event queue handed to the consumer.
pub const EVENT_QUEUE: usize = 64;

/// Capacity of the pending text FIFO in front of synthesis.
pub const TEXT_QUEUE: usize = 256;

/// Capacity of the audio clip queue in front of playback.
pub const CLIP_QUEUE: usize = 32;

/// Default synthesis endpoint (GPT-SoVITS API server).
pub const TTS_URL: &str = "http://127.0.0.1:9880/tts";

/// Timeout for one synthesis request in seconds.
pub const TTS_TIMEOUT_SECS: u64 = 30;

/// Default transcription model path.
pub const MODEL_PATH: &str = "./model/ggml-small.bin";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// How long device output may run ahead of the writer, in milliseconds.
///
/// Keeps barge-in latency low while still absorbing scheduler jitter.
pub const OUTPUT_BUFFER_MS: u32 = 100;
