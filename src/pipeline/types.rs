//! Data types flowing between pipeline stages.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Duration of `samples` mono samples at `sample_rate`.
pub fn samples_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(samples as f64 / sample_rate as f64)
}

/// Number of mono samples covering `ms` milliseconds at `sample_rate`.
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (u64::from(sample_rate) * u64::from(ms) / 1000) as usize
}

/// A fixed-length slice of mono 16-bit PCM captured from the microphone.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers).
    pub samples: Vec<i16>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
    /// Timestamp when this frame was captured.
    pub timestamp: Instant,
    /// Capture order within one capture run.
    pub sequence: u64,
}

impl AudioFrame {
    /// Creates a new audio frame stamped with the current instant.
    pub fn new(samples: Vec<i16>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// Wall-clock length of the audio in this frame.
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }
}

/// Contiguous speech audio from onset to the silence timeout that closed it.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    /// Monotonically increasing id shared with the matching `Started` event.
    pub sequence: u64,
    /// Buffered speech frames, concatenated.
    pub samples: Vec<i16>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Utterance boundary emitted by segmentation.
///
/// For one sequence id, `Started` always precedes exactly one `Sealed`.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    Started(u64),
    Sealed(u64, Utterance),
}

impl SegmentEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            SegmentEvent::Started(seq) | SegmentEvent::Sealed(seq, _) => *seq,
        }
    }
}

/// Ordered recognition output for the downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TranscriptEvent {
    /// The user started speaking.
    Started { sequence: u64 },
    /// Recognized text for the utterance (empty if recognition failed).
    Text { sequence: u64, text: String },
    /// The utterance is complete; no more text follows for this sequence.
    Ended { sequence: u64 },
}

impl TranscriptEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            TranscriptEvent::Started { sequence }
            | TranscriptEvent::Text { sequence, .. }
            | TranscriptEvent::Ended { sequence } => *sequence,
        }
    }
}

/// One synthesized sentence as returned by the synthesis service (WAV bytes).
///
/// Opaque to everything except playback, which decodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    bytes: Vec<u8>,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for AudioClip {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}
