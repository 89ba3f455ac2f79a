//! Utterance segmentation with hysteresis.
//!
//! Each captured frame is cut into fixed-width sub-frames and classified. A
//! frame counts as active when enough of its sub-frames are speech. Speech
//! starts on the first active frame and only ends after a sustained run of
//! inactive frames, so short pauses inside a sentence do not split it and a
//! single noisy sub-frame does not start one.

use crate::audio::classifier::FrameClassifier;
use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::pipeline::types::{AudioFrame, SegmentEvent, Utterance, ms_to_samples};
use std::time::Duration;

/// Tuning for [`SegmentationEngine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationConfig {
    /// Width of one classified sub-frame in milliseconds.
    pub subframe_ms: u32,
    /// A frame is active when its fraction of speech sub-frames exceeds this,
    /// in `(0, 1]`. At 1 every sub-frame must be speech.
    pub activation_ratio: f32,
    /// Trailing silence that seals an utterance.
    pub silence_timeout: Duration,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            subframe_ms: defaults::SUBFRAME_MS,
            activation_ratio: defaults::ACTIVATION_RATIO,
            silence_timeout: Duration::from_millis(u64::from(defaults::SILENCE_TIMEOUT_MS)),
        }
    }
}

impl SegmentationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.subframe_ms == 0 {
            return Err(VoxloopError::invalid("subframe_ms", "must be greater than 0"));
        }
        if !(self.activation_ratio > 0.0 && self.activation_ratio <= 1.0) {
            return Err(VoxloopError::invalid(
                "activation_ratio",
                format!("{} is outside (0, 1]", self.activation_ratio),
            ));
        }
        if self.silence_timeout.is_zero() {
            return Err(VoxloopError::invalid(
                "silence_timeout_ms",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Current segmentation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Waiting for speech.
    Idle,
    /// Inside an utterance, buffering active frames.
    Speaking,
}

/// Turns a stream of [`AudioFrame`]s into [`SegmentEvent`]s.
///
/// Pure per-call state transform; it has no threads of its own.
pub struct SegmentationEngine {
    config: SegmentationConfig,
    classifier: Box<dyn FrameClassifier>,
    state: SegmentState,
    buffer: Vec<i16>,
    buffer_rate: u32,
    silence: Duration,
    current: u64,
    next_sequence: u64,
}

impl std::fmt::Debug for SegmentationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentationEngine")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("buffered", &self.buffer.len())
            .field("silence", &self.silence)
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

impl SegmentationEngine {
    /// Fails with `ConfigInvalidValue` if `config` is out of range.
    pub fn new(config: SegmentationConfig, classifier: Box<dyn FrameClassifier>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            classifier,
            state: SegmentState::Idle,
            buffer: Vec::new(),
            buffer_rate: 0,
            silence: Duration::ZERO,
            current: 0,
            next_sequence: 0,
        })
    }

    pub fn config(&self) -> &SegmentationConfig {
        &self.config
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Silence accumulated since the last active frame of the open utterance.
    pub fn silence(&self) -> Duration {
        self.silence
    }

    /// Samples buffered for the open utterance.
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Classifies one frame and advances the state machine.
    pub fn push_frame(&mut self, frame: AudioFrame) -> Option<SegmentEvent> {
        let active = self.is_active(&frame.samples, frame.sample_rate);

        match (self.state, active) {
            (SegmentState::Idle, false) => None,
            (SegmentState::Idle, true) => {
                self.current = self.next_sequence;
                self.next_sequence += 1;
                self.state = SegmentState::Speaking;
                self.silence = Duration::ZERO;
                self.buffer_rate = frame.sample_rate;
                self.buffer = frame.samples;
                tracing::debug!(sequence = self.current, "speech started");
                Some(SegmentEvent::Started(self.current))
            }
            (SegmentState::Speaking, true) => {
                self.silence = Duration::ZERO;
                self.buffer.extend_from_slice(&frame.samples);
                None
            }
            (SegmentState::Speaking, false) => {
                self.silence += frame.duration();
                if self.silence >= self.config.silence_timeout {
                    self.seal()
                } else {
                    None
                }
            }
        }
    }

    /// Seals the open utterance, if any, regardless of trailing silence.
    ///
    /// Used when capture stops mid-utterance so every `Started` still gets
    /// its `Sealed`.
    pub fn finish(&mut self) -> Option<SegmentEvent> {
        match self.state {
            SegmentState::Speaking => self.seal(),
            SegmentState::Idle => None,
        }
    }

    /// Drops any open utterance without emitting it. Sequence ids keep counting.
    pub fn reset(&mut self) {
        self.state = SegmentState::Idle;
        self.buffer = Vec::new();
        self.silence = Duration::ZERO;
    }

    fn seal(&mut self) -> Option<SegmentEvent> {
        self.state = SegmentState::Idle;
        self.silence = Duration::ZERO;
        let samples = std::mem::take(&mut self.buffer);
        if samples.is_empty() {
            return None;
        }

        let utterance = Utterance {
            sequence: self.current,
            samples,
            sample_rate: self.buffer_rate,
        };
        tracing::debug!(
            sequence = self.current,
            samples = utterance.samples.len(),
            duration_ms = utterance.duration().as_millis() as u64,
            "utterance sealed"
        );
        Some(SegmentEvent::Sealed(self.current, utterance))
    }

    /// Sub-frame vote: active when the speech fraction exceeds the ratio.
    /// Classifier failures count as silence.
    fn is_active(&mut self, samples: &[i16], sample_rate: u32) -> bool {
        let width = ms_to_samples(self.config.subframe_ms, sample_rate);
        if width == 0 {
            return false;
        }
        let total = samples.len() / width;
        if total == 0 {
            return false;
        }

        let mut active = 0usize;
        for sub in samples.chunks_exact(width) {
            match self.classifier.classify(sub, sample_rate) {
                Ok(true) => active += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("classifier failed, treating sub-frame as silence: {e}"),
            }
        }

        // Strictly more than the ratio; a ratio of 1 means every sub-frame
        if self.config.activation_ratio >= 1.0 {
            active == total
        } else {
            active as f32 > self.config.activation_ratio * total as f32
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::classifier::EnergyClassifier;

    const RATE: u32 = 16000;

    fn engine() -> SegmentationEngine {
        SegmentationEngine::new(
            SegmentationConfig::default(),
            Box::new(EnergyClassifier::default()),
        )
        .unwrap()
    }

    fn loud(ms: u32) -> AudioFrame {
        AudioFrame::new(vec![8000; ms_to_samples(ms, RATE)], RATE, 0)
    }

    fn quiet(ms: u32) -> AudioFrame {
        AudioFrame::new(vec![0; ms_to_samples(ms, RATE)], RATE, 0)
    }

    /// Frame whose first `active` of `total` 30ms sub-frames are loud.
    fn partial(active: usize, total: usize) -> AudioFrame {
        let width = ms_to_samples(30, RATE);
        let mut samples = vec![0i16; width * total];
        for s in samples.iter_mut().take(width * active) {
            *s = 8000;
        }
        AudioFrame::new(samples, RATE, 0)
    }

    fn run(engine: &mut SegmentationEngine, frames: Vec<AudioFrame>) -> Vec<SegmentEvent> {
        frames
            .into_iter()
            .filter_map(|f| engine.push_frame(f))
            .collect()
    }

    #[test]
    fn test_silence_emits_nothing() {
        let mut engine = engine();
        let events = run(&mut engine, (0..6).map(|_| quiet(500)).collect());
        assert!(events.is_empty());
        assert_eq!(engine.state(), SegmentState::Idle);
    }

    #[test]
    fn test_short_speech_then_long_silence() {
        let mut engine = engine();
        let events = run(&mut engine, vec![loud(200), loud(300), quiet(1200)]);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], SegmentEvent::Started(0));
        match &events[1] {
            SegmentEvent::Sealed(seq, utterance) => {
                assert_eq!(*seq, 0);
                assert_eq!(utterance.duration(), Duration::from_millis(500));
            }
            other => panic!("expected Sealed, got {other:?}"),
        }
    }

    #[test]
    fn test_brief_dropout_does_not_split() {
        let mut engine = engine();
        let events = run(
            &mut engine,
            vec![loud(500), quiet(500), loud(500), quiet(500), loud(500)],
        );
        assert_eq!(events, vec![SegmentEvent::Started(0)]);
        assert_eq!(engine.state(), SegmentState::Speaking);
        assert_eq!(engine.buffered_samples(), ms_to_samples(1500, RATE));
    }

    #[test]
    fn test_silence_accumulates_across_frames() {
        let mut engine = engine();
        assert!(engine.push_frame(loud(500)).is_some());
        assert!(engine.push_frame(quiet(500)).is_none());
        assert_eq!(engine.silence(), Duration::from_millis(500));
        assert!(matches!(
            engine.push_frame(quiet(500)),
            Some(SegmentEvent::Sealed(0, _))
        ));
        assert_eq!(engine.silence(), Duration::ZERO);
    }

    #[test]
    fn test_sequence_ids_increase() {
        let mut engine = engine();
        let events = run(
            &mut engine,
            vec![loud(500), quiet(1000), loud(500), quiet(1000)],
        );
        let sequences: Vec<u64> = events.iter().map(SegmentEvent::sequence).collect();
        assert_eq!(sequences, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_every_started_sealed_once() {
        let mut engine = engine();
        let pattern = [1, 0, 0, 1, 1, 0, 1, 0, 0, 0, 1, 1, 1, 0, 0];
        let frames = pattern
            .iter()
            .map(|&p| if p == 1 { loud(500) } else { quiet(500) })
            .collect();
        let mut events = run(&mut engine, frames);
        events.extend(engine.finish());

        let mut open: Option<u64> = None;
        for event in &events {
            match event {
                SegmentEvent::Started(seq) => {
                    assert!(open.is_none(), "Started {seq} before previous Sealed");
                    open = Some(*seq);
                }
                SegmentEvent::Sealed(seq, utterance) => {
                    assert_eq!(open.take(), Some(*seq));
                    assert!(!utterance.is_empty());
                }
            }
        }
        assert!(open.is_none());
    }

    #[test]
    fn test_activation_ratio_threshold() {
        // 16 sub-frames of 30ms; 0.4 * 16 = 6.4 so 7 are needed
        let mut engine = engine();
        assert!(engine.push_frame(partial(6, 16)).is_none());
        assert_eq!(
            engine.push_frame(partial(7, 16)),
            Some(SegmentEvent::Started(0))
        );
    }

    #[test]
    fn test_activation_exactly_at_ratio_is_inactive() {
        // 300ms of 30ms sub-frames; 4 of 10 is exactly 0.4 and does not exceed it
        let mut engine = engine();
        assert!(engine.push_frame(partial(4, 10)).is_none());
        assert_eq!(engine.state(), SegmentState::Idle);
        assert_eq!(
            engine.push_frame(partial(5, 10)),
            Some(SegmentEvent::Started(0))
        );
    }

    #[test]
    fn test_activation_ratio_one_requires_all() {
        let config = SegmentationConfig {
            activation_ratio: 1.0,
            ..SegmentationConfig::default()
        };
        let mut engine =
            SegmentationEngine::new(config, Box::new(EnergyClassifier::default())).unwrap();
        assert!(engine.push_frame(partial(15, 16)).is_none());
        assert!(engine.push_frame(partial(16, 16)).is_some());
    }

    #[test]
    fn test_frame_shorter_than_subframe_is_inactive() {
        let mut engine = engine();
        assert!(engine.push_frame(loud(20)).is_none());
        assert_eq!(engine.state(), SegmentState::Idle);
    }

    #[test]
    fn test_classifier_error_counts_as_silence() {
        let classifier = |_: &[i16], _: u32| -> Result<bool> {
            Err(VoxloopError::Classification {
                message: "malformed".to_string(),
            })
        };
        let mut engine =
            SegmentationEngine::new(SegmentationConfig::default(), Box::new(classifier)).unwrap();
        assert!(engine.push_frame(loud(500)).is_none());
    }

    #[test]
    fn test_finish_seals_open_utterance() {
        let mut engine = engine();
        engine.push_frame(loud(500));
        match engine.finish() {
            Some(SegmentEvent::Sealed(0, utterance)) => {
                assert_eq!(utterance.samples.len(), ms_to_samples(500, RATE));
            }
            other => panic!("expected Sealed, got {other:?}"),
        }
        assert!(engine.finish().is_none());
    }

    #[test]
    fn test_reset_keeps_sequence_counting() {
        let mut engine = engine();
        engine.push_frame(loud(500));
        engine.reset();
        assert_eq!(engine.state(), SegmentState::Idle);
        assert_eq!(
            engine.push_frame(loud(500)),
            Some(SegmentEvent::Started(1))
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = [
            SegmentationConfig {
                activation_ratio: 0.0,
                ..SegmentationConfig::default()
            },
            SegmentationConfig {
                activation_ratio: 1.5,
                ..SegmentationConfig::default()
            },
            SegmentationConfig {
                silence_timeout: Duration::ZERO,
                ..SegmentationConfig::default()
            },
            SegmentationConfig {
                subframe_ms: 0,
                ..SegmentationConfig::default()
            },
        ];
        for config in bad {
            let result = SegmentationEngine::new(config, Box::new(EnergyClassifier::default()));
            match result {
                Err(VoxloopError::ConfigInvalidValue { .. }) => {}
                other => panic!("expected ConfigInvalidValue for {config:?}, got {other:?}"),
            }
        }
    }
}
