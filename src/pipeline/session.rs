//! The two session units the application drives: listening and speaking.

use crate::audio::output::AudioSink;
use crate::audio::segmenter::SegmentationEngine;
use crate::audio::source::AudioSource;
use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::pipeline::capture_loop::CaptureLoop;
use crate::pipeline::playback::{ClipSender, PlaybackEngine};
use crate::pipeline::queue::HandoffQueue;
use crate::pipeline::recognition::RecognitionDispatcher;
use crate::pipeline::synthesis::SynthesisDispatcher;
use crate::pipeline::types::{SegmentEvent, TranscriptEvent};
use crate::stt::transcriber::Transcriber;
use crate::tts::synthesizer::{Synthesizer, VoiceProfile};
use crossbeam_channel::{Receiver, bounded};
use std::sync::Arc;
use std::time::Duration;

/// Timing and queue sizes for a [`ListenSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct ListenOptions {
    /// Audio read from the device per frame.
    pub frame_ms: u32,
    pub poll_interval: Duration,
    /// Segment events between capture and recognition.
    pub utterance_queue: usize,
    /// Transcript events waiting for the consumer.
    pub event_queue: usize,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            frame_ms: defaults::FRAME_MS,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            utterance_queue: defaults::UTTERANCE_QUEUE,
            event_queue: defaults::EVENT_QUEUE,
        }
    }
}

/// Timing and queue sizes for a [`SpeakSession`].
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakOptions {
    /// Cross-fade length between consecutive clips.
    pub tail_ms: u32,
    pub poll_interval: Duration,
    pub text_queue: usize,
    pub clip_queue: usize,
}

impl Default for SpeakOptions {
    fn default() -> Self {
        Self {
            tail_ms: defaults::TAIL_MS,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            text_queue: defaults::TEXT_QUEUE,
            clip_queue: defaults::CLIP_QUEUE,
        }
    }
}

fn check_capacity(key: &str, capacity: usize) -> Result<()> {
    if capacity == 0 {
        return Err(VoxloopError::invalid(key, "must be greater than 0"));
    }
    Ok(())
}

/// Microphone to transcript events: capture and recognition as one unit.
pub struct ListenSession {
    capture: CaptureLoop,
    recognition: RecognitionDispatcher,
    segments: HandoffQueue<SegmentEvent>,
    transcripts: Receiver<TranscriptEvent>,
}

impl ListenSession {
    pub fn new(
        source: Box<dyn AudioSource>,
        engine: SegmentationEngine,
        transcriber: Arc<dyn Transcriber>,
        options: ListenOptions,
    ) -> Result<Self> {
        check_capacity("runtime.utterance_queue", options.utterance_queue)?;
        check_capacity("runtime.event_queue", options.event_queue)?;

        let segments = HandoffQueue::bounded(options.utterance_queue);
        let (event_tx, transcripts) = bounded(options.event_queue);
        let capture = CaptureLoop::new(
            source,
            engine,
            segments.sender(),
            options.frame_ms,
            options.poll_interval,
        )?;
        let recognition = RecognitionDispatcher::new(
            transcriber,
            segments.receiver(),
            event_tx,
            options.poll_interval,
        );

        Ok(Self {
            capture,
            recognition,
            segments,
            transcripts,
        })
    }

    /// Starts recognition, then capture.
    ///
    /// # Errors
    /// The device open error, with recognition stopped again.
    pub fn start(&mut self) -> Result<()> {
        self.recognition.start()?;
        if let Err(e) = self.capture.start() {
            self.recognition.stop();
            return Err(e);
        }
        tracing::info!("listening");
        Ok(())
    }

    /// Stops capture (closing the device), then recognition.
    ///
    /// Returns false if either worker had to be abandoned.
    pub fn stop(&mut self) -> bool {
        let capture = self.capture.stop();
        let recognition = self.recognition.stop();
        tracing::info!("stopped listening");
        capture && recognition
    }

    /// Drops utterances waiting for recognition.
    pub fn clear(&self) -> usize {
        self.segments.clear()
    }

    /// Ordered `Started`, `Text`, `Ended` events per utterance.
    pub fn transcripts(&self) -> Receiver<TranscriptEvent> {
        self.transcripts.clone()
    }

    /// Device failures that ended capture.
    pub fn errors(&self) -> Receiver<VoxloopError> {
        self.capture.errors()
    }

    /// True while the capture thread is alive.
    pub fn is_listening(&self) -> bool {
        self.capture.is_running()
    }
}

/// Text to speaker: synthesis and playback as one unit.
pub struct SpeakSession {
    // Declared first so it is dropped, and stopped, before playback
    synthesis: SynthesisDispatcher,
    playback: PlaybackEngine,
}

impl SpeakSession {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        voice: VoiceProfile,
        sink: Box<dyn AudioSink>,
        options: SpeakOptions,
    ) -> Result<Self> {
        let playback = PlaybackEngine::new(
            sink,
            options.tail_ms,
            options.clip_queue,
            options.poll_interval,
        )?;
        let synthesis = SynthesisDispatcher::new(
            synthesizer,
            voice,
            playback.clip_sender(),
            options.text_queue,
            options.poll_interval,
        )?;
        Ok(Self {
            synthesis,
            playback,
        })
    }

    /// Starts playback, then synthesis.
    pub fn start(&mut self) -> Result<()> {
        self.playback.start()?;
        if let Err(e) = self.synthesis.start() {
            self.playback.stop();
            return Err(e);
        }
        tracing::info!("speaking");
        Ok(())
    }

    /// Stops synthesis, then playback (closing the device).
    ///
    /// Returns false if either worker had to be abandoned.
    pub fn stop(&mut self) -> bool {
        let synthesis = self.synthesis.stop();
        let playback = self.playback.stop();
        tracing::info!("stopped speaking");
        synthesis && playback
    }

    /// Queues one text fragment without blocking. Returns false if it was
    /// not accepted: the session is stopped, the text is blank, or the text
    /// queue is full and the caller has to retry.
    pub fn say(&self, text: &str) -> bool {
        self.synthesis.enqueue(text)
    }

    /// Silences the session at once: pending text, queued clips, the held
    /// tail and the clip being played are all dropped. Threads keep running.
    pub fn barge_in(&self) {
        let texts = self.synthesis.clear();
        let clips = self.playback.clear();
        tracing::debug!(texts, clips, "barge-in");
    }

    /// Producer handle for playing ready-made clips through this session.
    pub fn clip_sender(&self) -> ClipSender {
        self.playback.clip_sender()
    }

    /// True when nothing is queued, synthesizing or playing.
    pub fn is_idle(&self) -> bool {
        self.synthesis.pending() == 0
            && !self.synthesis.in_flight()
            && self.playback.queued() == 0
            && !self.playback.is_busy()
    }

    pub fn is_running(&self) -> bool {
        self.synthesis.is_running() && self.playback.is_playing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::classifier::EnergyClassifier;
    use crate::audio::output::MockAudioSink;
    use crate::audio::segmenter::SegmentationConfig;
    use crate::audio::source::MockAudioSource;
    use crate::pipeline::types::ms_to_samples;
    use crate::stt::transcriber::MockTranscriber;
    use crate::tts::synthesizer::MockSynthesizer;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(40);

    fn listen_options() -> ListenOptions {
        ListenOptions {
            frame_ms: 100,
            poll_interval: POLL,
            ..ListenOptions::default()
        }
    }

    fn speak_options() -> SpeakOptions {
        SpeakOptions {
            poll_interval: POLL,
            ..SpeakOptions::default()
        }
    }

    fn engine() -> SegmentationEngine {
        let config = SegmentationConfig {
            silence_timeout: Duration::from_millis(300),
            ..SegmentationConfig::default()
        };
        SegmentationEngine::new(config, Box::new(EnergyClassifier::default())).unwrap()
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_listen_session_transcribes_utterance() {
        let frame = ms_to_samples(100, 16000);
        let mut frames = vec![vec![6000i16; frame]; 3];
        frames.extend(std::iter::repeat_n(vec![0i16; frame], 4));
        let source = MockAudioSource::new().with_frames(frames);
        let transcriber = Arc::new(MockTranscriber::new("mock").with_response("good morning"));

        let mut session =
            ListenSession::new(Box::new(source), engine(), transcriber, listen_options()).unwrap();
        let transcripts = session.transcripts();
        session.start().unwrap();
        assert!(session.is_listening());

        let events: Vec<TranscriptEvent> = (0..3)
            .map(|_| transcripts.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(
            events,
            vec![
                TranscriptEvent::Started { sequence: 0 },
                TranscriptEvent::Text {
                    sequence: 0,
                    text: "good morning".to_string()
                },
                TranscriptEvent::Ended { sequence: 0 },
            ]
        );
        assert!(session.stop());
    }

    #[test]
    fn test_listen_session_start_failure_leaves_nothing_running() {
        let source = MockAudioSource::new().with_start_failure();
        let mut session = ListenSession::new(
            Box::new(source),
            engine(),
            Arc::new(MockTranscriber::new("mock")),
            listen_options(),
        )
        .unwrap();

        assert!(matches!(
            session.start(),
            Err(VoxloopError::AudioDeviceNotFound { .. })
        ));
        assert!(!session.is_listening());
        assert!(session.stop());
    }

    #[test]
    fn test_listen_session_rejects_zero_queue() {
        let options = ListenOptions {
            event_queue: 0,
            ..listen_options()
        };
        let result = ListenSession::new(
            Box::new(MockAudioSource::new()),
            engine(),
            Arc::new(MockTranscriber::new("mock")),
            options,
        );
        assert!(matches!(
            result,
            Err(VoxloopError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_speak_session_plays_fragments() {
        let sink = MockAudioSink::new();
        let log = sink.log();
        let synth = Arc::new(MockSynthesizer::new().with_clip_ms(200));
        let mut session =
            SpeakSession::new(synth, VoiceProfile::default(), Box::new(sink), speak_options())
                .unwrap();
        session.start().unwrap();
        assert!(session.is_running());

        assert!(session.say("Hello."));
        assert!(session.say("How are you?"));
        assert!(wait_until(|| log.sample_count() >= ms_to_samples(350, 32000)));
        assert!(wait_until(|| session.is_idle()));

        assert_eq!(log.sample_count(), ms_to_samples(350, 32000));
        assert!(session.stop());
        assert!(!log.is_open());
    }

    #[test]
    fn test_barge_in_silences_and_session_recovers() {
        let sink = MockAudioSink::new().with_realtime(1.0);
        let log = sink.log();
        let synth = Arc::new(MockSynthesizer::new().with_clip_ms(2000).with_level(300));
        let mut session =
            SpeakSession::new(synth.clone(), VoiceProfile::default(), Box::new(sink), speak_options())
                .unwrap();
        session.start().unwrap();

        for text in ["one.", "two.", "three."] {
            assert!(session.say(text));
        }
        assert!(wait_until(|| log.sample_count() > 0));

        session.barge_in();
        assert!(wait_until(|| session.is_idle()));
        let cut = log.sample_count();
        assert!(cut < ms_to_samples(2000, 32000));

        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(log.sample_count(), cut);
        assert!(session.is_running());
        assert!(session.say("four."));
        assert!(wait_until(|| log.sample_count() > cut));
        assert!(session.stop());
    }

    #[test]
    fn test_speak_session_say_rejected_when_stopped() {
        let session = SpeakSession::new(
            Arc::new(MockSynthesizer::new()),
            VoiceProfile::default(),
            Box::new(MockAudioSink::new()),
            speak_options(),
        )
        .unwrap();
        assert!(!session.say("ignored"));
        assert!(session.is_idle());
    }
}
