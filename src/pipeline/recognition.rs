//! Recognition worker: utterances in, ordered transcript events out.

use crate::error::Result;
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::queue::StopToken;
use crate::pipeline::station::{Station, StationRunner};
use crate::pipeline::types::{SegmentEvent, TranscriptEvent};
use crate::stt::transcriber::Transcriber;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Station that transcribes sealed utterances one at a time.
///
/// `Started` passes straight through. A failed transcription still produces
/// its `Text` (empty) and `Ended` events so consumers never wait on it.
pub struct RecognitionStation {
    transcriber: Arc<dyn Transcriber>,
}

impl RecognitionStation {
    pub fn new(transcriber: Arc<dyn Transcriber>) -> Self {
        Self { transcriber }
    }
}

impl Station for RecognitionStation {
    type Input = SegmentEvent;
    type Output = TranscriptEvent;

    fn name(&self) -> &'static str {
        "recognition"
    }

    fn process(&mut self, event: SegmentEvent) -> std::result::Result<Vec<TranscriptEvent>, StationError> {
        let (sequence, utterance) = match event {
            SegmentEvent::Started(sequence) => {
                return Ok(vec![TranscriptEvent::Started { sequence }]);
            }
            SegmentEvent::Sealed(sequence, utterance) => (sequence, utterance),
        };

        let start = Instant::now();
        let text = match self
            .transcriber
            .transcribe(&utterance.samples, utterance.sample_rate)
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(sequence, "transcription failed, using empty text: {e}");
                String::new()
            }
        };

        let audio = utterance.duration();
        let elapsed = start.elapsed();
        if elapsed > audio {
            tracing::warn!(
                sequence,
                audio_ms = audio.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                model = self.transcriber.model_name(),
                "transcription slower than real-time"
            );
        } else {
            tracing::debug!(
                sequence,
                audio_ms = audio.as_millis() as u64,
                elapsed_ms = elapsed.as_millis() as u64,
                "utterance transcribed"
            );
        }

        Ok(vec![
            TranscriptEvent::Text { sequence, text },
            TranscriptEvent::Ended { sequence },
        ])
    }
}

/// Owns the recognition worker thread for one listen session at a time.
pub struct RecognitionDispatcher {
    transcriber: Arc<dyn Transcriber>,
    input: Receiver<SegmentEvent>,
    output: Sender<TranscriptEvent>,
    reporter: Arc<dyn ErrorReporter>,
    poll: Duration,
    runner: Option<StationRunner<RecognitionStation>>,
}

impl RecognitionDispatcher {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        input: Receiver<SegmentEvent>,
        output: Sender<TranscriptEvent>,
        poll: Duration,
    ) -> Self {
        Self {
            transcriber,
            input,
            output,
            reporter: Arc::new(LogReporter),
            poll,
            runner: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Spawns the worker. Does nothing if it is already running; a worker
    /// that already exited is replaced.
    pub fn start(&mut self) -> Result<()> {
        if self.runner.is_some() && !self.is_running() {
            self.stop();
        }
        if self.runner.is_some() {
            return Ok(());
        }
        let runner = StationRunner::spawn(
            RecognitionStation::new(Arc::clone(&self.transcriber)),
            self.input.clone(),
            self.output.clone(),
            Arc::clone(&self.reporter),
            StopToken::new(),
            self.poll,
        )?;
        tracing::debug!(model = self.transcriber.model_name(), "recognition started");
        self.runner = Some(runner);
        Ok(())
    }

    /// Stops the worker within one polling interval.
    ///
    /// A transcription still running at the deadline is abandoned and its
    /// result discarded. Returns false in that case.
    pub fn stop(&mut self) -> bool {
        let Some(runner) = self.runner.take() else {
            return true;
        };
        let joined = runner.stop();
        tracing::debug!(joined, "recognition stopped");
        joined
    }

    pub fn is_running(&self) -> bool {
        self.runner.as_ref().is_some_and(StationRunner::is_running)
    }
}

impl Drop for RecognitionDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
