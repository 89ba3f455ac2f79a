use crate::defaults;
use crate::error::{Result, VoxloopError};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (real Whisper vs mock).
/// Calls may take seconds; they always run on the recognition worker.
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance to text.
    ///
    /// # Arguments
    /// * `audio` - mono 16-bit PCM
    /// * `sample_rate` - rate of `audio` in Hz
    fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String>;

    /// Name of the loaded model, for logs.
    fn model_name(&self) -> &str;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String> {
        (**self).transcribe(audio, sample_rate)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Configuration for transcriber initialization.
#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub model_path: PathBuf,
    /// Language code, or "auto" to detect it per utterance.
    pub language: String,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(defaults::MODEL_PATH),
            language: defaults::AUTO_LANGUAGE.to_string(),
        }
    }
}

/// Mock transcriber for testing.
///
/// Returns scripted responses in order, then the default response. Every
/// call is counted and the received utterance lengths are recorded.
#[derive(Debug)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    scripted: Mutex<VecDeque<Result<String>>>,
    delay: Duration,
    calls: AtomicUsize,
    lengths: Mutex<Vec<usize>>,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            scripted: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            lengths: Mutex::new(Vec::new()),
        }
    }

    /// Response returned once the script is used up.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Queue a one-shot response.
    pub fn then_respond(self, response: &str) -> Self {
        self.push(Ok(response.to_string()))
    }

    /// Queue a one-shot failure.
    pub fn then_fail(self) -> Self {
        self.push(Err(VoxloopError::Transcription {
            message: "mock transcription failure".to_string(),
        }))
    }

    /// Sleep this long inside every call, like a real model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn push(self, result: Result<String>) -> Self {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sample counts of every utterance received, in call order.
    pub fn utterance_lengths(&self) -> Vec<usize> {
        self.lengths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, audio: &[i16], _sample_rate: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.lengths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(audio.len());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let scripted = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        scripted.unwrap_or_else(|| Ok(self.response.clone()))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
