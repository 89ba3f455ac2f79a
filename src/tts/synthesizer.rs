use crate::audio::wav::encode_wav;
use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::pipeline::types::{AudioClip, ms_to_samples};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Reference voice and rendering options sent with every synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceProfile {
    /// Reference clip the service clones the voice from.
    pub ref_audio_path: PathBuf,
    /// Transcript of the reference clip.
    pub prompt_text: String,
    pub prompt_lang: String,
    /// Language of the text to speak, or "auto".
    pub text_lang: String,
    pub speed_factor: f32,
    /// Server-side text splitting method.
    pub text_split_method: String,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            ref_audio_path: PathBuf::new(),
            prompt_text: String::new(),
            prompt_lang: "ja".to_string(),
            text_lang: defaults::AUTO_LANGUAGE.to_string(),
            speed_factor: 1.0,
            text_split_method: "cut5".to_string(),
        }
    }
}

/// Trait for text-to-speech synthesis.
///
/// Implementations are usually a network call and may take seconds. The
/// synthesis worker calls them one at a time.
pub trait Synthesizer: Send + Sync {
    /// Renders `text` in the given voice as a WAV-encoded clip.
    fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<AudioClip>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<AudioClip> {
        (**self).synthesize(text, voice)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Mock synthesizer for testing.
///
/// Renders every fragment as a constant-valued mono WAV clip whose length
/// is fixed, so tests can count samples at the speaker. Scripted failures
/// are consumed in call order.
#[derive(Debug)]
pub struct MockSynthesizer {
    sample_rate: u32,
    clip_ms: u32,
    level: i16,
    failures: Mutex<VecDeque<bool>>,
    delay: Duration,
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            clip_ms: 200,
            level: 1000,
            failures: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Length of every rendered clip.
    pub fn with_clip_ms(mut self, clip_ms: u32) -> Self {
        self.clip_ms = clip_ms;
        self
    }

    /// Sample value every rendered clip is filled with.
    pub fn with_level(mut self, level: i16) -> Self {
        self.level = level;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue one successful call.
    pub fn then_succeed(self) -> Self {
        self.push(false)
    }

    /// Queue one failing call.
    pub fn then_fail(self) -> Self {
        self.push(true)
    }

    fn push(self, fail: bool) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(fail);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text passed to `synthesize`, in call order.
    pub fn texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str, _voice: &VoiceProfile) -> Result<AudioClip> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let fail = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(false);
        if fail {
            return Err(VoxloopError::Synthesis {
                message: format!("mock synthesis failure for {text:?}"),
            });
        }

        let samples = vec![self.level; ms_to_samples(self.clip_ms, self.sample_rate)];
        Ok(AudioClip::new(encode_wav(&samples, self.sample_rate)?))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
