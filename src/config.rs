use crate::audio::segmenter::SegmentationConfig;
use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::pipeline::session::{ListenOptions, SpeakOptions};
use crate::stt::transcriber::TranscriberConfig;
use crate::tts::synthesizer::VoiceProfile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub segmentation: SegmentationSettings,
    pub recognition: RecognitionConfig,
    pub synthesis: SynthesisConfig,
    pub playback: PlaybackConfig,
    pub runtime: RuntimeConfig,
}

/// Microphone configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; the best default input when unset.
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Audio read per blocking device read, in milliseconds.
    pub frame_ms: u32,
}

/// Voice activity segmentation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SegmentationSettings {
    pub subframe_ms: u32,
    pub activation_ratio: f32,
    pub silence_timeout_ms: u32,
    /// RMS level above which the built-in classifier calls a sub-frame speech.
    pub energy_threshold: f32,
}

/// Speech-to-text configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub model_path: PathBuf,
    pub language: String,
}

/// Text-to-speech service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub voice: VoiceProfile,
}

/// Speaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Cross-fade length between consecutive clips.
    pub tail_ms: u32,
}

/// Worker timing and queue capacities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub poll_interval_ms: u64,
    pub event_queue: usize,
    pub utterance_queue: usize,
    pub text_queue: usize,
    pub clip_queue: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
        }
    }
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            subframe_ms: defaults::SUBFRAME_MS,
            activation_ratio: defaults::ACTIVATION_RATIO,
            silence_timeout_ms: defaults::SILENCE_TIMEOUT_MS,
            energy_threshold: defaults::ENERGY_THRESHOLD,
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(defaults::MODEL_PATH),
            language: defaults::AUTO_LANGUAGE.to_string(),
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            url: defaults::TTS_URL.to_string(),
            timeout_secs: defaults::TTS_TIMEOUT_SECS,
            voice: VoiceProfile::default(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            tail_ms: defaults::TAIL_MS,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            event_queue: defaults::EVENT_QUEUE,
            utterance_queue: defaults::UTTERANCE_QUEUE,
            text_queue: defaults::TEXT_QUEUE,
            clip_queue: defaults::CLIP_QUEUE,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    ///
    /// # Errors
    /// `ConfigFileNotFound` if the file does not exist, `Config` for invalid
    /// TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VoxloopError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                VoxloopError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file is missing
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(VoxloopError::ConfigFileNotFound { .. }) => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - VOXLOOP_INPUT_DEVICE → capture.device
    /// - VOXLOOP_OUTPUT_DEVICE → playback.device
    /// - VOXLOOP_TTS_URL → synthesis.url
    /// - VOXLOOP_MODEL → recognition.model_path
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("VOXLOOP_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.capture.device = Some(device);
        }

        if let Ok(device) = std::env::var("VOXLOOP_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.playback.device = Some(device);
        }

        if let Ok(url) = std::env::var("VOXLOOP_TTS_URL")
            && !url.is_empty()
        {
            self.synthesis.url = url;
        }

        if let Ok(model) = std::env::var("VOXLOOP_MODEL")
            && !model.is_empty()
        {
            self.recognition.model_path = PathBuf::from(model);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/voxloop/config.toml on Linux
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("voxloop").join("config.toml"))
            .ok_or_else(|| VoxloopError::Other("Could not determine config directory".to_string()))
    }

    /// Checks every value the pipeline components would reject.
    pub fn validate(&self) -> Result<()> {
        if self.capture.sample_rate == 0 {
            return Err(VoxloopError::invalid("capture.sample_rate", "must be greater than 0"));
        }
        if self.playback.sample_rate == 0 {
            return Err(VoxloopError::invalid("playback.sample_rate", "must be greater than 0"));
        }
        if self.segmentation.subframe_ms == 0 {
            return Err(VoxloopError::invalid(
                "segmentation.subframe_ms",
                "must be greater than 0",
            ));
        }
        if self.capture.frame_ms < self.segmentation.subframe_ms {
            return Err(VoxloopError::invalid(
                "capture.frame_ms",
                format!(
                    "must be at least segmentation.subframe_ms ({})",
                    self.segmentation.subframe_ms
                ),
            ));
        }
        if self.segmentation.silence_timeout_ms == 0 {
            return Err(VoxloopError::invalid(
                "segmentation.silence_timeout_ms",
                "must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.segmentation.energy_threshold) {
            return Err(VoxloopError::invalid(
                "segmentation.energy_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        self.segmentation_config().validate()?;

        if self.runtime.poll_interval_ms == 0 {
            return Err(VoxloopError::invalid(
                "runtime.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        for (key, capacity) in [
            ("runtime.event_queue", self.runtime.event_queue),
            ("runtime.utterance_queue", self.runtime.utterance_queue),
            ("runtime.text_queue", self.runtime.text_queue),
            ("runtime.clip_queue", self.runtime.clip_queue),
        ] {
            if capacity == 0 {
                return Err(VoxloopError::invalid(key, "must be greater than 0"));
            }
        }

        let speed = self.synthesis.voice.speed_factor;
        if !(speed.is_finite() && speed > 0.0) {
            return Err(VoxloopError::invalid(
                "synthesis.voice.speed_factor",
                "must be greater than 0",
            ));
        }
        if self.synthesis.timeout_secs == 0 {
            return Err(VoxloopError::invalid(
                "synthesis.timeout_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.runtime.poll_interval_ms)
    }

    pub fn segmentation_config(&self) -> SegmentationConfig {
        SegmentationConfig {
            subframe_ms: self.segmentation.subframe_ms,
            activation_ratio: self.segmentation.activation_ratio,
            silence_timeout: Duration::from_millis(u64::from(self.segmentation.silence_timeout_ms)),
        }
    }

    pub fn transcriber_config(&self) -> TranscriberConfig {
        TranscriberConfig {
            model_path: self.recognition.model_path.clone(),
            language: self.recognition.language.clone(),
        }
    }

    pub fn listen_options(&self) -> ListenOptions {
        ListenOptions {
            frame_ms: self.capture.frame_ms,
            poll_interval: self.poll_interval(),
            utterance_queue: self.runtime.utterance_queue,
            event_queue: self.runtime.event_queue,
        }
    }

    pub fn speak_options(&self) -> SpeakOptions {
        SpeakOptions {
            tail_ms: self.playback.tail_ms,
            poll_interval: self.poll_interval(),
            text_queue: self.runtime.text_queue,
            clip_queue: self.runtime.clip_queue,
        }
    }
}
