//! Whisper-based speech-to-text using whisper-rs.
//!
//! Requires the `whisper` feature (and cmake to build whisper.cpp).

use crate::audio::wav::resample;
use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::stt::transcriber::{Transcriber, TranscriberConfig};
use std::sync::{Mutex, Once};
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Whisper models are trained on 16kHz audio.
const WHISPER_RATE: u32 = 16000;

const BEAM_SIZE: i32 = 5;

/// Local Whisper transcriber.
///
/// The context is behind a Mutex: whisper.cpp contexts are not re-entrant.
pub struct WhisperTranscriber {
    context: Mutex<WhisperContext>,
    config: TranscriberConfig,
    threads: Option<usize>,
    model_name: String,
}

impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

impl WhisperTranscriber {
    /// Loads the ggml model at `config.model_path`.
    ///
    /// # Errors
    /// `TranscriptionModelNotFound` if the file is missing, `Transcription`
    /// if whisper.cpp rejects it.
    pub fn new(config: TranscriberConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(VoxloopError::TranscriptionModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = config
            .model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| VoxloopError::Transcription {
                message: "Invalid UTF-8 in model path".to_string(),
            })?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| VoxloopError::Transcription {
                message: format!("Failed to load Whisper model: {e}"),
            })?;

        tracing::info!(model = %model_name, language = %config.language, "whisper model loaded");
        Ok(Self {
            context: Mutex::new(context),
            config,
            threads: None,
            model_name,
        })
    }

    /// Limit inference threads (default: whisper.cpp's choice).
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// i16 PCM to f32 in `[-1.0, 1.0)`, as whisper expects.
    fn convert_audio(samples: &[i16]) -> Vec<f32> {
        samples
            .iter()
            .map(|&sample| sample as f32 / 32768.0)
            .collect()
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String> {
        let audio = if sample_rate == WHISPER_RATE {
            Self::convert_audio(audio)
        } else {
            Self::convert_audio(&resample(audio, sample_rate, WHISPER_RATE))
        };

        let context = self.context.lock().map_err(|e| VoxloopError::Transcription {
            message: format!("Failed to acquire context lock: {e}"),
        })?;
        let mut state = context
            .create_state()
            .map_err(|e| VoxloopError::Transcription {
                message: format!("Failed to create Whisper state: {e}"),
            })?;

        let mut params = FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: BEAM_SIZE,
            patience: -1.0,
        });
        if self.config.language == defaults::AUTO_LANGUAGE {
            params.set_language(None);
        } else {
            params.set_language(Some(&self.config.language));
        }
        if let Some(threads) = self.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio)
            .map_err(|e| VoxloopError::Transcription {
                message: format!("Whisper inference failed: {e}"),
            })?;

        let language = whisper_rs::get_lang_str(state.full_lang_id_from_state()).unwrap_or("");
        let text = state
            .as_iter()
            .map(|segment| segment.to_string().trim().to_string())
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        tracing::debug!(language, chars = text.len(), "utterance transcribed");
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_model_is_reported() {
        let config = TranscriberConfig {
            model_path: PathBuf::from("/nonexistent/ggml-none.bin"),
            language: "auto".to_string(),
        };
        match WhisperTranscriber::new(config) {
            Err(VoxloopError::TranscriptionModelNotFound { path }) => {
                assert!(path.contains("ggml-none.bin"));
            }
            other => panic!("expected TranscriptionModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_convert_audio_range() {
        let converted = WhisperTranscriber::convert_audio(&[0, i16::MIN, 16384]);
        assert_eq!(converted, vec![0.0, -1.0, 0.5]);
    }
}
