//! Synthesis over HTTP against a GPT-SoVITS style API server.

use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::pipeline::types::AudioClip;
use crate::tts::synthesizer::{Synthesizer, VoiceProfile};
use reqwest::Url;
use std::time::Duration;

/// Blocking HTTP synthesis client.
///
/// Each fragment is one `GET {url}?text=...` returning a complete WAV file.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    url: Url,
    client: reqwest::blocking::Client,
}

impl HttpSynthesizer {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| VoxloopError::invalid("synthesis.url", e.to_string()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VoxloopError::Synthesis {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { url, client })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(
            defaults::TTS_URL,
            Duration::from_secs(defaults::TTS_TIMEOUT_SECS),
        )
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Full request URL for one fragment.
    pub fn request_url(&self, text: &str, voice: &VoiceProfile) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("text", text)
            .append_pair("text_lang", &voice.text_lang)
            .append_pair("ref_audio_path", &voice.ref_audio_path.to_string_lossy())
            .append_pair("prompt_lang", &voice.prompt_lang)
            .append_pair("prompt_text", &voice.prompt_text)
            .append_pair("speed_factor", &voice.speed_factor.to_string())
            .append_pair("text_split_method", &voice.text_split_method)
            .append_pair("media_type", "wav")
            .append_pair("parallel_infer", "true")
            .append_pair("streaming_mode", "false");
        url
    }
}

impl Synthesizer for HttpSynthesizer {
    fn synthesize(&self, text: &str, voice: &VoiceProfile) -> Result<AudioClip> {
        let response = self
            .client
            .get(self.request_url(text, voice))
            .send()
            .map_err(|e| VoxloopError::Synthesis {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(VoxloopError::Synthesis {
                message: format!("server returned {status}: {}", body.trim()),
            });
        }

        let bytes = response.bytes().map_err(|e| VoxloopError::Synthesis {
            message: format!("failed to read response body: {e}"),
        })?;
        tracing::debug!(bytes = bytes.len(), chars = text.chars().count(), "clip synthesized");
        Ok(AudioClip::new(bytes.to_vec()))
    }

    fn name(&self) -> &str {
        "http"
    }
}
