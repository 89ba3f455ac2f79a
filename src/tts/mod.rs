//! Text-to-speech capability and reply text feeding.

#[cfg(feature = "http-tts")]
pub mod http;
pub mod synthesizer;
pub mod text;

#[cfg(feature = "http-tts")]
pub use http::HttpSynthesizer;
pub use synthesizer::{MockSynthesizer, Synthesizer, VoiceProfile};
pub use text::{SentenceBuffer, extract_dialogue, split_sentences};
