#![cfg(feature = "whisper")]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use voxloop::audio::classifier::EnergyClassifier;
use voxloop::audio::segmenter::{SegmentationConfig, SegmentationEngine};
use voxloop::audio::source::MockAudioSource;
use voxloop::audio::wav::resample;
use voxloop::pipeline::session::ListenOptions;
use voxloop::pipeline::{ListenSession, TranscriptEvent};
use voxloop::stt::transcriber::{Transcriber, TranscriberConfig};
use voxloop::stt::whisper::WhisperTranscriber;

fn find_model() -> Option<PathBuf> {
    let path = std::env::var_os("VOXLOOP_MODEL")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(voxloop::defaults::MODEL_PATH));
    if path.exists() {
        Some(path)
    } else {
        eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
        eprintln!("║  NO WHISPER MODEL FOUND, SKIPPING WHISPER TESTS              ║");
        eprintln!("║                                                              ║");
        eprintln!("║  Point VOXLOOP_MODEL at a ggml model file to run them.       ║");
        eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
        None
    }
}

fn load(path: PathBuf) -> WhisperTranscriber {
    WhisperTranscriber::new(TranscriberConfig {
        model_path: path,
        language: "auto".to_string(),
    })
    .expect("Failed to load whisper model")
}

#[test]
fn test_silence_transcribes_without_error() {
    let Some(path) = find_model() else {
        return;
    };
    let transcriber = load(path);

    let text = transcriber
        .transcribe(&vec![0i16; 16000], 16000)
        .expect("Transcription of silence failed");
    assert!(text.len() < 200, "unexpectedly long output: {text:?}");
}

#[test]
fn test_non_native_rate_is_accepted() {
    let Some(path) = find_model() else {
        return;
    };
    let transcriber = load(path);

    let audio = resample(&vec![0i16; 16000], 16000, 48000);
    assert!(transcriber.transcribe(&audio, 48000).is_ok());
}

#[test]
fn test_listen_session_with_whisper_emits_ordered_events() {
    let Some(path) = find_model() else {
        return;
    };
    let transcriber = Arc::new(load(path));

    // A loud tone is speech to the energy classifier, whatever whisper hears
    let tone: Vec<i16> = (0..8000)
        .map(|i| ((i as f32 * 0.07).sin() * 8000.0) as i16)
        .collect();
    let source = MockAudioSource::new().with_frames([tone, vec![0; 16000]]);
    let engine = SegmentationEngine::new(
        SegmentationConfig::default(),
        Box::new(EnergyClassifier::default()),
    )
    .unwrap();

    let mut session =
        ListenSession::new(Box::new(source), engine, transcriber, ListenOptions::default())
            .unwrap();
    let transcripts = session.transcripts();
    session.start().unwrap();

    let events: Vec<TranscriptEvent> = (0..3)
        .map(|_| transcripts.recv_timeout(Duration::from_secs(60)).unwrap())
        .collect();
    assert_eq!(events[0], TranscriptEvent::Started { sequence: 0 });
    assert!(matches!(events[1], TranscriptEvent::Text { sequence: 0, .. }));
    assert_eq!(events[2], TranscriptEvent::Ended { sequence: 0 });
    session.stop();
}
