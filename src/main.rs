use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use voxloop::audio::device::{list_input_devices, list_output_devices, suppress_audio_warnings};
use voxloop::audio::speaker::CpalAudioSink;
use voxloop::audio::wav::read_wav_file;
use voxloop::cli::{Cli, Commands, ConfigAction};
use voxloop::config::Config;
use voxloop::defaults;
use voxloop::pipeline::{AudioClip, PlaybackEngine, SpeakSession};
use voxloop::tts::{HttpSynthesizer, split_sentences};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise -q/-v pick the level.
fn init_tracing(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "voxloop=debug,info",
        _ => "voxloop=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    tracing::debug!(version = %voxloop::version_string(), "starting");
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Devices => list_audio_devices(),
        Commands::Listen { duration, json } => {
            let config = load_config(cli.config.as_deref())?;
            listen::run(&config, duration, json, cli.quiet)
        }
        Commands::Say {
            dialogue_only,
            text,
        } => {
            let config = load_config(cli.config.as_deref())?;
            say(&config, &text.join(" "), dialogue_only, cli.quiet)
        }
        Commands::Play { files } => {
            let config = load_config(cli.config.as_deref())?;
            play(&config, &files, cli.quiet)
        }
        Commands::Config { action } => handle_config_command(action, cli.config.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "voxloop", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/voxloop/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides apply on top of all three.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn config_path(custom_path: Option<&Path>) -> Result<PathBuf> {
    match custom_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(Config::default_path()?),
    }
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            let text = toml::to_string_pretty(&config).context("serializing configuration")?;
            print!("{text}");
        }
        ConfigAction::Path => {
            let path = config_path(custom_path)?;
            let marker = if path.exists() { "" } else { " (not created)" };
            println!("{}{}", path.display(), marker.dimmed());
        }
    }
    Ok(())
}

/// List audio input and output devices.
fn list_audio_devices() -> Result<()> {
    suppress_audio_warnings();
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    if inputs.is_empty() && outputs.is_empty() {
        bail!("No audio devices found");
    }

    println!("{}", "Input devices:".bold());
    print_devices(&inputs);
    println!("{}", "Output devices:".bold());
    print_devices(&outputs);
    Ok(())
}

fn print_devices(devices: &[String]) {
    if devices.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
}

fn say(config: &Config, text: &str, dialogue_only: bool, quiet: bool) -> Result<()> {
    let sentences = split_sentences(text, dialogue_only);
    if sentences.is_empty() {
        bail!("Nothing to say");
    }

    suppress_audio_warnings();
    let synthesizer = HttpSynthesizer::new(
        &config.synthesis.url,
        Duration::from_secs(config.synthesis.timeout_secs),
    )?;
    let sink = CpalAudioSink::new(config.playback.device.as_deref(), config.playback.sample_rate)?;
    let mut session = SpeakSession::new(
        Arc::new(synthesizer),
        config.synthesis.voice.clone(),
        Box::new(sink),
        config.speak_options(),
    )?;
    session.start()?;

    for sentence in &sentences {
        if !quiet {
            eprintln!("{} {}", "»".cyan(), sentence);
        }
        // Full text queue: wait for the worker to catch up
        while !sentence.trim().is_empty() && !session.say(sentence) {
            if !session.is_running() {
                bail!("synthesis stopped before all text was queued");
            }
            std::thread::sleep(config.poll_interval());
        }
    }

    wait_drained(|| session.is_idle(), config.poll_interval());
    session.stop();
    Ok(())
}

/// Plays local WAV files through the same playback path synthesized speech
/// uses.
fn play(config: &Config, files: &[PathBuf], quiet: bool) -> Result<()> {
    suppress_audio_warnings();
    let sink = CpalAudioSink::new(config.playback.device.as_deref(), config.playback.sample_rate)?;
    let mut engine = PlaybackEngine::new(
        Box::new(sink),
        config.playback.tail_ms,
        config.runtime.clip_queue,
        config.poll_interval(),
    )?;
    engine.start()?;
    let clips = engine.clip_sender();

    for path in files {
        let samples = read_wav_file(path, config.playback.sample_rate)
            .with_context(|| format!("reading {}", path.display()))?;
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if !quiet {
            let secs = samples.len() as f64 / f64::from(config.playback.sample_rate);
            eprintln!("{} {} ({:.2} s)", "▶".green(), path.display(), secs);
        }
        // Blocks while the queue is full; playback keeps draining it
        if clips
            .send_timeout(AudioClip::from(bytes), Duration::from_secs(3600))
            .is_err()
        {
            bail!("playback stopped before {} was queued", path.display());
        }
    }

    wait_drained(|| engine.queued() == 0 && !engine.is_busy(), config.poll_interval());
    engine.stop();
    Ok(())
}

/// Waits until `idle` holds on two checks one poll interval apart, then
/// lets the device buffer run out.
fn wait_drained(idle: impl Fn() -> bool, poll: Duration) {
    let mut confirmed = 0;
    while confirmed < 2 {
        if idle() {
            confirmed += 1;
        } else {
            confirmed = 0;
        }
        std::thread::sleep(poll);
    }
    std::thread::sleep(Duration::from_millis(u64::from(defaults::OUTPUT_BUFFER_MS)));
}

#[cfg(feature = "whisper")]
mod listen {
    use super::*;
    use crossbeam_channel::{RecvTimeoutError, bounded};
    use voxloop::audio::capture::CpalAudioSource;
    use voxloop::audio::classifier::EnergyClassifier;
    use voxloop::audio::segmenter::SegmentationEngine;
    use voxloop::pipeline::{ListenSession, TranscriptEvent};
    use std::time::Instant;
    use voxloop::stt::WhisperTranscriber;

    pub fn run(config: &Config, duration: Option<Duration>, json: bool, quiet: bool) -> Result<()> {
        suppress_audio_warnings();
        let transcriber = WhisperTranscriber::new(config.transcriber_config())?;
        let classifier = EnergyClassifier::new(config.segmentation.energy_threshold)?;
        let engine = SegmentationEngine::new(config.segmentation_config(), Box::new(classifier))?;
        let source =
            CpalAudioSource::new(config.capture.device.as_deref(), config.capture.sample_rate)?;

        let mut session = ListenSession::new(
            Box::new(source),
            engine,
            Arc::new(transcriber),
            config.listen_options(),
        )?;
        let transcripts = session.transcripts();
        let errors = session.errors();
        session.start()?;

        if !quiet {
            eprintln!("{}", "Listening. Press Enter to stop.".dimmed());
        }

        // Enter on stdin stops the session
        let (enter_tx, enter_rx) = bounded::<()>(1);
        std::thread::spawn(move || {
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_ok() {
                enter_tx.try_send(()).ok();
            }
        });

        let deadline = duration.map(|d| Instant::now() + d);
        let poll = config.poll_interval();
        let outcome = loop {
            if enter_rx.try_recv().is_ok() {
                break Ok(());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break Ok(());
            }
            if let Ok(e) = errors.try_recv() {
                break Err(anyhow::Error::new(e).context("capture stopped"));
            }
            match transcripts.recv_timeout(poll) {
                Ok(event) => print_event(&event, json, quiet)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break Ok(()),
            }
        };

        session.stop();
        // Transcripts finished while stopping
        while let Ok(event) = transcripts.try_recv() {
            print_event(&event, json, quiet)?;
        }
        outcome
    }

    fn print_event(event: &TranscriptEvent, json: bool, quiet: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string(event)?);
            return Ok(());
        }
        match event {
            TranscriptEvent::Started { sequence } if !quiet => {
                eprintln!("{}", format!("[{sequence}] speech").dimmed());
            }
            TranscriptEvent::Text { text, .. } if !text.is_empty() => println!("{text}"),
            _ => {}
        }
        Ok(())
    }
}

#[cfg(not(feature = "whisper"))]
mod listen {
    use super::{Config, Duration, Result, bail};

    pub fn run(_config: &Config, _duration: Option<Duration>, _json: bool, _quiet: bool) -> Result<()> {
        bail!("`listen` needs a build with the `whisper` feature (cargo build --features whisper)")
    }
}
