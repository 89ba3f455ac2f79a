//! Command-line interface for voxloop
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Real-time voice loop: segmented listening and cross-faded speech
#[derive(Parser, Debug)]
#[command(name = "voxloop", version, about = "Real-time voice loop for chat companions")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input and output devices
    Devices,

    /// Transcribe speech from the microphone until Enter is pressed
    Listen {
        /// Stop after this long (e.g., 30s, 5m, 1h30m)
        #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Print transcript events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Speak text through the synthesis service
    Say {
        /// Only speak quoted or bracketed spans
        #[arg(long)]
        dialogue_only: bool,

        /// Text to speak; joined with spaces and split into sentences
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Play WAV files back to back with cross-fade
    Play {
        /// WAV files, played in order
        #[arg(required = true, value_name = "WAV")]
        files: Vec<PathBuf>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`, plus bare numbers as
/// seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
