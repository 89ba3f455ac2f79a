//! Device discovery shared by the cpal microphone and speaker backends.

use crate::error::{Result, VoxloopError};
use cpal::traits::{DeviceTrait, HostTrait};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that cpal triggers
/// when probing audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/ALSA/PipeWire chatter during backend probing.
///
/// # Safety
/// Modifies environment variables; call at startup before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: called from main before any threads exist
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for desktop sound servers.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never a microphone or a voice speaker.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

pub(crate) fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Drops filtered names and marks preferred ones with "\[recommended\]".
fn present(names: impl Iterator<Item = String>) -> Vec<String> {
    names
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{name} [recommended]")
            } else {
                name
            }
        })
        .collect()
}

/// Which side of the sound card to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

fn devices(host: &cpal::Host, direction: Direction) -> Result<Vec<cpal::Device>> {
    let devices: std::result::Result<Vec<cpal::Device>, cpal::DevicesError> = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    };
    devices.map_err(|e| {
        let message = format!("Failed to enumerate {} devices: {e}", direction.label());
        match direction {
            Direction::Input => VoxloopError::AudioCapture { message },
            Direction::Output => VoxloopError::AudioPlayback { message },
        }
    })
}

/// Lists usable devices, with preferred ones marked "\[recommended\]".
pub fn list_devices(direction: Direction) -> Result<Vec<String>> {
    let found = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        devices(&host, direction)
    })?;
    Ok(present(found.iter().filter_map(|d| d.name().ok())))
}

pub fn list_input_devices() -> Result<Vec<String>> {
    list_devices(Direction::Input)
}

pub fn list_output_devices() -> Result<Vec<String>> {
    list_devices(Direction::Output)
}

/// Opens a device by exact name, or the best default if `name` is None.
///
/// The default prefers PipeWire, then PulseAudio, then the host default, so
/// the desktop's own device selection is respected.
pub(crate) fn find_device(name: Option<&str>, direction: Direction) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let all = devices(&host, direction)?;

        if let Some(wanted) = name {
            let wanted = wanted.trim_end_matches(" [recommended]");
            return all
                .into_iter()
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| VoxloopError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                });
        }

        if let Some(device) = all
            .into_iter()
            .find(|d| d.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        let fallback = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| VoxloopError::AudioDeviceNotFound {
            device: format!("default {}", direction.label()),
        })
    })
}

/// Wrapper for `cpal::Stream` to make it Send.
///
/// SAFETY: the stream is only touched by the thread that currently owns the
/// source or sink holding it; ownership moves between threads, access never
/// overlaps.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Converts float samples in `[-1.0, 1.0]` to i16.
pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("PulseAudio"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_present_filters_and_marks() {
        let names = ["pipewire", "HDMI 1", "default", "surround40"]
            .into_iter()
            .map(String::from);
        assert_eq!(
            present(names),
            vec!["pipewire [recommended]".to_string(), "default".to_string()]
        );
    }

    #[test]
    fn test_f32_to_i16_clamps() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.5), i16::MAX);
        assert_eq!(f32_to_i16(-1.5), -i16::MAX);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_filters_unusable() {
        for direction in [Direction::Input, Direction::Output] {
            for device in list_devices(direction).unwrap() {
                assert!(!device.to_lowercase().contains("hdmi"), "{device}");
            }
        }
    }

    #[test]
    fn test_find_unknown_device() {
        match find_device(Some("NonExistentDevice12345"), Direction::Input) {
            Err(VoxloopError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            // Hosts without any audio backend fail enumeration instead
            Err(VoxloopError::AudioCapture { .. }) => {}
            other => panic!("expected AudioDeviceNotFound, got {:?}", other.map(|_| ())),
        }
    }
}
