//! Microphone capture using cpal (Cross-Platform Audio Library).

use crate::audio::device::{Direction, SendableStream, f32_to_i16, find_device};
use crate::audio::source::AudioSource;
use crate::audio::wav::{downmix, resample};
use crate::defaults;
use crate::error::{Result, VoxloopError};
use cpal::traits::{DeviceTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// How long a freshly started stream gets to deliver its first callback.
const CALLBACK_PROBE: Duration = Duration::from_millis(200);

/// Audio kept while the capture thread is not reading.
const MAX_BUFFERED_SECS: usize = 5;

/// Samples written by the cpal callback, read by the capture thread.
struct Shared {
    state: Mutex<Captured>,
    ready: Condvar,
    callbacks: AtomicU64,
    /// Most samples held at once; older ones are dropped past this. Never
    /// below two of the frames being read.
    capacity: AtomicUsize,
}

#[derive(Default)]
struct Captured {
    samples: Vec<i16>,
    error: Option<String>,
    overflowing: bool,
}

impl Shared {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(Captured::default()),
            ready: Condvar::new(),
            callbacks: AtomicU64::new(0),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    fn push(&self, samples: &[i16]) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut state) = self.state.lock() {
            state.samples.extend_from_slice(samples);
            let capacity = self.capacity.load(Ordering::Relaxed);
            let excess = state.samples.len().saturating_sub(capacity);
            if excess > 0 {
                state.samples.drain(..excess);
                if !state.overflowing {
                    tracing::warn!(
                        capacity,
                        "capture reader is behind, dropping oldest audio"
                    );
                }
            }
            state.overflowing = excess > 0;
            self.ready.notify_one();
        }
    }

    fn fail(&self, message: String) {
        if let Ok(mut state) = self.state.lock() {
            state.error.get_or_insert(message);
            self.ready.notify_one();
        }
    }

    fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.samples.clear();
            state.error = None;
            state.overflowing = false;
        }
    }
}

/// Real microphone implementation using cpal.
///
/// Captures mono i16 at the configured rate. Tries the preferred format first
/// (i16/mono), then f32/mono, then the device's default config with software
/// conversion (channel mixing + resampling).
pub struct CpalAudioSource {
    device: cpal::Device,
    device_name: String,
    stream: Option<SendableStream>,
    shared: Arc<Shared>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Looks up the device. Nothing is opened until [`AudioSource::start`].
    ///
    /// # Errors
    /// `AudioDeviceNotFound` if the named device (or any default) is missing.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(device_name, Direction::Input)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::debug!(device = %device_name, sample_rate, "input device selected");

        Ok(Self {
            device,
            device_name,
            stream: None,
            shared: Arc::new(Shared::new(sample_rate as usize * MAX_BUFFERED_SECS)),
            sample_rate,
        })
    }

    /// Default device at the default capture rate.
    pub fn default_device() -> Result<Self> {
        Self::new(None, defaults::CAPTURE_SAMPLE_RATE)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn error_callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static + use<> {
        let shared = Arc::clone(&self.shared);
        move |err| {
            tracing::error!("input stream error: {err}");
            shared.fail(err.to_string());
        }
    }

    /// Build the stream at the configured rate, mono.
    ///
    /// Tries i16 first, then f32, then falls back to the native config.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::clone(&self.shared);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[i16], _: &cpal::InputCallbackInfo| shared.push(data),
            self.error_callback(),
            None,
        ) {
            return Ok(stream);
        }

        let shared = Arc::clone(&self.shared);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let converted: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                shared.push(&converted);
            },
            self.error_callback(),
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Build a stream using the device's default config, with software
    /// channel mixing and resampling to the configured rate.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| VoxloopError::AudioCapture {
                    message: format!("Failed to query default input config: {e}"),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels();
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.config();

        tracing::info!(
            device = %self.device_name,
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let convert = move |samples: &[i16]| {
            resample(&downmix(samples, native_channels), native_rate, target_rate)
        };
        let shared = Arc::clone(&self.shared);

        let stream = match default_config.sample_format() {
            SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| shared.push(&convert(data)),
                self.error_callback(),
                None,
            ),
            SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                    shared.push(&convert(&i16_data));
                },
                self.error_callback(),
                None,
            ),
            fmt => {
                return Err(VoxloopError::AudioCapture {
                    message: format!(
                        "Unsupported native sample format: {fmt:?}. Try choosing another input device."
                    ),
                });
            }
        };

        stream.map_err(|e| VoxloopError::AudioCapture {
            message: format!("Failed to build native input stream: {e}"),
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.shared.clear();
        self.shared.callbacks.store(0, Ordering::Relaxed);

        let stream = self.build_stream()?;
        stream.play().map_err(|e| VoxloopError::AudioCapture {
            message: format!("Failed to start audio stream: {e}"),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never
        // deliver data; give the callback a moment to prove itself.
        std::thread::sleep(CALLBACK_PROBE);

        let stream = if self.shared.callbacks.load(Ordering::Relaxed) == 0 {
            drop(stream);
            self.shared.clear();

            let native = self.build_stream_native()?;
            native.play().map_err(|e| VoxloopError::AudioCapture {
                message: format!("Failed to start native audio stream: {e}"),
            })?;
            native
        } else {
            stream
        };

        self.stream = Some(SendableStream(stream));
        tracing::debug!(device = %self.device_name, "input stream started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.0.pause();
            drop(stream);
            self.shared.clear();
            paused.map_err(|e| VoxloopError::AudioCapture {
                message: format!("Failed to stop audio stream: {e}"),
            })?;
            tracing::debug!(device = %self.device_name, "input stream closed");
        }
        Ok(())
    }

    fn read_frame(&mut self, frame_len: usize, timeout: Duration) -> Result<Option<Vec<i16>>> {
        if self.stream.is_none() {
            return Err(VoxloopError::AudioCapture {
                message: "input stream is not running".to_string(),
            });
        }

        self.shared
            .capacity
            .fetch_max(frame_len.saturating_mul(2), Ordering::Relaxed);
        let guard = self.shared.state.lock().map_err(|e| VoxloopError::AudioCapture {
            message: format!("Failed to lock audio buffer: {e}"),
        })?;
        let (mut state, _) = self
            .shared
            .ready
            .wait_timeout_while(guard, timeout, |s| {
                s.error.is_none() && s.samples.len() < frame_len
            })
            .map_err(|e| VoxloopError::AudioCapture {
                message: format!("Failed to wait for audio: {e}"),
            })?;

        if let Some(message) = state.error.take() {
            return Err(VoxloopError::AudioCapture { message });
        }
        if state.samples.len() < frame_len {
            return Ok(None);
        }
        let rest = state.samples.split_off(frame_len);
        Ok(Some(std::mem::replace(&mut state.samples, rest)))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalAudioSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("closing input device: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_buffer_collects_and_clears() {
        let shared = Shared::new(16);
        shared.push(&[1, 2, 3]);
        shared.push(&[4]);
        assert_eq!(shared.callbacks.load(Ordering::Relaxed), 2);
        assert_eq!(shared.state.lock().unwrap().samples, vec![1, 2, 3, 4]);

        shared.fail("gone".to_string());
        shared.fail("second".to_string());
        assert_eq!(
            shared.state.lock().unwrap().error.as_deref(),
            Some("gone")
        );

        shared.clear();
        let state = shared.state.lock().unwrap();
        assert!(state.samples.is_empty());
        assert!(state.error.is_none());
    }

    #[test]
    fn test_shared_buffer_drops_oldest_past_capacity() {
        let shared = Shared::new(4);
        shared.push(&[1, 2, 3]);
        shared.push(&[4, 5, 6]);
        {
            let state = shared.state.lock().unwrap();
            assert_eq!(state.samples, vec![3, 4, 5, 6]);
            assert!(state.overflowing);
        }

        shared.state.lock().unwrap().samples.clear();
        shared.push(&[7]);
        let state = shared.state.lock().unwrap();
        assert_eq!(state.samples, vec![7]);
        assert!(!state.overflowing);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_start_read_stop() {
        let mut source = CpalAudioSource::default_device().unwrap();
        source.start().unwrap();
        let frame = source
            .read_frame(1600, Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(frame.len(), 1600);
        source.stop().unwrap();
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_start_stop_multiple_times() {
        let mut source = CpalAudioSource::default_device().unwrap();
        for _ in 0..3 {
            source.start().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            source.stop().unwrap();
        }
    }

    #[test]
    fn test_read_before_start_fails() {
        if let Ok(mut source) = CpalAudioSource::default_device() {
            assert!(source.read_frame(16, Duration::from_millis(1)).is_err());
        }
    }
}
