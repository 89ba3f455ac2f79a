//! Speaker output using cpal.

use crate::audio::device::{Direction, SendableStream, find_device};
use crate::audio::output::AudioSink;
use crate::audio::wav::resample;
use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::pipeline::types::ms_to_samples;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Samples queued for the cpal callback.
///
/// Bounded so the writer blocks at real-time pace and an interrupt only has
/// to discard a few milliseconds of audio.
struct Ring {
    state: Mutex<Pending>,
    drained: Condvar,
    capacity: usize,
}

struct Pending {
    samples: VecDeque<i16>,
    error: Option<String>,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(Pending {
                samples: VecDeque::with_capacity(capacity),
                error: None,
            }),
            drained: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    /// Output callback body: one queued sample per frame, copied to every
    /// channel, silence once the queue runs dry.
    fn fill<T>(&self, data: &mut [T], channels: usize)
    where
        T: SizedSample + FromSample<i16>,
    {
        let Ok(mut state) = self.state.lock() else {
            data.fill(T::EQUILIBRIUM);
            return;
        };
        for frame in data.chunks_mut(channels.max(1)) {
            let value = state
                .samples
                .pop_front()
                .map_or(T::EQUILIBRIUM, T::from_sample);
            frame.fill(value);
        }
        self.drained.notify_all();
    }

    fn fail(&self, message: String) {
        if let Ok(mut state) = self.state.lock() {
            state.error.get_or_insert(message);
        }
        self.drained.notify_all();
    }

    fn clear(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.samples.clear();
            state.error = None;
        }
    }
}

/// Real speaker implementation using cpal.
///
/// Opens mono i16 at the playback rate, then f32 mono, then the device's
/// native configuration (samples duplicated across channels, resampled to
/// the native rate).
pub struct CpalAudioSink {
    device: cpal::Device,
    device_name: String,
    stream: Option<SendableStream>,
    ring: Arc<Ring>,
    sample_rate: u32,
    device_rate: u32,
}

impl CpalAudioSink {
    /// Looks up the device. Nothing is opened until [`AudioSink::start`].
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(device_name, Direction::Output)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::debug!(device = %device_name, sample_rate, "output device selected");

        let capacity = ms_to_samples(defaults::OUTPUT_BUFFER_MS, sample_rate);
        Ok(Self {
            device,
            device_name,
            stream: None,
            ring: Arc::new(Ring::new(capacity)),
            sample_rate,
            device_rate: sample_rate,
        })
    }

    pub fn default_device() -> Result<Self> {
        Self::new(None, defaults::PLAYBACK_SAMPLE_RATE)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn build<T>(&self, config: &cpal::StreamConfig) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<i16>,
    {
        let ring = Arc::clone(&self.ring);
        let err_ring = Arc::clone(&self.ring);
        let channels = config.channels as usize;

        self.device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| ring.fill(data, channels),
                move |err| {
                    tracing::error!("output stream error: {err}");
                    err_ring.fail(err.to_string());
                },
                None,
            )
            .map_err(|e| VoxloopError::AudioPlayback {
                message: format!("Failed to build output stream: {e}"),
            })
    }

    /// Returns the stream and the rate it actually runs at.
    fn build_stream(&self) -> Result<(cpal::Stream, u32)> {
        let preferred = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        if let Ok(stream) = self.build::<i16>(&preferred) {
            return Ok((stream, self.sample_rate));
        }
        if let Ok(stream) = self.build::<f32>(&preferred) {
            return Ok((stream, self.sample_rate));
        }

        let native = self
            .device
            .default_output_config()
            .map_err(|e| VoxloopError::AudioPlayback {
                message: format!("Failed to query default output config: {e}"),
            })?;
        let config = native.config();
        tracing::info!(
            device = %self.device_name,
            channels = config.channels,
            rate = config.sample_rate.0,
            format = ?native.sample_format(),
            "using native output format, converting in software"
        );

        let stream = match native.sample_format() {
            cpal::SampleFormat::I16 => self.build::<i16>(&config)?,
            cpal::SampleFormat::F32 => self.build::<f32>(&config)?,
            cpal::SampleFormat::U16 => self.build::<u16>(&config)?,
            fmt => {
                return Err(VoxloopError::AudioPlayback {
                    message: format!("Unsupported native sample format: {fmt:?}"),
                });
            }
        };
        Ok((stream, config.sample_rate.0))
    }
}

impl AudioSink for CpalAudioSink {
    fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.ring.clear();

        let (stream, device_rate) = self.build_stream()?;
        stream.play().map_err(|e| VoxloopError::AudioPlayback {
            message: format!("Failed to start output stream: {e}"),
        })?;

        self.device_rate = device_rate;
        self.stream = Some(SendableStream(stream));
        tracing::debug!(device = %self.device_name, device_rate, "output stream started");
        Ok(())
    }

    fn write(&mut self, samples: &[i16], interrupted: &dyn Fn() -> bool) -> Result<usize> {
        if self.stream.is_none() {
            return Err(VoxloopError::AudioPlayback {
                message: "output stream is not running".to_string(),
            });
        }

        let converted;
        let data = if self.device_rate == self.sample_rate {
            samples
        } else {
            converted = resample(samples, self.sample_rate, self.device_rate);
            &converted[..]
        };

        let mut written = 0;
        while written < data.len() {
            if interrupted() {
                break;
            }

            let state = self.ring.state.lock().map_err(|e| VoxloopError::AudioPlayback {
                message: format!("Failed to lock output buffer: {e}"),
            })?;
            let (mut state, _) = self
                .ring
                .drained
                .wait_timeout_while(state, Duration::from_millis(10), |s| {
                    s.error.is_none() && s.samples.len() >= self.ring.capacity
                })
                .map_err(|e| VoxloopError::AudioPlayback {
                    message: format!("Failed to wait for output buffer: {e}"),
                })?;

            if let Some(message) = state.error.take() {
                return Err(VoxloopError::AudioPlayback { message });
            }

            let space = self.ring.capacity.saturating_sub(state.samples.len());
            let end = (written + space).min(data.len());
            state.samples.extend(&data[written..end]);
            written = end;
        }

        // Report progress in caller samples
        if data.len() == samples.len() {
            Ok(written)
        } else {
            Ok(written * samples.len() / data.len().max(1))
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.ring.clear();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let paused = stream.0.pause();
            drop(stream);
            self.ring.clear();
            paused.map_err(|e| VoxloopError::AudioPlayback {
                message: format!("Failed to stop output stream: {e}"),
            })?;
            tracing::debug!(device = %self.device_name, "output stream closed");
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("closing output device: {e}");
        }
    }
}
