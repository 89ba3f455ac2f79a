//! WAV codec for synthesized clips.
//!
//! Clips arrive as complete WAV files from the synthesis service. Playback
//! needs mono 16-bit PCM at the speaker rate, so decoding also down-mixes and
//! resamples.

use crate::error::{Result, VoxloopError};
use std::io::{Cursor, Read};
use std::path::Path;

/// Decodes a WAV clip into mono i16 PCM at `target_rate`.
///
/// Accepts 8/16/24/32-bit integer and 32-bit float data with any channel
/// count and sample rate.
pub fn decode_clip(bytes: &[u8], target_rate: u32) -> Result<Vec<i16>> {
    let (samples, rate) = decode_mono(Cursor::new(bytes))?;
    Ok(resample(&samples, rate, target_rate))
}

/// Reads a WAV file from disk, converted like [`decode_clip`].
pub fn read_wav_file(path: &Path, target_rate: u32) -> Result<Vec<i16>> {
    let bytes = std::fs::read(path)?;
    decode_clip(&bytes, target_rate)
}

/// Encodes mono i16 PCM as a 16-bit WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(encode_error)?;
    for &sample in samples {
        writer.write_sample(sample).map_err(encode_error)?;
    }
    writer.finalize().map_err(encode_error)?;
    Ok(cursor.into_inner())
}

fn encode_error(e: hound::Error) -> VoxloopError {
    VoxloopError::Other(format!("Failed to encode WAV: {e}"))
}

fn decode_error(e: hound::Error) -> VoxloopError {
    VoxloopError::AudioDecode {
        message: e.to_string(),
    }
}

/// Returns mono samples and their sample rate.
fn decode_mono<R: Read>(reader: R) -> Result<(Vec<i16>, u32)> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(decode_error)?;
    let spec = wav_reader.spec();
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(VoxloopError::AudioDecode {
            message: format!(
                "unusable format: {} channel(s) at {} Hz",
                spec.channels, spec.sample_rate
            ),
        });
    }

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 8) => wav_reader
            .samples::<i8>()
            .map(|s| s.map(|v| i16::from(v) << 8))
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_error)?,
        (hound::SampleFormat::Int, 16) => wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_error)?,
        (hound::SampleFormat::Int, bits @ 17..=32) => {
            let shift = bits - 16;
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<_, _>>()
                .map_err(decode_error)?
        }
        (hound::SampleFormat::Float, 32) => wav_reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<std::result::Result<_, _>>()
            .map_err(decode_error)?,
        (format, bits) => {
            return Err(VoxloopError::AudioDecode {
                message: format!("unsupported sample format {format:?} with {bits} bits"),
            });
        }
    };

    Ok((downmix(&interleaved, spec.channels), spec.sample_rate))
}

/// Averages interleaved channels into one.
pub fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
