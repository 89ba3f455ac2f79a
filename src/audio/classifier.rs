//! Speech/non-speech classification of short audio sub-frames.

use crate::defaults;
use crate::error::{Result, VoxloopError};

/// Decides whether one short sub-frame of mono PCM contains speech.
///
/// Called from the capture thread only, so implementations may keep state.
pub trait FrameClassifier: Send {
    fn classify(&mut self, samples: &[i16], sample_rate: u32) -> Result<bool>;
}

/// Closures work as classifiers, mostly for tests and quick experiments.
impl<F> FrameClassifier for F
where
    F: FnMut(&[i16], u32) -> Result<bool> + Send,
{
    fn classify(&mut self, samples: &[i16], sample_rate: u32) -> Result<bool> {
        self(samples, sample_rate)
    }
}

/// RMS energy gate: a sub-frame is speech when its level reaches the threshold.
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    threshold: f32,
}

impl EnergyClassifier {
    /// `threshold` is a normalized RMS level in `[0.0, 1.0]`.
    pub fn new(threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(VoxloopError::invalid(
                "energy_threshold",
                format!("{threshold} is outside 0.0..=1.0"),
            ));
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EnergyClassifier {
    fn default() -> Self {
        Self {
            threshold: defaults::ENERGY_THRESHOLD,
        }
    }
}

impl FrameClassifier for EnergyClassifier {
    fn classify(&mut self, samples: &[i16], _sample_rate: u32) -> Result<bool> {
        if samples.is_empty() {
            return Err(VoxloopError::Classification {
                message: "empty sub-frame".to_string(),
            });
        }
        Ok(calculate_rms(samples) >= self.threshold)
    }
}

/// Calculates the Root Mean Square (RMS) level of audio samples.
///
/// The result is normalized to `[0.0, 1.0]`, where 1.0 is a full-scale signal.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_rms_silence() {
        assert_eq!(calculate_rms(&[0i16; 480]), 0.0);
    }

    #[test]
    fn test_calculate_rms_full_scale() {
        let rms = calculate_rms(&[i16::MAX; 480]);
        assert!((rms - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_calculate_rms_empty_samples() {
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_calculate_rms_mixed_sign() {
        let samples: Vec<i16> = (0..480).map(|i| if i % 2 == 0 { 16384 } else { -16384 }).collect();
        let rms = calculate_rms(&samples);
        assert!((rms - 0.5).abs() < 0.01, "rms = {rms}");
    }

    #[test]
    fn test_energy_classifier_threshold() {
        let mut classifier = EnergyClassifier::new(0.1).unwrap();
        assert!(!classifier.classify(&[100i16; 480], 16000).unwrap());
        assert!(classifier.classify(&[10000i16; 480], 16000).unwrap());
    }

    #[test]
    fn test_energy_classifier_rejects_empty() {
        let mut classifier = EnergyClassifier::default();
        assert!(classifier.classify(&[], 16000).is_err());
    }

    #[test]
    fn test_energy_classifier_invalid_threshold() {
        assert!(EnergyClassifier::new(1.5).is_err());
        assert!(EnergyClassifier::new(-0.1).is_err());
        assert!(EnergyClassifier::new(0.0).is_ok());
    }

    #[test]
    fn test_closure_classifier() {
        let mut calls = 0;
        let mut classifier = |samples: &[i16], _rate: u32| -> Result<bool> {
            calls += 1;
            Ok(samples[0] > 0)
        };
        assert!(classifier.classify(&[1], 16000).unwrap());
        assert!(!classifier.classify(&[0], 16000).unwrap());
        drop(classifier);
        assert_eq!(calls, 2);
    }
}
