//! Audio devices, classification, segmentation and clip processing.

pub mod classifier;
pub mod crossfade;
pub mod output;
pub mod segmenter;
pub mod source;
pub mod wav;

#[cfg(feature = "cpal-audio")]
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod device;
#[cfg(feature = "cpal-audio")]
pub mod speaker;

pub use classifier::{EnergyClassifier, FrameClassifier};
pub use crossfade::CrossFader;
pub use output::{AudioSink, MockAudioSink};
pub use segmenter::{SegmentState, SegmentationConfig, SegmentationEngine};
pub use source::{AudioSource, MockAudioSource};
