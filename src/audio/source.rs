use crate::defaults;
use crate::error::{Result, VoxloopError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Trait for microphone-like input devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
/// A source is owned by exactly one capture thread while it is open.
pub trait AudioSource: Send {
    /// Opens the device and starts capturing.
    fn start(&mut self) -> Result<()>;

    /// Stops capturing and releases the device.
    fn stop(&mut self) -> Result<()>;

    /// Blocks until `frame_len` mono samples are available or `timeout`
    /// passes.
    ///
    /// # Returns
    /// `Ok(Some(samples))` with one frame, `Ok(None)` if the timeout passed
    /// first, or an error if the device failed.
    fn read_frame(&mut self, frame_len: usize, timeout: Duration) -> Result<Option<Vec<i16>>>;

    /// Sample rate of the frames returned by [`AudioSource::read_frame`].
    fn sample_rate(&self) -> u32;
}

/// Counters shared between a [`MockAudioSource`] and the test observing it.
#[derive(Debug, Default)]
pub struct MockSourceStats {
    opens: AtomicUsize,
    closes: AtomicUsize,
    reads: AtomicUsize,
    open: AtomicBool,
}

impl MockSourceStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Frames handed out so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Mock audio source for testing.
///
/// Plays back a script of frames, then behaves like a quiet device: each
/// read waits out its timeout and returns `Ok(None)`, or returns silence if
/// configured with [`MockAudioSource::with_silence_after_script`].
#[derive(Debug)]
pub struct MockAudioSource {
    sample_rate: u32,
    frames: VecDeque<Vec<i16>>,
    frame_delay: Duration,
    silence_after_script: bool,
    fail_start: bool,
    fail_read_after: Option<usize>,
    error_message: String,
    stats: Arc<MockSourceStats>,
}

impl MockAudioSource {
    pub fn new() -> Self {
        Self {
            sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            frames: VecDeque::new(),
            frame_delay: Duration::ZERO,
            silence_after_script: false,
            fail_start: false,
            fail_read_after: None,
            error_message: "mock audio error".to_string(),
            stats: Arc::new(MockSourceStats::default()),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Frames returned in order, one per read, whatever length is requested.
    pub fn with_frames(mut self, frames: impl IntoIterator<Item = Vec<i16>>) -> Self {
        self.frames.extend(frames);
        self
    }

    /// Sleep this long before returning each scripted frame, like a real
    /// device filling its buffer (capped at the read timeout).
    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    /// Once the script is exhausted, return zero-filled frames instead of
    /// timing out.
    pub fn with_silence_after_script(mut self) -> Self {
        self.silence_after_script = true;
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail every read after `frames` successful ones.
    pub fn with_read_failure_after(mut self, frames: usize) -> Self {
        self.fail_read_after = Some(frames);
        self
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Counters that stay readable after the source is boxed and moved.
    pub fn stats(&self) -> Arc<MockSourceStats> {
        Arc::clone(&self.stats)
    }

    fn error(&self) -> VoxloopError {
        VoxloopError::AudioCapture {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(VoxloopError::AudioDeviceNotFound {
                device: self.error_message.clone(),
            });
        }
        if self.stats.open.swap(true, Ordering::SeqCst) {
            return Err(VoxloopError::AudioCapture {
                message: "device already open".to_string(),
            });
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.stats.open.swap(false, Ordering::SeqCst) {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn read_frame(&mut self, frame_len: usize, timeout: Duration) -> Result<Option<Vec<i16>>> {
        if !self.stats.is_open() {
            return Err(VoxloopError::AudioCapture {
                message: "read from closed device".to_string(),
            });
        }
        if self
            .fail_read_after
            .is_some_and(|limit| self.stats.reads() >= limit)
        {
            return Err(self.error());
        }

        let frame = match self.frames.pop_front() {
            Some(frame) => frame,
            None if self.silence_after_script => vec![0; frame_len],
            None => {
                std::thread::sleep(timeout);
                return Ok(None);
            }
        };

        if !self.frame_delay.is_zero() {
            std::thread::sleep(self.frame_delay.min(timeout));
        }
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Ok(Some(frame))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
