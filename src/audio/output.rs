//! Speaker-side device abstraction.

use crate::defaults;
use crate::error::{Result, VoxloopError};
use crate::pipeline::types::{ms_to_samples, samples_duration};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Output device consumed by the playback worker.
///
/// Owned by exactly one playback thread while open.
pub trait AudioSink: Send {
    /// Opens (or resumes) the device.
    fn start(&mut self) -> Result<()>;

    /// Writes mono samples, blocking at real-time pace until the device has
    /// accepted them.
    ///
    /// `interrupted` is polled while waiting; once it returns true the write
    /// stops early. Returns how many samples were accepted.
    fn write(&mut self, samples: &[i16], interrupted: &dyn Fn() -> bool) -> Result<usize>;

    /// Discards audio accepted but not yet played.
    fn flush(&mut self) -> Result<()>;

    /// Stops output immediately and releases the device.
    fn stop(&mut self) -> Result<()>;

    /// Rate the samples passed to [`AudioSink::write`] must have.
    fn sample_rate(&self) -> u32;
}

/// Everything a [`MockAudioSink`] observed, readable from the test thread.
#[derive(Debug, Default)]
pub struct MockSinkLog {
    samples: Mutex<Vec<i16>>,
    writes: AtomicUsize,
    flushes: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    open: AtomicBool,
}

impl MockSinkLog {
    /// All samples accepted since creation, in order.
    pub fn samples(&self) -> Vec<i16> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sample_count(&self) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of `write` calls that accepted at least one sample.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Mock output device for testing.
///
/// Records every accepted sample. Without pacing, writes return at once;
/// with [`MockAudioSink::with_realtime`] they take as long as the audio lasts.
#[derive(Debug)]
pub struct MockAudioSink {
    sample_rate: u32,
    pace: Option<f32>,
    fail_start: bool,
    fail_write_on: Vec<usize>,
    write_calls: usize,
    log: Arc<MockSinkLog>,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self {
            sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            pace: None,
            fail_start: false,
            fail_write_on: Vec::new(),
            write_calls: 0,
            log: Arc::new(MockSinkLog::default()),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Block writes for the audio's duration divided by `speed`.
    pub fn with_realtime(mut self, speed: f32) -> Self {
        self.pace = Some(speed.max(f32::EPSILON));
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail the `n`th `write` call (0-based) without accepting anything.
    pub fn with_write_failure_on(mut self, n: usize) -> Self {
        self.fail_write_on.push(n);
        self
    }

    pub fn log(&self) -> Arc<MockSinkLog> {
        Arc::clone(&self.log)
    }

    fn accept(&self, chunk: &[i16]) {
        self.log
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
    }
}

impl Default for MockAudioSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for MockAudioSink {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(VoxloopError::AudioDeviceNotFound {
                device: "mock output".to_string(),
            });
        }
        if self.log.open.swap(true, Ordering::SeqCst) {
            return Err(VoxloopError::AudioPlayback {
                message: "device already open".to_string(),
            });
        }
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn write(&mut self, samples: &[i16], interrupted: &dyn Fn() -> bool) -> Result<usize> {
        let call = self.write_calls;
        self.write_calls += 1;

        if !self.log.is_open() {
            return Err(VoxloopError::AudioPlayback {
                message: "write to closed device".to_string(),
            });
        }
        if self.fail_write_on.contains(&call) {
            return Err(VoxloopError::AudioPlayback {
                message: format!("mock write failure on call {call}"),
            });
        }
        if samples.is_empty() {
            return Ok(0);
        }

        let Some(speed) = self.pace else {
            if interrupted() {
                return Ok(0);
            }
            self.accept(samples);
            self.log.writes.fetch_add(1, Ordering::SeqCst);
            return Ok(samples.len());
        };

        // 10ms slices so an interrupt lands quickly
        let slice = ms_to_samples(10, self.sample_rate).max(1);
        let mut written = 0;
        for chunk in samples.chunks(slice) {
            if interrupted() {
                break;
            }
            let wait = samples_duration(chunk.len(), self.sample_rate).div_f32(speed);
            std::thread::sleep(wait.min(Duration::from_millis(50)));
            self.accept(chunk);
            written += chunk.len();
        }
        if written > 0 {
            self.log.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(written)
    }

    fn flush(&mut self) -> Result<()> {
        self.log.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.log.open.swap(false, Ordering::SeqCst) {
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
