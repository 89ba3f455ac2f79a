//! Capture thread: microphone frames through segmentation into the
//! segment-event queue.

use crate::audio::segmenter::SegmentationEngine;
use crate::audio::source::AudioSource;
use crate::error::{Result, VoxloopError};
use crate::pipeline::queue::{StopToken, send_with_stop};
use crate::pipeline::station::{JoinOutcome, join_within};
use crate::pipeline::types::{AudioFrame, SegmentEvent, ms_to_samples};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::thread::JoinHandle;
use std::time::Duration;

/// Device errors that ended a capture run.
const ERROR_QUEUE: usize = 8;

type Parts = (Box<dyn AudioSource>, SegmentationEngine);

struct Worker {
    handle: JoinHandle<Parts>,
    stop: StopToken,
}

/// Owns the input device and the segmentation engine.
///
/// Both are moved into the capture thread on [`CaptureLoop::start`] and come
/// back when [`CaptureLoop::stop`] joins it, so the device is only ever
/// touched by one thread and sequence ids keep counting across runs.
pub struct CaptureLoop {
    parts: Option<Parts>,
    events: Sender<SegmentEvent>,
    errors: (Sender<VoxloopError>, Receiver<VoxloopError>),
    frame_ms: u32,
    poll: Duration,
    worker: Option<Worker>,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn AudioSource>,
        engine: SegmentationEngine,
        events: Sender<SegmentEvent>,
        frame_ms: u32,
        poll: Duration,
    ) -> Result<Self> {
        if frame_ms == 0 {
            return Err(VoxloopError::invalid("capture.frame_ms", "must be greater than 0"));
        }
        if poll.is_zero() {
            return Err(VoxloopError::invalid(
                "runtime.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        Ok(Self {
            parts: Some((source, engine)),
            events,
            errors: bounded(ERROR_QUEUE),
            frame_ms,
            poll,
            worker: None,
        })
    }

    /// Device failures that ended a run, one per failed run.
    pub fn errors(&self) -> Receiver<VoxloopError> {
        self.errors.1.clone()
    }

    /// True while the capture thread is alive. A device failure ends it
    /// without [`CaptureLoop::stop`] being called.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Opens the device and spawns the capture thread.
    ///
    /// A run that ended on a device failure is reclaimed first, so this
    /// reopens the device without an explicit [`CaptureLoop::stop`].
    ///
    /// # Errors
    /// Whatever the device returns when opened; the loop stays stopped and
    /// can be started again.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() && !self.is_running() {
            self.stop();
        }
        if self.worker.is_some() {
            return Ok(());
        }
        let (mut source, engine) = self.parts.take().ok_or_else(|| VoxloopError::AudioCapture {
            message: "input device is still held by an abandoned capture thread".to_string(),
        })?;

        if let Err(e) = source.start() {
            self.parts = Some((source, engine));
            return Err(e);
        }

        let stop = StopToken::new();
        let run = CaptureRun {
            events: self.events.clone(),
            errors: self.errors.0.clone(),
            frame_len: ms_to_samples(self.frame_ms, source.sample_rate()).max(1),
            read_timeout: self.poll / 2,
            stop: stop.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("voxloop-capture".to_string())
            .spawn(move || run.run(source, engine))?;

        tracing::debug!(frame_ms = self.frame_ms, "capture started");
        self.worker = Some(Worker { handle, stop });
        Ok(())
    }

    /// Stops the capture thread and closes the device before returning.
    ///
    /// An utterance in progress is sealed and offered to the event queue
    /// without blocking. Returns false if the thread could not be joined
    /// within one polling interval; the device then stays with that thread
    /// and the next `start()` fails.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return true;
        };
        worker.stop.stop();

        match join_within(worker.handle, self.poll, "capture") {
            JoinOutcome::Joined(parts) => {
                self.parts = Some(parts);
                tracing::debug!("capture stopped");
                true
            }
            JoinOutcome::Panicked(_) | JoinOutcome::Detached => false,
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Everything the capture thread needs besides the device and engine.
struct CaptureRun {
    events: Sender<SegmentEvent>,
    errors: Sender<VoxloopError>,
    frame_len: usize,
    read_timeout: Duration,
    stop: StopToken,
}

impl CaptureRun {
    fn run(self, mut source: Box<dyn AudioSource>, mut engine: SegmentationEngine) -> Parts {
        let sample_rate = source.sample_rate();
        let mut frame_sequence = 0u64;

        while !self.stop.is_stopped() {
            let samples = match source.read_frame(self.frame_len, self.read_timeout) {
                Ok(Some(samples)) => samples,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!("capture read failed: {e}");
                    if self.errors.try_send(e).is_err() {
                        tracing::warn!("capture error queue full, dropping error");
                    }
                    break;
                }
            };

            let frame = AudioFrame::new(samples, sample_rate, frame_sequence);
            frame_sequence += 1;

            let Some(event) = engine.push_frame(frame) else {
                continue;
            };
            if let Err(event) = send_with_stop(&self.events, event, &self.stop, self.read_timeout) {
                match event {
                    // Never delivered, so nothing downstream waits for a seal
                    SegmentEvent::Started(_) => engine.reset(),
                    sealed => {
                        let sequence = sealed.sequence();
                        if self.events.try_send(sealed).is_err() {
                            tracing::warn!(sequence, "event queue full, dropping sealed utterance");
                        }
                    }
                }
                break;
            }
        }

        if let Some(event) = engine.finish() {
            let sequence = event.sequence();
            match self.events.try_send(event) {
                Ok(()) => tracing::debug!(sequence, "utterance sealed at stop"),
                Err(_) => tracing::warn!(sequence, "event queue full, dropping utterance at stop"),
            }
        }

        if let Err(e) = source.stop() {
            tracing::warn!("closing input device: {e}");
        }
        (source, engine)
    }
}
