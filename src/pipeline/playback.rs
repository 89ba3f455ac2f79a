//! Playback worker: queued clips, cross-faded, out to the speaker.

use crate::audio::crossfade::CrossFader;
use crate::audio::output::AudioSink;
use crate::audio::wav::decode_clip;
use crate::error::{Result, VoxloopError};
use crate::pipeline::queue::{HandoffQueue, Pop, StopToken, pop_timeout};
use crate::pipeline::station::{JoinOutcome, join_within};
use crate::pipeline::types::{AudioClip, ms_to_samples};
use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// A clip tagged with the clear epoch it was queued under.
type Queued = (u64, AudioClip);

/// Producer handle for the playback queue.
///
/// Clips sent before a [`PlaybackEngine::clear`] are never played, even if
/// the worker had already popped them.
#[derive(Debug, Clone)]
pub struct ClipSender {
    tx: Sender<Queued>,
    epoch: Arc<AtomicU64>,
}

impl ClipSender {
    /// Enqueues without blocking; hands the clip back if the queue is full.
    pub fn try_send(&self, clip: AudioClip) -> std::result::Result<(), AudioClip> {
        self.tx
            .try_send((self.epoch.load(Ordering::SeqCst), clip))
            .map_err(|e| e.into_inner().1)
    }

    /// Waits up to `timeout` for space.
    pub fn send_timeout(
        &self,
        clip: AudioClip,
        timeout: Duration,
    ) -> std::result::Result<(), SendTimeoutError<AudioClip>> {
        self.tx
            .send_timeout((self.epoch.load(Ordering::SeqCst), clip), timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout((_, clip)) => SendTimeoutError::Timeout(clip),
                SendTimeoutError::Disconnected((_, clip)) => SendTimeoutError::Disconnected(clip),
            })
    }
}

struct Worker {
    handle: JoinHandle<Box<dyn AudioSink>>,
    stop: StopToken,
}

/// Owns the output device and plays queued clips in order.
///
/// Consecutive clips are joined with a linear cross-fade of `tail_ms`. The
/// last `tail_ms` of a clip is held back until the next clip arrives; if
/// none arrives within that time it is played unblended.
pub struct PlaybackEngine {
    sink: Option<Box<dyn AudioSink>>,
    queue: HandoffQueue<Queued>,
    epoch: Arc<AtomicU64>,
    busy: Arc<AtomicBool>,
    tail_ms: u32,
    poll: Duration,
    worker: Option<Worker>,
}

impl PlaybackEngine {
    pub fn new(
        sink: Box<dyn AudioSink>,
        tail_ms: u32,
        queue_capacity: usize,
        poll: Duration,
    ) -> Result<Self> {
        if queue_capacity == 0 {
            return Err(VoxloopError::invalid("runtime.clip_queue", "must be greater than 0"));
        }
        if poll.is_zero() {
            return Err(VoxloopError::invalid(
                "runtime.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        Ok(Self {
            sink: Some(sink),
            queue: HandoffQueue::bounded(queue_capacity),
            epoch: Arc::new(AtomicU64::new(0)),
            busy: Arc::new(AtomicBool::new(false)),
            tail_ms,
            poll,
            worker: None,
        })
    }

    pub fn clip_sender(&self) -> ClipSender {
        ClipSender {
            tx: self.queue.sender(),
            epoch: Arc::clone(&self.epoch),
        }
    }

    /// Enqueues a clip without blocking. Returns false if the queue is full.
    pub fn enqueue(&self, clip: AudioClip) -> bool {
        self.clip_sender().try_send(clip).is_ok()
    }

    /// Clips waiting to be played.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// True while a clip is being written or its tail is still held.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Opens the device and spawns the playback thread with an empty queue
    /// and no held tail. A thread that already exited is reclaimed first.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() && !self.is_playing() {
            self.stop();
        }
        if self.worker.is_some() {
            return Ok(());
        }
        let mut sink = self.sink.take().ok_or_else(|| VoxloopError::AudioPlayback {
            message: "output device is still held by an abandoned playback thread".to_string(),
        })?;

        if let Err(e) = sink.start() {
            self.sink = Some(sink);
            return Err(e);
        }
        let stale = self.queue.clear();
        if stale > 0 {
            tracing::debug!(stale, "dropped clips queued while stopped");
        }

        let stop = StopToken::new();
        let run = PlaybackRun {
            rx: self.queue.receiver(),
            epoch: Arc::clone(&self.epoch),
            busy: Arc::clone(&self.busy),
            tail_len: ms_to_samples(self.tail_ms, sink.sample_rate()),
            tail_hold: Duration::from_millis(u64::from(self.tail_ms)).min(self.poll / 2),
            poll: self.poll / 2,
            stop: stop.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("voxloop-playback".to_string())
            .spawn(move || run.run(sink))?;

        tracing::debug!(tail_ms = self.tail_ms, "playback started");
        self.worker = Some(Worker { handle, stop });
        Ok(())
    }

    /// Drops queued clips and the held tail, and cuts the clip being written.
    ///
    /// The thread and the device stay up.
    pub fn clear(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let dropped = self.queue.clear();
        tracing::debug!(dropped, "playback cleared");
        dropped
    }

    /// Stops output immediately, closes the device, drops queued clips and
    /// the held tail.
    ///
    /// Returns false if the thread could not be joined within one polling
    /// interval.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return true;
        };
        worker.stop.stop();

        let joined = match join_within(worker.handle, self.poll, "playback") {
            JoinOutcome::Joined(sink) => {
                self.sink = Some(sink);
                true
            }
            JoinOutcome::Panicked(_) | JoinOutcome::Detached => false,
        };
        self.queue.clear();
        self.busy.store(false, Ordering::SeqCst);
        tracing::debug!(joined, "playback stopped");
        joined
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PlaybackRun {
    rx: Receiver<Queued>,
    epoch: Arc<AtomicU64>,
    busy: Arc<AtomicBool>,
    tail_len: usize,
    /// How long a held tail waits for the next clip.
    tail_hold: Duration,
    poll: Duration,
    stop: StopToken,
}

impl PlaybackRun {
    fn run(self, mut sink: Box<dyn AudioSink>) -> Box<dyn AudioSink> {
        let mut fader = CrossFader::new(self.tail_len);
        let mut seen = self.epoch.load(Ordering::SeqCst);

        while !self.stop.is_stopped() {
            self.sync_epoch(&mut seen, &mut fader, sink.as_mut());

            let wait = if fader.held().is_empty() {
                self.poll
            } else {
                self.tail_hold
            };
            let (tag, clip) = match pop_timeout(&self.rx, wait) {
                Pop::Item(item) => item,
                Pop::Idle => {
                    let tail = fader.flush();
                    self.write(sink.as_mut(), &tail, seen);
                    self.busy.store(false, Ordering::SeqCst);
                    continue;
                }
                Pop::Closed => break,
            };

            self.sync_epoch(&mut seen, &mut fader, sink.as_mut());
            if tag != seen {
                tracing::debug!("dropping clip queued before clear");
                continue;
            }
            self.busy.store(true, Ordering::SeqCst);

            let samples = match decode_clip(clip.as_bytes(), sink.sample_rate()) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(bytes = clip.len(), "skipping undecodable clip: {e}");
                    continue;
                }
            };
            let joined = fader.join(&samples);
            self.write(sink.as_mut(), &joined, seen);
        }

        self.busy.store(false, Ordering::SeqCst);
        if let Err(e) = sink.stop() {
            tracing::warn!("closing output device: {e}");
        }
        sink
    }

    /// After a clear: forget the held tail and discard audio the device
    /// already accepted.
    fn sync_epoch(&self, seen: &mut u64, fader: &mut CrossFader, sink: &mut dyn AudioSink) {
        let current = self.epoch.load(Ordering::SeqCst);
        if current == *seen {
            return;
        }
        *seen = current;
        fader.reset();
        if let Err(e) = sink.flush() {
            tracing::warn!("flushing output device: {e}");
        }
    }

    fn write(&self, sink: &mut dyn AudioSink, samples: &[i16], seen: u64) {
        if samples.is_empty() {
            return;
        }
        let interrupted = || self.stop.is_stopped() || self.epoch.load(Ordering::SeqCst) != seen;
        match sink.write(samples, &interrupted) {
            Ok(written) if written < samples.len() => {
                tracing::debug!(written, total = samples.len(), "clip interrupted");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(samples = samples.len(), "playback write failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::{MockAudioSink, MockSinkLog};
    use crate::audio::wav::encode_wav;
    use std::time::Instant;

    const RATE: u32 = 32000;
    const POLL: Duration = Duration::from_millis(40);

    fn clip(ms: u32, value: i16) -> AudioClip {
        AudioClip::new(encode_wav(&vec![value; ms_to_samples(ms, RATE)], RATE).unwrap())
    }

    fn engine(sink: MockAudioSink) -> (PlaybackEngine, Arc<MockSinkLog>) {
        let log = sink.log();
        let engine =
            PlaybackEngine::new(Box::new(sink.with_sample_rate(RATE)), 50, 32, POLL).unwrap();
        (engine, log)
    }

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn wait_idle(engine: &PlaybackEngine) {
        assert!(wait_until(|| engine.queued() == 0 && !engine.is_busy()));
        std::thread::sleep(POLL);
        assert!(wait_until(|| engine.queued() == 0 && !engine.is_busy()));
    }

    #[test]
    fn test_two_clips_overlap_by_tail() {
        let (mut engine, log) = engine(MockAudioSink::new());
        engine.start().unwrap();

        assert!(engine.enqueue(clip(500, 1000)));
        assert!(engine.enqueue(clip(300, 3000)));
        wait_idle(&engine);

        // 500 + 300 - 50 ms
        assert_eq!(log.sample_count(), ms_to_samples(750, RATE));
        let samples = log.samples();
        assert!(samples.iter().all(|&s| (1000..=3000).contains(&s)));
        assert!(engine.stop());
    }

    #[test]
    fn test_single_clip_played_in_full() {
        let (mut engine, log) = engine(MockAudioSink::new());
        engine.start().unwrap();

        assert!(engine.enqueue(clip(200, 500)));
        wait_idle(&engine);

        assert_eq!(log.sample_count(), ms_to_samples(200, RATE));
        assert!(engine.stop());
    }

    #[test]
    fn test_undecodable_clip_is_skipped() {
        let (mut engine, log) = engine(MockAudioSink::new());
        engine.start().unwrap();

        assert!(engine.enqueue(AudioClip::new(b"not a wav".to_vec())));
        assert!(engine.enqueue(clip(100, 500)));
        wait_idle(&engine);

        assert_eq!(log.sample_count(), ms_to_samples(100, RATE));
        assert!(engine.is_playing());
        assert!(engine.stop());
    }

    #[test]
    fn test_write_failure_does_not_kill_playback() {
        let (mut engine, log) = engine(MockAudioSink::new().with_write_failure_on(0));
        engine.start().unwrap();

        assert!(engine.enqueue(clip(100, 500)));
        wait_idle(&engine);
        assert!(engine.enqueue(clip(100, 700)));
        wait_idle(&engine);

        assert!(engine.is_playing());
        assert!(log.samples().contains(&700));
        assert!(engine.stop());
    }

    #[test]
    fn test_stop_interrupts_long_clip() {
        let (mut engine, log) = engine(MockAudioSink::new().with_realtime(1.0));
        engine.start().unwrap();

        assert!(engine.enqueue(clip(5000, 500)));
        assert!(wait_until(|| log.sample_count() > 0));

        let started = Instant::now();
        assert!(engine.stop());
        assert!(started.elapsed() <= POLL + Duration::from_millis(20));
        assert!(log.sample_count() < ms_to_samples(5000, RATE));
        assert!(!log.is_open());
    }

    #[test]
    fn test_clear_cuts_current_clip_and_keeps_running() {
        let (mut engine, log) = engine(MockAudioSink::new().with_realtime(1.0));
        engine.start().unwrap();

        assert!(engine.enqueue(clip(3000, 500)));
        assert!(engine.enqueue(clip(3000, 600)));
        assert!(wait_until(|| log.sample_count() > 0));

        engine.clear();
        assert_eq!(engine.queued(), 0);
        assert!(wait_until(|| !engine.is_busy()));
        let after_clear = log.sample_count();
        assert!(after_clear < ms_to_samples(3000, RATE));
        assert!(!log.samples().contains(&600));
        assert!(log.flushes() >= 1);

        assert!(engine.enqueue(clip(100, 900)));
        assert!(wait_until(|| log.samples().contains(&900)));
        assert!(engine.is_playing());
        assert!(engine.stop());
    }

    #[test]
    fn test_clip_sent_before_clear_is_dropped() {
        let (mut engine, log) = engine(MockAudioSink::new());
        let sender = engine.clip_sender();

        sender.try_send(clip(100, 123)).unwrap();
        engine.clear();
        engine.start().unwrap();
        sender.try_send(clip(100, 456)).unwrap();
        wait_idle(&engine);

        let samples = log.samples();
        assert!(!samples.contains(&123));
        assert_eq!(samples.len(), ms_to_samples(100, RATE));
        assert!(engine.stop());
    }

    #[test]
    fn test_restart_after_stop() {
        let (mut engine, log) = engine(MockAudioSink::new());
        for _ in 0..3 {
            engine.start().unwrap();
            assert!(log.is_open());
            assert!(engine.stop());
            assert!(!log.is_open());
        }
        assert_eq!(log.opens(), 3);
        assert_eq!(log.closes(), 3);
    }

    #[test]
    fn test_start_failure_keeps_device() {
        let (mut engine, _log) = engine(MockAudioSink::new().with_start_failure());
        assert!(matches!(
            engine.start(),
            Err(VoxloopError::AudioDeviceNotFound { .. })
        ));
        assert!(!engine.is_playing());
        assert!(engine.start().is_err());
    }

    /// Sink whose first write panics.
    struct PanickingSink;

    impl AudioSink for PanickingSink {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn write(&mut self, _samples: &[i16], _interrupted: &dyn Fn() -> bool) -> Result<usize> {
            panic!("driver crashed");
        }

        fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            RATE
        }
    }

    #[test]
    fn test_start_after_worker_died_reports_lost_device() {
        let mut engine = PlaybackEngine::new(Box::new(PanickingSink), 50, 4, POLL).unwrap();
        engine.start().unwrap();
        assert!(engine.enqueue(clip(100, 500)));
        assert!(wait_until(|| !engine.is_playing()));

        // The device went down with the thread; start() must say so
        assert!(matches!(
            engine.start(),
            Err(VoxloopError::AudioPlayback { .. })
        ));
        assert!(!engine.is_playing());
    }
}
