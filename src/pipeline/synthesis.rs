//! Synthesis worker: text fragments in, audio clips out to playback.

use crate::error::{Result, VoxloopError};
use crate::pipeline::error::{ErrorReporter, LogReporter, StationError};
use crate::pipeline::playback::ClipSender;
use crate::pipeline::queue::{HandoffQueue, Pop, StopToken, pop_timeout};
use crate::pipeline::station::{JoinOutcome, join_within};
use crate::pipeline::types::AudioClip;
use crate::tts::synthesizer::{Synthesizer, VoiceProfile};
use crossbeam_channel::{Receiver, SendTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const STATION: &str = "synthesis";

/// Longest a forward holds the clear gate while waiting for queue space.
const FORWARD_SLICE: Duration = Duration::from_millis(10);

/// One queued text fragment and the clear generation it belongs to.
#[derive(Debug)]
struct Fragment {
    generation: u64,
    text: String,
}

/// State shared between the dispatcher and its worker.
struct Shared {
    generation: AtomicU64,
    /// Serializes `clear()` against forwarding a finished clip.
    gate: Mutex<()>,
    in_flight: AtomicBool,
}

struct Worker {
    handle: JoinHandle<()>,
    stop: StopToken,
}

/// Turns queued text into clips, one synthesis call at a time, in order.
///
/// [`SynthesisDispatcher::clear`] discards queued fragments and makes sure
/// the result of an in-flight call is never forwarded either.
pub struct SynthesisDispatcher {
    synthesizer: Arc<dyn Synthesizer>,
    voice: Arc<VoiceProfile>,
    texts: HandoffQueue<Fragment>,
    clips: ClipSender,
    shared: Arc<Shared>,
    reporter: Arc<dyn ErrorReporter>,
    poll: Duration,
    worker: Option<Worker>,
}

impl SynthesisDispatcher {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        voice: VoiceProfile,
        clips: ClipSender,
        queue_capacity: usize,
        poll: Duration,
    ) -> Result<Self> {
        if queue_capacity == 0 {
            return Err(VoxloopError::invalid("runtime.text_queue", "must be greater than 0"));
        }
        if poll.is_zero() {
            return Err(VoxloopError::invalid(
                "runtime.poll_interval_ms",
                "must be greater than 0",
            ));
        }
        Ok(Self {
            synthesizer,
            voice: Arc::new(voice),
            texts: HandoffQueue::bounded(queue_capacity),
            clips,
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                gate: Mutex::new(()),
                in_flight: AtomicBool::new(false),
            }),
            reporter: Arc::new(LogReporter),
            poll,
            worker: None,
        })
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn voice(&self) -> &VoiceProfile {
        &self.voice
    }

    /// Queues a fragment for synthesis without blocking.
    ///
    /// Returns false without queueing if the dispatcher is stopped, the
    /// fragment is blank, or the queue (`runtime.text_queue` fragments) is
    /// full. A full queue is the only back-pressure signal: callers that
    /// must not lose text check the result and retry once [`pending`]
    /// drops.
    ///
    /// [`pending`]: SynthesisDispatcher::pending
    pub fn enqueue(&self, text: &str) -> bool {
        if !self.is_running() {
            tracing::debug!("synthesis stopped, ignoring fragment");
            return false;
        }
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        let fragment = Fragment {
            generation: self.shared.generation.load(Ordering::SeqCst),
            text: text.to_string(),
        };
        match self.texts.try_push(fragment) {
            Ok(()) => true,
            Err(fragment) => {
                tracing::warn!(text = %fragment.text, "text queue full, dropping fragment");
                false
            }
        }
    }

    /// Fragments waiting for synthesis.
    pub fn pending(&self) -> usize {
        self.texts.len()
    }

    /// True while a synthesis call is running.
    pub fn in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Discards every queued fragment. A call already in flight finishes,
    /// but its clip is dropped.
    pub fn clear(&self) -> usize {
        let _gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = self.texts.clear();
        tracing::debug!(dropped, "synthesis cleared");
        dropped
    }

    /// Spawns the worker. A worker that already exited is replaced.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() && !self.is_running() {
            self.stop();
        }
        if self.worker.is_some() {
            return Ok(());
        }

        let stop = StopToken::new();
        let run = SynthesisRun {
            synthesizer: Arc::clone(&self.synthesizer),
            voice: Arc::clone(&self.voice),
            rx: self.texts.receiver(),
            clips: self.clips.clone(),
            shared: Arc::clone(&self.shared),
            reporter: Arc::clone(&self.reporter),
            slice: self.poll / 2,
            stop: stop.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("voxloop-synthesis".to_string())
            .spawn(move || run.run())?;

        tracing::debug!(synthesizer = self.synthesizer.name(), "synthesis started");
        self.worker = Some(Worker { handle, stop });
        Ok(())
    }

    /// Stops the worker, then clears the queue.
    ///
    /// A call still running after one polling interval is abandoned and its
    /// result discarded. Returns false in that case.
    pub fn stop(&mut self) -> bool {
        let Some(worker) = self.worker.take() else {
            return true;
        };
        worker.stop.stop();

        let joined = matches!(
            join_within(worker.handle, self.poll, STATION),
            JoinOutcome::Joined(())
        );
        self.clear();
        self.shared.in_flight.store(false, Ordering::SeqCst);
        tracing::debug!(joined, "synthesis stopped");
        joined
    }
}

impl Drop for SynthesisDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SynthesisRun {
    synthesizer: Arc<dyn Synthesizer>,
    voice: Arc<VoiceProfile>,
    rx: Receiver<Fragment>,
    clips: ClipSender,
    shared: Arc<Shared>,
    reporter: Arc<dyn ErrorReporter>,
    slice: Duration,
    stop: StopToken,
}

impl SynthesisRun {
    fn run(self) {
        tracing::debug!(station = STATION, "station started");

        while !self.stop.is_stopped() {
            let fragment = match pop_timeout(&self.rx, self.slice) {
                Pop::Item(fragment) => fragment,
                Pop::Idle => continue,
                Pop::Closed => break,
            };
            if fragment.generation != self.shared.generation.load(Ordering::SeqCst) {
                continue;
            }

            self.shared.in_flight.store(true, Ordering::SeqCst);
            let start = Instant::now();
            let result = self.synthesizer.synthesize(&fragment.text, &self.voice);
            let forwarded = match result {
                Ok(clip) => {
                    tracing::debug!(
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        bytes = clip.len(),
                        "fragment synthesized"
                    );
                    self.forward(clip, fragment.generation)
                }
                Err(e) => {
                    self.reporter.report(STATION, &StationError::from(e));
                    true
                }
            };
            self.shared.in_flight.store(false, Ordering::SeqCst);
            if !forwarded {
                break;
            }
        }

        tracing::debug!(station = STATION, "station stopped");
    }

    /// Hands a clip to playback unless a clear happened since its fragment
    /// was queued. Returns false if the worker should exit.
    fn forward(&self, mut clip: AudioClip, generation: u64) -> bool {
        loop {
            if self.stop.is_stopped() {
                return false;
            }
            let _gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
            if self.shared.generation.load(Ordering::SeqCst) != generation {
                tracing::debug!("dropping clip synthesized before clear");
                return true;
            }
            match self.clips.send_timeout(clip, FORWARD_SLICE) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(returned)) => clip = returned,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::MockAudioSink;
    use crate::pipeline::playback::PlaybackEngine;
    use crate::tts::synthesizer::MockSynthesizer;

    const POLL: Duration = Duration::from_millis(40);

    /// A playback engine that is never started, used only for its queue.
    fn clip_queue() -> (PlaybackEngine, ClipSender) {
        let engine = PlaybackEngine::new(Box::new(MockAudioSink::new()), 50, 32, POLL).unwrap();
        let sender = engine.clip_sender();
        (engine, sender)
    }

    fn dispatcher(synth: Arc<MockSynthesizer>, clips: ClipSender) -> SynthesisDispatcher {
        SynthesisDispatcher::new(synth, VoiceProfile::default(), clips, 256, POLL).unwrap()
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

    #[test]
    fn test_enqueue_rejected_when_stopped() {
        let (_engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new());
        let dispatcher = dispatcher(synth.clone(), clips);

        assert!(!dispatcher.enqueue("hello"));
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(synth.calls(), 0);
    }

    #[test]
    fn test_fragments_synthesized_in_order() {
        let (engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new());
        let mut dispatcher = dispatcher(synth.clone(), clips);
        dispatcher.start().unwrap();

        for text in ["one.", "two.", "three."] {
            assert!(dispatcher.enqueue(text));
        }
        assert!(wait_until(|| engine.queued() == 3));
        assert_eq!(synth.texts(), vec!["one.", "two.", "three."]);
        assert!(dispatcher.stop());
    }

    #[test]
    fn test_full_queue_rejects_until_drained() {
        let (engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(100)));
        let mut dispatcher =
            SynthesisDispatcher::new(synth.clone(), VoiceProfile::default(), clips, 1, POLL)
                .unwrap();
        dispatcher.start().unwrap();

        assert!(dispatcher.enqueue("first"));
        assert!(wait_until(|| dispatcher.in_flight()));
        assert!(dispatcher.enqueue("second"));
        assert!(!dispatcher.enqueue("third"));
        assert_eq!(dispatcher.pending(), 1);

        assert!(wait_until(|| dispatcher.pending() == 0));
        assert!(dispatcher.enqueue("third"));
        assert!(wait_until(|| engine.queued() == 3));
        assert_eq!(synth.texts(), vec!["first", "second", "third"]);
        assert!(dispatcher.stop());
    }

    #[test]
    fn test_blank_fragment_skipped() {
        let (engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new());
        let mut dispatcher = dispatcher(synth.clone(), clips);
        dispatcher.start().unwrap();

        assert!(!dispatcher.enqueue("   "));
        assert!(dispatcher.enqueue(" spoken "));
        assert!(wait_until(|| engine.queued() == 1));
        assert_eq!(synth.texts(), vec!["spoken"]);
        assert!(dispatcher.stop());
    }

    #[test]
    fn test_failure_reported_and_worker_continues() {
        #[derive(Default)]
        struct Collect(Mutex<Vec<String>>);
        impl ErrorReporter for Collect {
            fn report(&self, station: &str, error: &StationError) {
                self.0.lock().unwrap().push(format!("{station}: {error}"));
            }
        }

        let (engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new().then_fail());
        let reporter = Arc::new(Collect::default());
        let mut dispatcher = dispatcher(synth.clone(), clips).with_reporter(reporter.clone());
        dispatcher.start().unwrap();

        assert!(dispatcher.enqueue("broken"));
        assert!(dispatcher.enqueue("fine"));
        assert!(wait_until(|| engine.queued() == 1));
        assert_eq!(synth.calls(), 2);

        let reported = reporter.0.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported[0].starts_with("synthesis: Recoverable error"));
        drop(reported);
        assert!(dispatcher.stop());
    }

    #[test]
    fn test_clear_then_enqueue_yields_one_clip() {
        let (engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(100)));
        let mut dispatcher = dispatcher(synth.clone(), clips);
        dispatcher.start().unwrap();

        for text in ["a", "b", "c", "d"] {
            assert!(dispatcher.enqueue(text));
        }
        // Let "a" get in flight, then throw everything away
        assert!(wait_until(|| dispatcher.in_flight()));
        dispatcher.clear();
        assert_eq!(dispatcher.pending(), 0);
        assert!(dispatcher.enqueue("x"));

        assert!(wait_until(|| engine.queued() == 1));
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(engine.queued(), 1);
        assert_eq!(synth.texts(), vec!["a", "x"]);
        assert!(dispatcher.stop());
    }

    #[test]
    fn test_stop_abandons_slow_call_and_clears() {
        let (engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new().with_delay(Duration::from_millis(400)));
        let mut dispatcher = dispatcher(synth.clone(), clips);
        dispatcher.start().unwrap();

        assert!(dispatcher.enqueue("slow"));
        assert!(dispatcher.enqueue("queued"));
        assert!(wait_until(|| dispatcher.in_flight()));

        let started = Instant::now();
        assert!(!dispatcher.stop());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(dispatcher.pending(), 0);
        assert!(!dispatcher.enqueue("after stop"));

        std::thread::sleep(Duration::from_millis(500));
        assert_eq!(engine.queued(), 0);
        assert_eq!(synth.calls(), 1);
    }

    #[test]
    fn test_restart_after_stop() {
        let (engine, clips) = clip_queue();
        let synth = Arc::new(MockSynthesizer::new());
        let mut dispatcher = dispatcher(synth, clips);

        for round in 1..=3 {
            dispatcher.start().unwrap();
            assert!(dispatcher.enqueue("again"));
            assert!(wait_until(|| engine.queued() == round));
            assert!(dispatcher.stop());
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let (_engine, clips) = clip_queue();
        let result = SynthesisDispatcher::new(
            Arc::new(MockSynthesizer::new()),
            VoiceProfile::default(),
            clips,
            0,
            POLL,
        );
        assert!(matches!(
            result,
            Err(VoxloopError::ConfigInvalidValue { .. })
        ));
    }
}
