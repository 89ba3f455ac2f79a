//! Core station abstraction and runner for the pipeline workers.

use crate::pipeline::error::{ErrorReporter, StationError};
use crate::pipeline::queue::{Pop, StopToken, pop_timeout, send_with_stop};
use crossbeam_channel::{Receiver, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A processing station in the pipeline.
///
/// Each station receives input, processes it, and produces zero or more
/// outputs. Stations run in their own threads and are connected by bounded
/// channels.
pub trait Station: Send + 'static {
    /// The input type this station receives.
    type Input: Send + 'static;
    /// The output type this station produces.
    type Output: Send + 'static;

    /// Processes a single input item.
    ///
    /// Returns:
    /// - `Ok(outputs)` - processed; outputs are forwarded in order (may be empty)
    /// - `Err(StationError)` - processing failed
    fn process(&mut self, input: Self::Input) -> Result<Vec<Self::Output>, StationError>;

    /// Returns the name of this station for logging and error reporting.
    fn name(&self) -> &'static str;
}

/// How a worker thread ended when joined against a deadline.
#[derive(Debug)]
pub enum JoinOutcome<T> {
    Joined(T),
    Panicked(String),
    /// Still running at the deadline; the handle was dropped.
    Detached,
}

/// Joins `handle`, giving up after `timeout`.
///
/// A thread that is still busy at the deadline (typically blocked inside a
/// slow capability call) is detached: its handle is dropped and it exits on
/// its own once the call returns and it sees its stop token.
pub fn join_within<T>(handle: JoinHandle<T>, timeout: Duration, name: &str) -> JoinOutcome<T> {
    let deadline = Instant::now() + timeout;
    let poll = Duration::from_millis(5);

    loop {
        if handle.is_finished() {
            return match handle.join() {
                Ok(value) => JoinOutcome::Joined(value),
                Err(panic_info) => {
                    let msg = panic_info
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic_info.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(thread = name, "worker panicked: {msg}");
                    JoinOutcome::Panicked(msg)
                }
            };
        }
        if Instant::now() >= deadline {
            tracing::warn!(thread = name, "still busy at shutdown deadline, detaching");
            return JoinOutcome::Detached;
        }
        thread::sleep(poll);
    }
}

/// Runs a station in a dedicated thread.
pub struct StationRunner<S: Station> {
    handle: Option<JoinHandle<()>>,
    station_name: &'static str,
    stop: StopToken,
    poll: Duration,
    _phantom: PhantomData<S>,
}

impl<S: Station> StationRunner<S> {
    /// Spawns a station in a dedicated thread.
    ///
    /// The thread waits on its channels in slices of half of `poll`, so
    /// [`StationRunner::stop`] can join it within `poll`. It exits when
    /// `stop` is set, either channel closes, or the station reports a fatal
    /// error.
    pub fn spawn(
        mut station: S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
        stop: StopToken,
        poll: Duration,
    ) -> std::io::Result<Self> {
        let station_name = station.name();
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("voxloop-{}", station_name.to_lowercase()))
            .spawn(move || {
                Self::run_station(
                    &mut station,
                    input_rx,
                    output_tx,
                    error_reporter,
                    thread_stop,
                    poll,
                );
            })?;

        Ok(Self {
            handle: Some(handle),
            station_name,
            stop,
            poll,
            _phantom: PhantomData,
        })
    }

    /// Main processing loop for the station.
    fn run_station(
        station: &mut S,
        input_rx: Receiver<S::Input>,
        output_tx: Sender<S::Output>,
        error_reporter: Arc<dyn ErrorReporter>,
        stop: StopToken,
        poll: Duration,
    ) {
        let station_name = station.name();
        let slice = poll / 2;
        tracing::debug!(station = station_name, "station started");

        'run: while !stop.is_stopped() {
            let input = match pop_timeout(&input_rx, slice) {
                Pop::Item(input) => input,
                Pop::Idle => continue,
                Pop::Closed => break,
            };

            match station.process(input) {
                Ok(outputs) => {
                    for output in outputs {
                        if stop.is_stopped() || send_with_stop(&output_tx, output, &stop, slice).is_err() {
                            break 'run;
                        }
                    }
                }
                Err(error) => {
                    error_reporter.report(station_name, &error);
                    if error.is_fatal() {
                        break;
                    }
                }
            }
        }

        tracing::debug!(station = station_name, "station stopped");
    }

    /// Signals the station to stop and waits one polling interval for it.
    ///
    /// Returns false if the thread had to be detached or panicked.
    pub fn stop(mut self) -> bool {
        self.stop.stop();
        match self.handle.take() {
            Some(handle) => matches!(
                join_within(handle, self.poll, self.station_name),
                JoinOutcome::Joined(())
            ),
            None => true,
        }
    }

    /// Returns true while the station thread is running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<S: Station> Drop for StationRunner<S> {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
