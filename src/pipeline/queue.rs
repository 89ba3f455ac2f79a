//! Hand-off queues and cooperative cancellation shared by every worker.

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Shared cancellation flag observed by a worker loop.
///
/// Each session gets a fresh token, so a detached worker from an earlier
/// session can never be revived by a later `start()`.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Bounded FIFO between two pipeline stages.
///
/// Holds both channel ends so the owner can flush pending items with
/// [`HandoffQueue::clear`] while the consumer thread keeps running. Only one
/// thread should pop from [`HandoffQueue::receiver`] at a time.
#[derive(Debug)]
pub struct HandoffQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> HandoffQueue<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Producer end. Clones share the same queue.
    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// Consumer end, handed to the single worker thread.
    pub fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    /// Enqueue without blocking. Returns the item back if the queue is full.
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        self.tx.try_send(item).map_err(|e| e.into_inner())
    }

    /// Drops everything currently queued and returns how many items went.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity().unwrap_or(0)
    }
}

/// Sends `item`, waiting for space in slices of `poll` so a stop request is
/// noticed. Hands the item back if the token was stopped or the receiver is
/// gone.
pub fn send_with_stop<T>(
    tx: &Sender<T>,
    mut item: T,
    stop: &StopToken,
    poll: Duration,
) -> std::result::Result<(), T> {
    loop {
        match tx.send_timeout(item, poll) {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Timeout(returned)) => {
                if stop.is_stopped() {
                    return Err(returned);
                }
                item = returned;
            }
            Err(SendTimeoutError::Disconnected(returned)) => return Err(returned),
        }
    }
}

/// Outcome of one bounded wait on a queue.
#[derive(Debug)]
pub enum Pop<T> {
    Item(T),
    Idle,
    Closed,
}

/// Waits at most `poll` for the next item.
pub fn pop_timeout<T>(rx: &Receiver<T>, poll: Duration) -> Pop<T> {
    match rx.recv_timeout(poll) {
        Ok(item) => Pop::Item(item),
        Err(RecvTimeoutError::Timeout) => Pop::Idle,
        Err(RecvTimeoutError::Disconnected) => Pop::Closed,
    }
}
