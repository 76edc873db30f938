//! Bounded frame queue between ingestion and processing
//!
//! `push` never blocks: when the queue is full the incoming frame is dropped
//! and counted. `pop` blocks until a frame arrives or the queue is closed.
//! Delivery is strict FIFO.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

/// Result of a non-blocking push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Frame was queued
    Queued,
    /// Queue was full; the frame was dropped
    Dropped,
    /// Queue is closed; the frame was discarded
    Closed,
}

/// Result of a timed pop
#[derive(Debug)]
pub enum PopTimeout<T> {
    Item(T),
    TimedOut,
    Closed,
}

/// Bounded single-producer/single-consumer queue with drop-incoming overflow
pub struct FrameQueue<T> {
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
    capacity: usize,
    dropped: AtomicU64,
}

impl<T> FrameQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue without blocking
    pub fn push(&self, item: T) -> PushOutcome {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return PushOutcome::Closed;
        };

        match tx.try_send(item) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
            Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
        }
    }

    /// Block until an item is available. Returns `None` once the queue is
    /// closed and drained.
    pub fn pop(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`
    pub fn pop_timeout(&self, timeout: Duration) -> PopTimeout<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => PopTimeout::Item(item),
            Err(RecvTimeoutError::Timeout) => PopTimeout::TimedOut,
            Err(RecvTimeoutError::Disconnected) => PopTimeout::Closed,
        }
    }

    /// Close the queue, waking a blocked consumer. Idempotent.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Items currently buffered
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
