//! Bounded audio queue between the capture thread and the processing thread.
//!
//! Capture is a strict real-time producer: `push` never blocks. When the
//! processing side falls behind and the queue reaches capacity, the oldest
//! chunk is discarded to make room and counted. Pop order equals push order
//! for all surviving chunks.

use crate::audio::source::AudioChunk;
use crate::defaults;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// Result of a non-blocking push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Chunk enqueued without losing anything.
    Accepted,
    /// Chunk enqueued, but the oldest queued chunk was discarded to make
    /// room, or the queue was stopped and the chunk was discarded outright.
    Dropped,
}

struct Inner {
    queue: VecDeque<AudioChunk>,
    stopped: bool,
}

/// Thread-safe bounded queue with a drop-oldest overflow policy.
pub struct AudioQueue {
    inner: Mutex<Inner>,
    available: Condvar,
    capacity: usize,
    dropped: AtomicU64,
    buffered_ms: AtomicU64,
}

impl AudioQueue {
    /// Create a queue with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(defaults::QUEUE_CAPACITY)
    }

    /// Create a queue bounded to `capacity` chunks.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            available: Condvar::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            buffered_ms: AtomicU64::new(0),
        }
    }

    /// Enqueue a chunk without blocking.
    ///
    /// At capacity the oldest chunk is discarded (and counted) so the new
    /// one always fits. After `stop` the chunk is discarded and counted.
    pub fn push(&self, chunk: AudioChunk) -> PushOutcome {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.stopped {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return PushOutcome::Dropped;
        }

        let mut outcome = PushOutcome::Accepted;
        if inner.queue.len() >= self.capacity {
            if let Some(oldest) = inner.queue.pop_front() {
                self.buffered_ms
                    .fetch_sub(oldest.duration_ms(), Ordering::Relaxed);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                outcome = PushOutcome::Dropped;
            }
        }

        self.buffered_ms
            .fetch_add(chunk.duration_ms(), Ordering::Relaxed);
        inner.queue.push_back(chunk);
        drop(inner);
        self.available.notify_one();
        outcome
    }

    /// Dequeue the next chunk, blocking until one is available.
    ///
    /// Returns `None` once the queue is stopped and drained.
    pub fn pop(&self) -> Option<AudioChunk> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(chunk) = inner.queue.pop_front() {
                self.buffered_ms
                    .fetch_sub(chunk.duration_ms(), Ordering::Relaxed);
                return Some(chunk);
            }
            if inner.stopped {
                return None;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Dequeue with a timeout, so the caller can poll cancellation or pause
    /// flags. `None` means either timeout or stopped-and-drained; check
    /// [`AudioQueue::is_stopped`] to distinguish.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<AudioChunk> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(chunk) = inner.queue.pop_front() {
                self.buffered_ms
                    .fetch_sub(chunk.duration_ms(), Ordering::Relaxed);
                return Some(chunk);
            }
            if inner.stopped {
                return None;
            }
            let (guard, result) = self
                .available
                .wait_timeout(inner, timeout)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
            if result.timed_out() && inner.queue.is_empty() {
                return None;
            }
        }
    }

    /// Signal that no more chunks will be pushed. Pending chunks remain
    /// poppable; `pop` returns `None` once they are drained.
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.stopped = true;
        drop(inner);
        self.available.notify_all();
    }

    /// True once `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .stopped
    }

    /// Number of chunks discarded so far.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Chunks currently queued.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .queue
            .len()
    }

    /// True when no chunks are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate audio duration currently buffered, in milliseconds.
    pub fn buffered_ms(&self) -> u64 {
        self.buffered_ms.load(Ordering::Relaxed)
    }
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new()
    }
}
