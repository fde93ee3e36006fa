//! Event types and the bounded-channel event bus.
//!
//! Subscribers own a bounded channel per event type. The emitter never
//! blocks on a slow subscriber: when a channel is full the event is dropped
//! for that subscriber and counted. The one exception is the terminal
//! status on session end, which is sent with a generous timeout so a live
//! subscriber always observes the final `Idle`/`Error` state.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Speaker id for chunks with no speaker assignment yet.
pub const UNKNOWN_SPEAKER: i32 = -1;

/// One word within an emitted chunk, with session-absolute timings.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkWord {
    pub text: String,
    /// Word start, ms since session start.
    pub t0_ms: u64,
    /// Word end, ms since session start.
    pub t1_ms: u64,
    /// Engine confidence in this word, 0.0-1.0.
    pub probability: f32,
}

/// A transcribed unit with a stable id and session-absolute timings.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionChunk {
    /// Unique, strictly increasing id within the session.
    pub id: u64,
    pub text: String,
    /// Absolute start, ms since session start.
    pub start_ms: u64,
    /// Absolute end, ms since session start.
    pub end_ms: u64,
    /// Speaker id (>= 0) or [`UNKNOWN_SPEAKER`].
    pub speaker_id: i32,
    /// Confidence in the speaker assignment, 0.0-1.0.
    pub speaker_confidence: f32,
    /// True once no further reclassification is possible.
    pub finalized: bool,
    /// Word-level breakdown, when the engine provides it.
    pub words: Vec<ChunkWord>,
}

impl TranscriptionChunk {
    /// Chunk duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }
}

/// Retroactive change of previously emitted chunks' speaker labels.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerReclassification {
    /// Ids of the affected chunks.
    pub chunk_ids: Vec<u64>,
    pub old_speaker_id: i32,
    pub new_speaker_id: i32,
    /// `"terminal_recluster"` or `"better_context"`.
    pub reason: String,
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Point-in-time session status.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionStatus {
    pub state: SessionState,
    /// Wall time since `start`, milliseconds.
    pub elapsed_ms: u64,
    pub chunks_emitted: u64,
    pub reclassifications: u64,
    pub current_device: String,
    /// Processing time over audio time; < 1.0 keeps up with live audio.
    pub realtime_factor: f32,
    /// Audio waiting in the capture queue, milliseconds.
    pub audio_buffer_ms: u64,
}

/// Error severity, mirroring the propagation policy: warnings leave the
/// session running, errors and fatals end it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// Error event published to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionError {
    pub severity: Severity,
    pub message: String,
    pub details: String,
    /// When the error occurred, ms since session start.
    pub timestamp_ms: u64,
}

/// Per-speaker aggregates, derived from emitted chunks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpeakerStats {
    pub speaker_id: i32,
    pub total_speaking_time_ms: u64,
    pub segment_count: u64,
    pub last_text: String,
}

/// Capacity of each chunk subscription channel.
const CHUNK_CHANNEL_CAPACITY: usize = 256;
/// Capacity of the remaining subscription channels.
const EVENT_CHANNEL_CAPACITY: usize = 64;
/// How long the emitter is willing to wait to deliver a terminal status.
const FINAL_STATUS_TIMEOUT: Duration = Duration::from_millis(250);

/// Fan-out hub for all session events.
pub struct EventBus {
    chunk_subs: Mutex<Vec<Sender<TranscriptionChunk>>>,
    reclassification_subs: Mutex<Vec<Sender<SpeakerReclassification>>>,
    status_subs: Mutex<Vec<Sender<TranscriptionStatus>>>,
    error_subs: Mutex<Vec<Sender<TranscriptionError>>>,
    dropped_events: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            chunk_subs: Mutex::new(Vec::new()),
            reclassification_subs: Mutex::new(Vec::new()),
            status_subs: Mutex::new(Vec::new()),
            error_subs: Mutex::new(Vec::new()),
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn subscribe_chunks(&self) -> Receiver<TranscriptionChunk> {
        let (tx, rx) = bounded(CHUNK_CHANNEL_CAPACITY);
        self.chunk_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn subscribe_reclassifications(&self) -> Receiver<SpeakerReclassification> {
        let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
        self.reclassification_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn subscribe_status(&self) -> Receiver<TranscriptionStatus> {
        let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
        self.status_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn subscribe_errors(&self) -> Receiver<TranscriptionError> {
        let (tx, rx) = bounded(EVENT_CHANNEL_CAPACITY);
        self.error_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        self.chunk_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.reclassification_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.status_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.error_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Events dropped because a subscriber channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    fn fan_out<T: Clone>(&self, subs: &Mutex<Vec<Sender<T>>>, event: &T) {
        let mut subs = subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn publish_chunk(&self, chunk: &TranscriptionChunk) {
        self.fan_out(&self.chunk_subs, chunk);
    }

    pub fn publish_reclassification(&self, event: &SpeakerReclassification) {
        self.fan_out(&self.reclassification_subs, event);
    }

    pub fn publish_status(&self, status: &TranscriptionStatus) {
        self.fan_out(&self.status_subs, status);
    }

    pub fn publish_error(&self, error: &TranscriptionError) {
        self.fan_out(&self.error_subs, error);
    }

    /// Publish the terminal status, waiting briefly for full channels so
    /// draining subscribers always see the final state.
    pub fn publish_final_status(&self, status: &TranscriptionStatus) {
        let mut subs = self
            .status_subs
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        subs.retain(|tx| match tx.send_timeout(status.clone(), FINAL_STATUS_TIMEOUT) {
            Ok(()) => true,
            Err(crossbeam_channel::SendTimeoutError::Timeout(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => false,
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: u64) -> TranscriptionChunk {
        TranscriptionChunk {
            id,
            text: "hello".to_string(),
            start_ms: 0,
            end_ms: 1000,
            speaker_id: 0,
            speaker_confidence: 0.9,
            finalized: false,
            words: Vec::new(),
        }
    }

    fn status(state: SessionState) -> TranscriptionStatus {
        TranscriptionStatus {
            state,
            elapsed_ms: 0,
            chunks_emitted: 0,
            reclassifications: 0,
            current_device: String::new(),
            realtime_factor: 0.0,
            audio_buffer_ms: 0,
        }
    }

    #[test]
    fn test_chunk_duration() {
        assert_eq!(chunk(1).duration_ms(), 1000);
    }

    #[test]
    fn test_subscribe_and_receive() {
        let bus = EventBus::new();
        let rx = bus.subscribe_chunks();
        bus.publish_chunk(&chunk(1));
        assert_eq!(rx.recv().unwrap().id, 1);
    }

    #[test]
    fn test_multiple_subscribers_each_get_events() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe_chunks();
        let rx2 = bus.subscribe_chunks();
        bus.publish_chunk(&chunk(7));
        assert_eq!(rx1.recv().unwrap().id, 7);
        assert_eq!(rx2.recv().unwrap().id, 7);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let bus = EventBus::new();
        let _rx = bus.subscribe_chunks();
        // Overfill the channel; the publisher must not block
        for i in 0..(CHUNK_CHANNEL_CAPACITY as u64 + 10) {
            bus.publish_chunk(&chunk(i));
        }
        assert_eq!(bus.dropped_events(), 10);
    }

    #[test]
    fn test_disconnected_subscriber_is_removed() {
        let bus = EventBus::new();
        let rx = bus.subscribe_chunks();
        drop(rx);
        bus.publish_chunk(&chunk(1));
        // Publishing again does not count drops for dead subscribers
        bus.publish_chunk(&chunk(2));
        assert_eq!(bus.dropped_events(), 0);
    }

    #[test]
    fn test_clear_subscriptions() {
        let bus = EventBus::new();
        let rx = bus.subscribe_chunks();
        bus.clear();
        bus.publish_chunk(&chunk(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_error_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe_errors();
        bus.publish_error(&TranscriptionError {
            severity: Severity::Warning,
            message: "queue overflow".to_string(),
            details: String::new(),
            timestamp_ms: 1234,
        });
        let err = rx.recv().unwrap();
        assert_eq!(err.severity, Severity::Warning);
        assert_eq!(err.timestamp_ms, 1234);
    }

    #[test]
    fn test_final_status_reaches_draining_subscriber() {
        let bus = EventBus::new();
        let rx = bus.subscribe_status();
        bus.publish_status(&status(SessionState::Running));
        bus.publish_final_status(&status(SessionState::Idle));

        let mut last = None;
        while let Ok(s) = rx.try_recv() {
            last = Some(s);
        }
        assert_eq!(last.unwrap().state, SessionState::Idle);
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(SessionState::Running.to_string(), "running");
        assert_eq!(SessionState::Error.to_string(), "error");
    }
}
