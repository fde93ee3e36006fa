//! Session lifecycle and the public transcription API.
//!
//! [`TranscriptionController`] owns the session: the capture and processing
//! threads, the chunk history, event subscriptions, and configuration. One
//! controller serves one session at a time; a fresh `start` resets all
//! session state.

pub mod events;
pub(crate) mod worker;

pub use events::{
    ChunkWord, EventBus, SessionState, Severity, SpeakerReclassification, SpeakerStats,
    TranscriptionChunk, TranscriptionError, TranscriptionStatus, UNKNOWN_SPEAKER,
};

use crate::asr::engine::AsrEngine;
use crate::asr::whisper::{WhisperConfig, WhisperEngine};
use crate::audio::capture::{enumerate_devices, open_source};
use crate::audio::queue::AudioQueue;
use crate::audio::source::{AudioDeviceInfo, AudioSource, SourceConfig};
use crate::audio::writer::CaptureWriter;
use crate::config::TranscriptionConfig;
use crate::defaults;
use crate::diar::embedder::SpeakerEmbedder;
use crate::diar::frames::{FrameAnalyzer, FrameAnalyzerConfig};
use crate::diar::spectral::SpectralEmbedder;
use crate::error::{Result, SottoError};
use crate::streaming::window::StreamingWindow;
use crossbeam_channel::Receiver;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// Outcome of a live configuration update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    /// All changes took effect.
    Applied,
    /// Live-tunable fields were applied; the rest needs a session restart.
    RequiresRestart,
}

/// Cumulative processing metrics for the session.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PerformanceMetrics {
    /// Processing time over audio time; < 1.0 keeps up with live audio.
    pub realtime_factor: f32,
    pub asr_time_ms: u64,
    pub diarization_time_ms: u64,
    pub windows_processed: u64,
    pub segments_processed: u64,
    pub audio_processed_ms: u64,
    pub dropped_chunks: u64,
    pub dropped_events: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MetricsInner {
    pub asr_time_ms: u64,
    pub diar_time_ms: u64,
    pub windows: u64,
    pub segments: u64,
    pub audio_ms: u64,
    /// Snapshot of the queue's drop counter, persisted at session end.
    pub dropped_chunks: u64,
}

/// State shared between the controller and its session threads.
pub(crate) struct Shared {
    pub running: AtomicBool,
    pub paused: AtomicBool,
    pub errored: AtomicBool,
    pub state: Mutex<SessionState>,
    pub config: Mutex<TranscriptionConfig>,
    pub selected_device: Mutex<String>,
    pub history: Mutex<VecDeque<TranscriptionChunk>>,
    pub next_chunk_id: AtomicU64,
    pub chunks_emitted: AtomicU64,
    pub reclassifications: AtomicU64,
    pub speaker_count: AtomicUsize,
    pub max_speakers: AtomicUsize,
    speaker_threshold_bits: AtomicU32,
    pub stats: Mutex<BTreeMap<i32, SpeakerStats>>,
    pub metrics: Mutex<MetricsInner>,
    pub events: EventBus,
    pub queue: Mutex<Option<Arc<AudioQueue>>>,
    pub session_start: Mutex<Option<Instant>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            errored: AtomicBool::new(false),
            state: Mutex::new(SessionState::Idle),
            config: Mutex::new(TranscriptionConfig::default()),
            selected_device: Mutex::new(String::new()),
            history: Mutex::new(VecDeque::new()),
            next_chunk_id: AtomicU64::new(1),
            chunks_emitted: AtomicU64::new(0),
            reclassifications: AtomicU64::new(0),
            speaker_count: AtomicUsize::new(0),
            max_speakers: AtomicUsize::new(defaults::MAX_SPEAKERS),
            speaker_threshold_bits: AtomicU32::new(defaults::SPEAKER_THRESHOLD.to_bits()),
            stats: Mutex::new(BTreeMap::new()),
            metrics: Mutex::new(MetricsInner::default()),
            events: EventBus::new(),
            queue: Mutex::new(None),
            session_start: Mutex::new(None),
        }
    }

    pub(crate) fn speaker_threshold(&self) -> f32 {
        f32::from_bits(self.speaker_threshold_bits.load(Ordering::SeqCst))
    }

    pub(crate) fn set_speaker_threshold(&self, threshold: f32) {
        self.speaker_threshold_bits
            .store(threshold.to_bits(), Ordering::SeqCst);
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.session_start
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    pub(crate) fn snapshot_status(&self) -> TranscriptionStatus {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let realtime_factor = if metrics.audio_ms > 0 {
            (metrics.asr_time_ms + metrics.diar_time_ms) as f32 / metrics.audio_ms as f32
        } else {
            0.0
        };
        drop(metrics);

        let audio_buffer_ms = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|q| q.buffered_ms())
            .unwrap_or(0);

        TranscriptionStatus {
            state: *self.state.lock().unwrap_or_else(|e| e.into_inner()),
            elapsed_ms: self.elapsed_ms(),
            chunks_emitted: self.chunks_emitted.load(Ordering::SeqCst),
            reclassifications: self.reclassifications.load(Ordering::SeqCst),
            current_device: self
                .selected_device
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            realtime_factor,
            audio_buffer_ms,
        }
    }

    pub(crate) fn emit_error(&self, severity: Severity, message: &str, details: &str) {
        self.events.publish_error(&TranscriptionError {
            severity,
            message: message.to_string(),
            details: details.to_string(),
            timestamp_ms: self.elapsed_ms(),
        });
    }

    pub(crate) fn update_stats(&self, chunk: &TranscriptionChunk) {
        if chunk.speaker_id < 0 {
            return;
        }
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        let entry = stats
            .entry(chunk.speaker_id)
            .or_insert_with(|| SpeakerStats {
                speaker_id: chunk.speaker_id,
                ..SpeakerStats::default()
            });
        entry.total_speaking_time_ms += chunk.duration_ms();
        entry.segment_count += 1;
        entry.last_text = chunk.text.clone();
    }

    /// Recompute speaker stats from scratch after reclassification.
    pub(crate) fn rebuild_stats(&self) {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.clear();
        for chunk in history.iter() {
            if chunk.speaker_id < 0 {
                continue;
            }
            let entry = stats
                .entry(chunk.speaker_id)
                .or_insert_with(|| SpeakerStats {
                    speaker_id: chunk.speaker_id,
                    ..SpeakerStats::default()
                });
            entry.total_speaking_time_ms += chunk.duration_ms();
            entry.segment_count += 1;
            entry.last_text = chunk.text.clone();
        }
    }
}

/// Controller for real-time transcription with speaker diarization.
///
/// Spawns one capture thread and one processing thread per session; all
/// public methods are safe to call from any thread. Events reach
/// subscribers through bounded channels, so a slow subscriber loses events
/// rather than stalling the pipeline.
///
/// # Example
/// ```no_run
/// use sotto::controller::TranscriptionController;
/// use sotto::config::TranscriptionConfig;
///
/// let mut controller = TranscriptionController::new();
/// let chunks = controller.subscribe_chunks();
/// controller.start(TranscriptionConfig::default()).unwrap();
/// while let Ok(chunk) = chunks.recv() {
///     println!("[S{}] {}", chunk.speaker_id, chunk.text);
/// }
/// controller.stop();
/// ```
pub struct TranscriptionController {
    shared: Arc<Shared>,
    engine: Option<Box<dyn AsrEngine>>,
    embedder: Option<Box<dyn SpeakerEmbedder>>,
    source: Option<Box<dyn AudioSource>>,
    capture_handle: Option<JoinHandle<()>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl TranscriptionController {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            engine: None,
            embedder: None,
            source: None,
            capture_handle: None,
            worker_handle: None,
        }
    }

    /// Inject an ASR engine for the next session, replacing the default
    /// Whisper adapter. Mainly for tests and alternative engines.
    pub fn set_engine(&mut self, engine: Box<dyn AsrEngine>) {
        self.engine = Some(engine);
    }

    /// Inject a speaker embedder for the next session, replacing the
    /// built-in spectral embedder.
    pub fn set_embedder(&mut self, embedder: Box<dyn SpeakerEmbedder>) {
        self.embedder = Some(embedder);
    }

    /// Inject an audio source for the next session, replacing device
    /// resolution from the selected device id.
    pub fn set_source(&mut self, source: Box<dyn AudioSource>) {
        self.source = Some(source);
    }

    /// List available audio input devices (always includes the file source).
    pub fn list_audio_devices(&self) -> Result<Vec<AudioDeviceInfo>> {
        enumerate_devices()
    }

    /// Select the capture device for the next session.
    ///
    /// Fails with [`SottoError::LifecycleViolation`] while running.
    pub fn select_audio_device(&self, device_id: &str) -> Result<()> {
        if self.is_running() {
            return Err(SottoError::LifecycleViolation {
                message: "cannot change device while transcription is running".to_string(),
            });
        }
        *self
            .shared
            .selected_device
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = device_id.to_string();
        Ok(())
    }

    /// Currently selected device id (empty = system default).
    pub fn selected_device(&self) -> String {
        self.shared
            .selected_device
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Start a session with the given configuration.
    ///
    /// Fails synchronously on invalid config, open failure of the capture
    /// device, or model load failure; no threads are left behind on error.
    pub fn start(&mut self, config: TranscriptionConfig) -> Result<()> {
        if self.is_running() {
            return Err(SottoError::LifecycleViolation {
                message: "transcription already running".to_string(),
            });
        }
        config.validate()?;

        // Join any finished previous session before reusing state
        self.join_threads();

        let mut source = match self.source.take() {
            Some(source) => source,
            None => {
                let source_config = SourceConfig {
                    device_id: self.selected_device(),
                    ..SourceConfig::default()
                };
                open_source(&source_config)?
            }
        };

        let engine: Option<Box<dyn AsrEngine>> = if config.enable_asr {
            Some(match self.engine.take() {
                Some(engine) => engine,
                None => Box::new(WhisperEngine::load(WhisperConfig {
                    model: config.asr_model.clone(),
                    language: config.language.clone(),
                    threads: config.threads,
                    ..WhisperConfig::default()
                })?),
            })
        } else {
            None
        };

        let embedder: Option<Box<dyn SpeakerEmbedder>> = if config.enable_diarization {
            Some(match self.embedder.take() {
                Some(embedder) => embedder,
                None => {
                    if config.embedder_model.is_empty() {
                        Box::new(SpectralEmbedder::new())
                    } else {
                        return Err(SottoError::ModelLoadFailed {
                            model: config.embedder_model.clone(),
                            message: "no backend available for external embedder models"
                                .to_string(),
                        });
                    }
                }
            })
        } else {
            None
        };

        let window = StreamingWindow::new(config.window_ms, config.overlap_ms)?;
        let analyzer = if config.enable_diarization {
            Some(FrameAnalyzer::new(FrameAnalyzerConfig::default()))
        } else {
            None
        };
        let writer = match config.save_audio_path.as_deref() {
            Some(path) => Some(CaptureWriter::create(path)?),
            None => None,
        };

        // Reset session state
        {
            self.shared
                .history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            self.shared
                .stats
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            *self.shared.metrics.lock().unwrap_or_else(|e| e.into_inner()) =
                MetricsInner::default();
            self.shared.next_chunk_id.store(1, Ordering::SeqCst);
            self.shared.chunks_emitted.store(0, Ordering::SeqCst);
            self.shared.reclassifications.store(0, Ordering::SeqCst);
            self.shared.speaker_count.store(0, Ordering::SeqCst);
            self.shared.errored.store(false, Ordering::SeqCst);
            self.shared
                .max_speakers
                .store(config.max_speakers, Ordering::SeqCst);
            self.shared.set_speaker_threshold(config.speaker_threshold);
            *self.shared.config.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        }

        let queue = Arc::new(AudioQueue::new());
        *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()) = Some(queue.clone());

        self.shared.set_state(SessionState::Starting);
        self.shared
            .events
            .publish_status(&self.shared.snapshot_status());

        // Device-open errors surface here, before any thread is spawned
        if let Err(e) = source.start() {
            *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()) = None;
            self.shared.set_state(SessionState::Idle);
            return Err(e);
        }

        *self
            .shared
            .session_start
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);

        let capture_shared = self.shared.clone();
        let capture_queue = queue.clone();
        self.capture_handle = Some(std::thread::spawn(move || {
            worker::capture_loop(source, capture_queue, capture_shared);
        }));

        let worker = worker::Worker::new(
            self.shared.clone(),
            queue,
            config,
            engine,
            embedder,
            window,
            analyzer,
            writer,
        );
        self.worker_handle = Some(std::thread::spawn(move || worker.run()));

        self.shared.set_state(SessionState::Running);
        self.shared
            .events
            .publish_status(&self.shared.snapshot_status());
        Ok(())
    }

    /// Stop the session, draining the pipeline.
    ///
    /// Idempotent. Blocks until held segments are emitted, the tail is
    /// flushed, terminal re-clustering has run, and the final status is
    /// published.
    pub fn stop(&mut self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.shared.set_state(SessionState::Stopping);
            self.shared
                .events
                .publish_status(&self.shared.snapshot_status());
            self.shared.running.store(false, Ordering::SeqCst);
            if let Some(queue) = self
                .shared
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .as_ref()
            {
                queue.stop();
            }
        }
        self.join_threads();
        *self.shared.queue.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Wait for the session to end on its own (file sources end at EOF).
    ///
    /// Returns immediately if no session is active.
    pub fn wait(&mut self) {
        self.join_threads();
    }

    fn join_threads(&mut self) {
        if let Some(handle) = self.capture_handle.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.join();
        }
    }

    /// Pause processing. Capture continues; queued audio is not consumed
    /// (drop-oldest applies if the queue fills).
    pub fn pause(&self) -> Result<()> {
        if !self.is_running() || self.shared.paused.load(Ordering::SeqCst) {
            return Err(SottoError::LifecycleViolation {
                message: "pause requires a running, unpaused session".to_string(),
            });
        }
        self.shared.paused.store(true, Ordering::SeqCst);
        self.shared.set_state(SessionState::Paused);
        self.shared
            .events
            .publish_status(&self.shared.snapshot_status());
        Ok(())
    }

    /// Resume after [`TranscriptionController::pause`].
    pub fn resume(&self) -> Result<()> {
        if !self.is_running() || !self.shared.paused.load(Ordering::SeqCst) {
            return Err(SottoError::LifecycleViolation {
                message: "resume requires a paused session".to_string(),
            });
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.set_state(SessionState::Running);
        self.shared
            .events
            .publish_status(&self.shared.snapshot_status());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> TranscriptionStatus {
        self.shared.snapshot_status()
    }

    // Event subscriptions. Each call creates an independent bounded channel.

    pub fn subscribe_chunks(&self) -> Receiver<TranscriptionChunk> {
        self.shared.events.subscribe_chunks()
    }

    pub fn subscribe_reclassifications(&self) -> Receiver<SpeakerReclassification> {
        self.shared.events.subscribe_reclassifications()
    }

    pub fn subscribe_status(&self) -> Receiver<TranscriptionStatus> {
        self.shared.events.subscribe_status()
    }

    pub fn subscribe_errors(&self) -> Receiver<TranscriptionError> {
        self.shared.events.subscribe_errors()
    }

    pub fn clear_subscriptions(&self) {
        self.shared.events.clear();
    }

    /// Distinct speakers observed so far in the session.
    pub fn speaker_count(&self) -> usize {
        self.shared.speaker_count.load(Ordering::SeqCst)
    }

    /// Set the speaker cap (1-10); takes effect immediately, even while
    /// running.
    pub fn set_max_speakers(&self, max_speakers: usize) -> Result<()> {
        if !(1..=10).contains(&max_speakers) {
            return Err(SottoError::InvalidConfig {
                key: "max_speakers".to_string(),
                message: format!("{} is outside 1..=10", max_speakers),
            });
        }
        self.shared.max_speakers.store(max_speakers, Ordering::SeqCst);
        self.shared
            .config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .max_speakers = max_speakers;
        Ok(())
    }

    pub fn max_speakers(&self) -> usize {
        self.shared.max_speakers.load(Ordering::SeqCst)
    }

    /// Snapshot of all emitted chunks, in emission order.
    pub fn all_chunks(&self) -> Vec<TranscriptionChunk> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn chunk_by_id(&self, id: u64) -> Option<TranscriptionChunk> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Clear the chunk history (the session keeps running).
    pub fn clear_history(&self) {
        self.shared
            .history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Per-speaker aggregates derived from the chunk history.
    pub fn speaker_stats(&self) -> Vec<SpeakerStats> {
        self.shared
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn config(&self) -> TranscriptionConfig {
        self.shared
            .config
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Update configuration.
    ///
    /// Not running: replaces the whole configuration. Running: applies the
    /// live-tunable fields and reports whether the remainder needs a
    /// restart. Invalid configurations are rejected without any change.
    pub fn update_config(&self, new_config: TranscriptionConfig) -> Result<ConfigOutcome> {
        new_config.validate()?;

        let mut config = self.shared.config.lock().unwrap_or_else(|e| e.into_inner());
        if !self.is_running() {
            *config = new_config;
            self.shared
                .max_speakers
                .store(config.max_speakers, Ordering::SeqCst);
            self.shared.set_speaker_threshold(config.speaker_threshold);
            return Ok(ConfigOutcome::Applied);
        }

        let needs_restart = config.requires_restart(&new_config);
        config.apply_live_fields(&new_config);
        self.shared
            .max_speakers
            .store(config.max_speakers, Ordering::SeqCst);
        self.shared.set_speaker_threshold(config.speaker_threshold);

        Ok(if needs_restart {
            ConfigOutcome::RequiresRestart
        } else {
            ConfigOutcome::Applied
        })
    }

    /// Cumulative performance metrics.
    pub fn metrics(&self) -> PerformanceMetrics {
        let inner = self.shared.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let realtime_factor = if inner.audio_ms > 0 {
            (inner.asr_time_ms + inner.diar_time_ms) as f32 / inner.audio_ms as f32
        } else {
            0.0
        };
        let dropped_chunks = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|q| q.dropped_count())
            .unwrap_or(0)
            .max(inner.dropped_chunks);
        PerformanceMetrics {
            realtime_factor,
            asr_time_ms: inner.asr_time_ms,
            diarization_time_ms: inner.diar_time_ms,
            windows_processed: inner.windows,
            segments_processed: inner.segments,
            audio_processed_ms: inner.audio_ms,
            dropped_chunks,
            dropped_events: self.shared.events.dropped_events(),
        }
    }
}

impl Default for TranscriptionController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TranscriptionController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::engine::MockAsrEngine;
    use crate::audio::source::MockAudioSource;
    use crate::diar::embedder::MockSpeakerEmbedder;

    fn quick_config() -> TranscriptionConfig {
        TranscriptionConfig {
            window_ms: 2_000,
            overlap_ms: 1_000,
            ..TranscriptionConfig::default()
        }
    }

    fn idle_controller() -> TranscriptionController {
        TranscriptionController::new()
    }

    /// Audio delivered in 1s chunks so the capacity-50 queue cannot
    /// overflow regardless of scheduling.
    fn steady_audio(seconds: usize, amplitude: i16) -> MockAudioSource {
        MockAudioSource::new().with_chunks(vec![vec![amplitude; 16_000]; seconds])
    }

    #[test]
    fn test_initial_state() {
        let controller = idle_controller();
        assert!(!controller.is_running());
        assert_eq!(controller.status().state, SessionState::Idle);
        assert_eq!(controller.speaker_count(), 0);
        assert!(controller.all_chunks().is_empty());
    }

    #[test]
    fn test_select_device_while_idle() {
        let controller = idle_controller();
        controller.select_audio_device("file").unwrap();
        assert_eq!(controller.selected_device(), "file");
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let mut controller = idle_controller();
        let mut config = quick_config();
        config.max_speakers = 0;
        assert!(matches!(
            controller.start(config),
            Err(SottoError::InvalidConfig { .. })
        ));
        assert!(!controller.is_running());
    }

    #[test]
    fn test_start_fails_on_device_open_error() {
        let mut controller = idle_controller();
        controller.set_engine(Box::new(MockAsrEngine::new()));
        controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
        controller.set_source(Box::new(MockAudioSource::new().with_start_failure()));

        assert!(matches!(
            controller.start(quick_config()),
            Err(SottoError::DeviceUnavailable { .. })
        ));
        assert!(!controller.is_running());
    }

    #[test]
    fn test_pause_requires_running() {
        let controller = idle_controller();
        assert!(matches!(
            controller.pause(),
            Err(SottoError::LifecycleViolation { .. })
        ));
        assert!(matches!(
            controller.resume(),
            Err(SottoError::LifecycleViolation { .. })
        ));
    }

    #[test]
    fn test_set_max_speakers_validation() {
        let controller = idle_controller();
        assert!(controller.set_max_speakers(0).is_err());
        assert!(controller.set_max_speakers(11).is_err());
        controller.set_max_speakers(4).unwrap();
        assert_eq!(controller.max_speakers(), 4);
        assert_eq!(controller.config().max_speakers, 4);
    }

    #[test]
    fn test_update_config_while_idle_replaces_everything() {
        let controller = idle_controller();
        let mut config = quick_config();
        config.asr_model = "base.en".to_string();
        assert_eq!(
            controller.update_config(config.clone()).unwrap(),
            ConfigOutcome::Applied
        );
        assert_eq!(controller.config().asr_model, "base.en");
        assert_eq!(controller.config().window_ms, 2_000);
    }

    #[test]
    fn test_update_config_rejects_invalid_without_change() {
        let controller = idle_controller();
        let before = controller.config();
        let mut config = quick_config();
        config.speaker_threshold = 2.0;
        assert!(controller.update_config(config).is_err());
        assert_eq!(controller.config(), before);
    }

    #[test]
    fn test_session_runs_to_completion_on_file_eof() {
        let mut controller = idle_controller();
        // 4s of audio at amplitude 3000: two 2s windows plus flush
        controller.set_source(Box::new(steady_audio(4, 3000)));
        controller.set_engine(Box::new(MockAsrEngine::new().with_script(vec![
            vec![crate::asr::engine::AsrSegment::new("hello there", 100, 900)],
        ])));
        controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));

        let status_rx = controller.subscribe_status();
        controller.start(quick_config()).unwrap();
        controller.wait();

        assert!(!controller.is_running());
        let chunks = controller.all_chunks();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "hello there");
        assert!(chunks[0].finalized);

        // Final status is Idle
        let mut last_state = None;
        while let Ok(status) = status_rx.try_recv() {
            last_state = Some(status.state);
        }
        assert_eq!(last_state, Some(SessionState::Idle));
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let mut controller = idle_controller();
        controller.set_source(Box::new(
            steady_audio(20, 3000).with_chunk_delay_ms(20),
        ));
        controller.set_engine(Box::new(MockAsrEngine::new()));
        controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
        controller.start(quick_config()).unwrap();

        assert!(matches!(
            controller.start(quick_config()),
            Err(SottoError::LifecycleViolation { .. })
        ));
        controller.stop();
    }

    #[test]
    fn test_select_device_while_running_is_rejected() {
        let mut controller = idle_controller();
        controller.set_source(Box::new(
            steady_audio(20, 3000).with_chunk_delay_ms(20),
        ));
        controller.set_engine(Box::new(MockAsrEngine::new()));
        controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
        controller.start(quick_config()).unwrap();

        assert!(matches!(
            controller.select_audio_device("other"),
            Err(SottoError::LifecycleViolation { .. })
        ));
        controller.stop();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut controller = idle_controller();
        controller.stop();
        controller.stop();
        assert!(!controller.is_running());
    }

    #[test]
    fn test_chunk_by_id_and_clear_history() {
        let mut controller = idle_controller();
        controller.set_source(Box::new(steady_audio(4, 3000)));
        controller.set_engine(Box::new(MockAsrEngine::new().with_script(vec![
            vec![crate::asr::engine::AsrSegment::new("findable", 100, 900)],
        ])));
        controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
        controller.start(quick_config()).unwrap();
        controller.wait();

        let chunks = controller.all_chunks();
        assert!(!chunks.is_empty());
        let id = chunks[0].id;
        assert_eq!(controller.chunk_by_id(id).unwrap().text, "findable");
        assert!(controller.chunk_by_id(9999).is_none());

        controller.clear_history();
        assert!(controller.all_chunks().is_empty());
    }

    #[test]
    fn test_fresh_start_resets_session_state() {
        let mut controller = idle_controller();
        controller.set_source(Box::new(steady_audio(4, 3000)));
        controller.set_engine(Box::new(MockAsrEngine::new().with_script(vec![
            vec![crate::asr::engine::AsrSegment::new("one", 100, 900)],
        ])));
        controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
        controller.start(quick_config()).unwrap();
        controller.wait();
        assert!(!controller.all_chunks().is_empty());

        // Second session starts clean
        controller.set_source(Box::new(steady_audio(4, 3000)));
        controller.set_engine(Box::new(MockAsrEngine::new()));
        controller.set_embedder(Box::new(MockSpeakerEmbedder::new()));
        controller.start(quick_config()).unwrap();
        controller.wait();
        assert!(controller.all_chunks().is_empty());
        assert_eq!(controller.metrics().segments_processed, 0);
    }
}
