//! Capture and processing threads.
//!
//! Two threads per session: the capture loop reads chunks from the audio
//! source and pushes them into the bounded queue; the worker pops, resamples,
//! fans audio out to the frame analyzer and the streaming window, runs the
//! ASR engine per window, arbitrates segments, and emits chunks. The worker
//! also owns the end-of-session sequence: held-segment release, tail flush,
//! terminal re-clustering, and the final status.

use crate::asr::engine::{AsrEngine, AsrWord};
use crate::audio::queue::{AudioQueue, PushOutcome};
use crate::audio::resample::resample_to_16k;
use crate::audio::source::{AudioChunk, AudioSource};
use crate::audio::writer::CaptureWriter;
use crate::config::TranscriptionConfig;
use crate::controller::events::{
    ChunkWord, SessionState, Severity, SpeakerReclassification, TranscriptionChunk,
    UNKNOWN_SPEAKER,
};
use crate::controller::Shared;
use crate::defaults;
use crate::diar::cluster::SpeakerClusterer;
use crate::diar::embedder::{l2_normalize, SpeakerEmbedder};
use crate::diar::frames::FrameAnalyzer;
use crate::error::SottoError;
use crate::streaming::arbiter::{HoldEmitArbiter, PendingSegment};
use crate::streaming::window::StreamingWindow;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// RMS level of a buffer in dBFS (-120 for digital silence).
pub(crate) fn rms_dbfs(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return -120.0;
    }
    let sum2: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    let rms = (sum2 / samples.len() as f64).sqrt();
    if rms > 0.0 {
        (20.0 * rms.log10()) as f32
    } else {
        -120.0
    }
}

/// Capture loop: source to queue, until end of source or cancellation.
pub(crate) fn capture_loop(
    mut source: Box<dyn AudioSource>,
    queue: Arc<AudioQueue>,
    shared: Arc<Shared>,
) {
    let mut overflow_reported = false;

    while shared.running.load(Ordering::SeqCst) {
        match source.read_chunk() {
            Ok(Some(chunk)) => {
                if queue.push(chunk) == PushOutcome::Dropped && !overflow_reported {
                    overflow_reported = true;
                    log::warn!(
                        "capture outran processing; dropping oldest audio (total {})",
                        queue.dropped_count()
                    );
                    shared.emit_error(
                        Severity::Warning,
                        "audio queue overflow; oldest audio dropped",
                        &format!("dropped_chunks={}", queue.dropped_count()),
                    );
                }
            }
            Ok(None) => break,
            Err(SottoError::TransientRead { message }) => {
                shared.emit_error(Severity::Warning, "transient capture error", &message);
            }
            Err(e) => {
                shared.errored.store(true, Ordering::SeqCst);
                shared.emit_error(Severity::Fatal, "capture device lost", &e.to_string());
                break;
            }
        }
    }

    let _ = source.stop();
    queue.stop();
}

/// The processing task: owns the window, arbiter, engines, and clusterer.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    queue: Arc<AudioQueue>,
    config: TranscriptionConfig,
    engine: Option<Box<dyn AsrEngine>>,
    embedder: Option<Box<dyn SpeakerEmbedder>>,
    window: StreamingWindow,
    arbiter: HoldEmitArbiter,
    analyzer: Option<FrameAnalyzer>,
    clusterer: SpeakerClusterer,
    writer: Option<CaptureWriter>,
    /// Chunk ids awaiting publication when partial results are disabled.
    deferred_ids: Vec<u64>,
    last_status_at: Instant,
}

impl Worker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        queue: Arc<AudioQueue>,
        config: TranscriptionConfig,
        engine: Option<Box<dyn AsrEngine>>,
        embedder: Option<Box<dyn SpeakerEmbedder>>,
        window: StreamingWindow,
        analyzer: Option<FrameAnalyzer>,
        writer: Option<CaptureWriter>,
    ) -> Self {
        let clusterer = SpeakerClusterer::new(config.max_speakers, config.speaker_threshold);
        Self {
            shared,
            queue,
            config,
            engine,
            embedder,
            window,
            arbiter: HoldEmitArbiter::new(),
            analyzer,
            clusterer,
            writer,
            deferred_ids: Vec::new(),
            last_status_at: Instant::now(),
        }
    }

    /// Main processing loop. Exits when cancelled or when the capture side
    /// closes the queue, then runs the termination sequence.
    pub(crate) fn run(mut self) {
        loop {
            if !self.shared.running.load(Ordering::SeqCst) {
                break;
            }
            if self.shared.paused.load(Ordering::SeqCst) {
                // Queue intake continues while paused; consumption does not.
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            match self.queue.pop_timeout(Duration::from_millis(100)) {
                Some(chunk) => self.ingest(chunk),
                None => {
                    if self.queue.is_stopped() {
                        break;
                    }
                }
            }
        }
        self.finish();
    }

    fn ingest(&mut self, chunk: AudioChunk) {
        let samples = if chunk.sample_rate != defaults::SAMPLE_RATE {
            resample_to_16k(&chunk.samples, chunk.sample_rate)
        } else {
            chunk.samples
        };
        if samples.is_empty() {
            return;
        }

        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.write(&samples) {
                log::warn!("capture recording failed, disabling: {}", e);
                self.writer = None;
            }
        }

        self.shared
            .metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .audio_ms += defaults::samples_to_ms(samples.len());

        // Frame path runs independently of ASR windowing
        if let (Some(analyzer), Some(embedder)) =
            (self.analyzer.as_mut(), self.embedder.as_mut())
        {
            let started = Instant::now();
            if let Err(e) = analyzer.add_audio(&samples, embedder.as_mut()) {
                self.shared.emit_error(
                    Severity::Warning,
                    "frame embedding failed",
                    &e.to_string(),
                );
            }
            self.shared
                .metrics
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .diar_time_ms += started.elapsed().as_millis() as u64;
        }

        let mut offset = 0;
        while offset < samples.len() {
            offset += self.window.append(&samples[offset..]);
            if self.window.is_full() {
                self.process_window();
            }
        }

        let status_interval =
            Duration::from_millis(self.config.chunk_emission_interval_ms.max(50) as u64);
        if self.last_status_at.elapsed() >= status_interval {
            self.last_status_at = Instant::now();
            let status = self.shared.snapshot_status();
            self.shared.events.publish_status(&status);
        }
    }

    /// Transcribe one full window and arbitrate its segments.
    fn process_window(&mut self) {
        // Live-tunable speaker parameters
        self.clusterer
            .set_max_speakers(self.shared.max_speakers.load(Ordering::SeqCst));
        self.clusterer.set_threshold(self.shared.speaker_threshold());

        let mut to_emit: Vec<PendingSegment> = Vec::new();
        {
            let Some(view) = self.window.ready_window() else {
                return;
            };
            let new_audio = &view.samples[view.new_audio_offset..];

            // Too little new audio, or silence: skip the engine entirely.
            // A skipped window still confirms held segments' trailing
            // context (the speaker went quiet), so release them.
            let worth_transcribing = new_audio.len() >= defaults::MIN_WINDOW_SAMPLES
                && rms_dbfs(new_audio) > self.config.silence_gate_dbfs;
            if !worth_transcribing {
                to_emit.extend(self.arbiter.release_held());
            }

            if worth_transcribing {
                if let Some(engine) = self.engine.as_mut() {
                    let started = Instant::now();
                    // The engine sees the whole buffer: the overlap prefix is
                    // leading context, and the watermark drops re-transcribed
                    // duplicates from it.
                    match engine.transcribe(view.samples) {
                        Ok(segments) => {
                            {
                                let mut metrics = self
                                    .shared
                                    .metrics
                                    .lock()
                                    .unwrap_or_else(|e| e.into_inner());
                                metrics.asr_time_ms += started.elapsed().as_millis() as u64;
                                metrics.windows += 1;
                            }

                            // Held segments from the previous window go out
                            // first, now that this window confirmed their
                            // trailing context.
                            to_emit.extend(self.arbiter.release_held());

                            for seg in segments {
                                if seg.text.trim().is_empty() || seg.t1_ms <= seg.t0_ms {
                                    continue;
                                }
                                let start_ms = view.buffer_start_ms + seg.t0_ms;
                                let end_ms = view.buffer_start_ms + seg.t1_ms;

                                let mut speaker_id = UNKNOWN_SPEAKER;
                                let mut speaker_confidence = 0.0f32;
                                if let Some(embedder) = self.embedder.as_mut() {
                                    let s0 = defaults::ms_to_samples(seg.t0_ms as u32)
                                        .min(view.samples.len());
                                    let s1 = defaults::ms_to_samples(seg.t1_ms as u32)
                                        .min(view.samples.len());
                                    if s1 - s0 >= defaults::MIN_EMBED_SAMPLES {
                                        let diar_started = Instant::now();
                                        match embedder.embed(&view.samples[s0..s1]) {
                                            Ok(mut embedding) => {
                                                l2_normalize(&mut embedding);
                                                let assignment =
                                                    self.clusterer.assign(&embedding);
                                                speaker_id = assignment.speaker_id;
                                                speaker_confidence = assignment.confidence;
                                            }
                                            Err(e) => {
                                                self.shared.emit_error(
                                                    Severity::Warning,
                                                    "segment embedding failed",
                                                    &e.to_string(),
                                                );
                                            }
                                        }
                                        self.shared
                                            .metrics
                                            .lock()
                                            .unwrap_or_else(|e| e.into_inner())
                                            .diar_time_ms +=
                                            diar_started.elapsed().as_millis() as u64;
                                    }
                                }
                                self.shared.speaker_count.fetch_max(
                                    self.clusterer.speaker_count(),
                                    Ordering::SeqCst,
                                );

                                let words = absolute_words(&seg.words, view.buffer_start_ms);
                                let pending = PendingSegment {
                                    text: seg.text,
                                    start_ms,
                                    end_ms,
                                    speaker_id,
                                    speaker_confidence,
                                    words,
                                };
                                if let Some(ready) = self.arbiter.offer(
                                    pending,
                                    seg.t1_ms,
                                    view.emit_boundary_ms,
                                ) {
                                    to_emit.push(ready);
                                }
                            }
                        }
                        Err(e) => {
                            self.shared.emit_error(
                                Severity::Warning,
                                "transcription failed for window",
                                &e.to_string(),
                            );
                        }
                    }
                }
            }
        }

        for segment in to_emit {
            self.emit_chunk(segment);
        }
        self.window.slide();
    }

    /// End-of-session sequence: held release, tail flush, recluster, final
    /// status.
    fn finish(&mut self) {
        for segment in self.arbiter.release_held() {
            self.emit_chunk(segment);
        }

        self.flush_tail();

        // Anything still held after the flush (normally nothing)
        for segment in self.arbiter.release_held() {
            self.emit_chunk(segment);
        }

        if self.config.enable_diarization && self.config.enable_reclassification {
            self.terminal_recluster();
        }

        // Terminal pass is done: all labels are now final
        {
            let mut history = self.shared.history.lock().unwrap_or_else(|e| e.into_inner());
            for chunk in history.iter_mut() {
                chunk.finalized = true;
            }
        }

        if !self.config.enable_partial_results {
            self.publish_deferred();
        }

        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                log::warn!("failed to finalize capture recording: {}", e);
            }
        }

        self.shared
            .metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dropped_chunks = self.queue.dropped_count();

        let final_state = if self.shared.errored.load(Ordering::SeqCst) {
            SessionState::Error
        } else {
            SessionState::Idle
        };
        self.shared.set_state(final_state);
        self.shared.running.store(false, Ordering::SeqCst);
        let status = self.shared.snapshot_status();
        self.shared.events.publish_final_status(&status);
    }

    /// Transcribe the residual tail beyond the last window's overlap.
    fn flush_tail(&mut self) {
        let (samples, start_ms, new_offset) = self.window.drain();
        let new_len = samples.len().saturating_sub(new_offset);
        if new_len < defaults::MIN_FLUSH_SAMPLES {
            return;
        }
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        let flush_data = &samples[new_offset..];
        if rms_dbfs(flush_data) <= self.config.silence_gate_dbfs {
            return;
        }
        let flush_start_ms = start_ms + defaults::samples_to_ms(new_offset);

        let started = Instant::now();
        let segments = match engine.transcribe(flush_data) {
            Ok(segments) => segments,
            Err(e) => {
                self.shared.emit_error(
                    Severity::Warning,
                    "transcription failed for flush buffer",
                    &e.to_string(),
                );
                return;
            }
        };
        {
            let mut metrics = self.shared.metrics.lock().unwrap_or_else(|e| e.into_inner());
            metrics.asr_time_ms += started.elapsed().as_millis() as u64;
            metrics.windows += 1;
        }

        let mut to_emit = Vec::new();
        for seg in segments {
            if seg.text.trim().is_empty() || seg.t1_ms <= seg.t0_ms {
                continue;
            }
            let start = flush_start_ms + seg.t0_ms;
            let end = flush_start_ms + seg.t1_ms;

            let mut speaker_id = UNKNOWN_SPEAKER;
            let mut speaker_confidence = 0.0f32;
            if let Some(embedder) = self.embedder.as_mut() {
                let s0 = defaults::ms_to_samples(seg.t0_ms as u32).min(flush_data.len());
                let s1 = defaults::ms_to_samples(seg.t1_ms as u32).min(flush_data.len());
                if s1 - s0 >= defaults::MIN_EMBED_SAMPLES {
                    if let Ok(mut embedding) = embedder.embed(&flush_data[s0..s1]) {
                        l2_normalize(&mut embedding);
                        let assignment = self.clusterer.assign(&embedding);
                        speaker_id = assignment.speaker_id;
                        speaker_confidence = assignment.confidence;
                    }
                }
            }

            let pending = PendingSegment {
                text: seg.text,
                start_ms: start,
                end_ms: end,
                speaker_id,
                speaker_confidence,
                words: absolute_words(&seg.words, flush_start_ms),
            };
            if let Some(ready) = self.arbiter.flush(pending) {
                to_emit.push(ready);
            }
        }
        for segment in to_emit {
            self.emit_chunk(segment);
        }
    }

    /// Store and publish one chunk.
    fn emit_chunk(&mut self, segment: PendingSegment) {
        let id = self.shared.next_chunk_id.fetch_add(1, Ordering::SeqCst);
        let chunk = TranscriptionChunk {
            id,
            text: segment.text.trim().to_string(),
            start_ms: segment.start_ms,
            end_ms: segment.end_ms,
            speaker_id: segment.speaker_id,
            speaker_confidence: segment.speaker_confidence,
            finalized: !self.config.enable_reclassification,
            words: segment
                .words
                .iter()
                .map(|w| ChunkWord {
                    text: w.text.clone(),
                    t0_ms: w.t0_ms,
                    t1_ms: w.t1_ms,
                    probability: w.probability,
                })
                .collect(),
        };

        {
            let mut history = self.shared.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push_back(chunk.clone());
            while history.len() > defaults::HISTORY_CAP {
                history.pop_front();
            }
        }
        self.shared.chunks_emitted.fetch_add(1, Ordering::SeqCst);
        self.shared
            .metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .segments += 1;
        self.shared.update_stats(&chunk);

        if self.config.enable_partial_results {
            self.shared.events.publish_chunk(&chunk);
        } else {
            self.deferred_ids.push(id);
        }
    }

    /// Offline re-cluster and majority-vote reassignment of emitted chunks.
    fn terminal_recluster(&mut self) {
        let Some(analyzer) = self.analyzer.as_mut() else {
            return;
        };
        if analyzer.frame_count() == 0 {
            return;
        }

        let max_speakers = self.shared.max_speakers.load(Ordering::SeqCst);
        let threshold = self.shared.speaker_threshold();
        let clusters = analyzer.cluster_frames(max_speakers, threshold);
        self.shared
            .speaker_count
            .fetch_max(clusters, Ordering::SeqCst);

        let total_audio_ms = self
            .shared
            .metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .audio_ms;
        let reach_floor_ms = if self.config.reclassification_window_ms > 0 {
            total_audio_ms.saturating_sub(self.config.reclassification_window_ms)
        } else {
            0
        };

        // (old, new) -> affected chunk ids
        let mut changes: BTreeMap<(i32, i32), Vec<u64>> = BTreeMap::new();
        {
            let analyzer = &*analyzer;
            let mut history = self.shared.history.lock().unwrap_or_else(|e| e.into_inner());
            for chunk in history.iter_mut() {
                if chunk.start_ms < reach_floor_ms {
                    continue;
                }
                let Some((speaker, confidence)) =
                    analyzer.majority_speaker(chunk.start_ms, chunk.end_ms)
                else {
                    continue;
                };
                if speaker != chunk.speaker_id {
                    changes
                        .entry((chunk.speaker_id, speaker))
                        .or_default()
                        .push(chunk.id);
                    chunk.speaker_id = speaker;
                }
                chunk.speaker_confidence = confidence;
            }
        }

        if changes.is_empty() {
            return;
        }

        self.shared.rebuild_stats();
        for ((old_speaker_id, new_speaker_id), chunk_ids) in changes {
            self.shared
                .reclassifications
                .fetch_add(1, Ordering::SeqCst);
            // With partial results disabled no chunk has been published
            // yet; subscribers only ever see the corrected labels, so the
            // correction events would reference unseen chunks.
            if self.config.enable_partial_results {
                self.shared
                    .events
                    .publish_reclassification(&SpeakerReclassification {
                        chunk_ids,
                        old_speaker_id,
                        new_speaker_id,
                        reason: "terminal_recluster".to_string(),
                    });
            }
        }
    }

    /// Publish chunks whose emission was deferred until finalization.
    fn publish_deferred(&mut self) {
        let history = self.shared.history.lock().unwrap_or_else(|e| e.into_inner());
        for id in &self.deferred_ids {
            if let Some(chunk) = history.iter().find(|c| c.id == *id) {
                self.shared.events.publish_chunk(chunk);
            }
        }
        drop(history);
        self.deferred_ids.clear();
    }
}

fn absolute_words(words: &[AsrWord], base_ms: u64) -> Vec<AsrWord> {
    words
        .iter()
        .map(|w| AsrWord {
            text: w.text.clone(),
            t0_ms: base_ms + w.t0_ms,
            t1_ms: base_ms + w.t1_ms,
            probability: w.probability,
        })
        .collect()
}
