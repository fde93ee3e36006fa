//! Continuous frame-level speaker analysis.
//!
//! Independently of ASR segmentation, the analyzer cuts the incoming 16kHz
//! stream into fixed-hop analysis frames and attaches a speaker embedding to
//! each. Frames feed two consumers: majority voting over a time range (to
//! label a transcript chunk) and the terminal offline re-clustering pass.

use crate::defaults;
use crate::diar::cluster::recluster_frames;
use crate::diar::embedder::{l2_normalize, SpeakerEmbedder};
use crate::error::Result;
use std::collections::VecDeque;

/// One analysis frame with its speaker embedding.
#[derive(Debug, Clone)]
pub struct SpeakerFrame {
    /// Absolute start time, ms since session start.
    pub t_start_ms: u64,
    /// Absolute end time; always `t_start_ms + window_ms`.
    pub t_end_ms: u64,
    /// Unit-norm embedding.
    pub embedding: Vec<f32>,
    /// Assigned speaker, -1 until clustering runs.
    pub speaker_id: i32,
    /// Confidence of the assignment, 0.0-1.0.
    pub confidence: f32,
}

/// Analyzer configuration, all in milliseconds except `history_sec`.
#[derive(Debug, Clone)]
pub struct FrameAnalyzerConfig {
    /// Stride between consecutive frame starts.
    pub hop_ms: u32,
    /// Audio span covered by each frame.
    pub window_ms: u32,
    /// Frames older than this are discarded (0 = keep everything).
    pub history_sec: u32,
}

impl Default for FrameAnalyzerConfig {
    fn default() -> Self {
        Self {
            hop_ms: defaults::FRAME_HOP_MS,
            window_ms: defaults::FRAME_WINDOW_MS,
            history_sec: defaults::FRAME_HISTORY_SEC,
        }
    }
}

/// Fixed-hop speaker-embedding extractor.
///
/// Frame `n` spans `[n * hop_ms, n * hop_ms + window_ms)` and is produced
/// only once that full window of audio has accumulated; no frame is emitted
/// for the first `window_ms` of a session. (The first frame is therefore
/// centered at `window_ms / 2` rather than at zero, matching the behavior
/// this analyzer was validated against.)
pub struct FrameAnalyzer {
    config: FrameAnalyzerConfig,
    /// Rolling audio buffer; `audio[0]` is absolute sample `buffer_offset`.
    audio: Vec<i16>,
    buffer_offset: usize,
    next_frame_start_ms: u64,
    frames: VecDeque<SpeakerFrame>,
}

impl FrameAnalyzer {
    pub fn new(config: FrameAnalyzerConfig) -> Self {
        Self {
            config,
            audio: Vec::new(),
            buffer_offset: 0,
            next_frame_start_ms: 0,
            frames: VecDeque::new(),
        }
    }

    /// Total absolute samples observed so far.
    fn total_samples(&self) -> usize {
        self.buffer_offset + self.audio.len()
    }

    /// Append 16kHz mono audio and extract any frames that became complete.
    ///
    /// Returns the number of frames extracted by this call.
    pub fn add_audio(
        &mut self,
        samples: &[i16],
        embedder: &mut dyn SpeakerEmbedder,
    ) -> Result<usize> {
        self.audio.extend_from_slice(samples);

        let window_samples = defaults::ms_to_samples(self.config.window_ms);
        let total = self.total_samples();
        let total_ms = defaults::samples_to_ms(total);
        let mut extracted = 0usize;

        while self.next_frame_start_ms + self.config.window_ms as u64 <= total_ms {
            let start_sample = defaults::ms_to_samples(self.next_frame_start_ms as u32);
            let rel = start_sample - self.buffer_offset;
            let slice = &self.audio[rel..rel + window_samples];

            let mut embedding = embedder.embed(slice)?;
            l2_normalize(&mut embedding);

            self.frames.push_back(SpeakerFrame {
                t_start_ms: self.next_frame_start_ms,
                t_end_ms: self.next_frame_start_ms + self.config.window_ms as u64,
                embedding,
                speaker_id: -1,
                confidence: 0.0,
            });
            extracted += 1;
            self.next_frame_start_ms += self.config.hop_ms as u64;
        }

        self.trim(total_ms);
        Ok(extracted)
    }

    fn trim(&mut self, now_ms: u64) {
        if self.config.history_sec > 0 {
            let cutoff = now_ms.saturating_sub(self.config.history_sec as u64 * 1000);
            while let Some(front) = self.frames.front() {
                if front.t_end_ms < cutoff {
                    self.frames.pop_front();
                } else {
                    break;
                }
            }
        }

        // Keep at most 2 windows of audio behind the newest sample, but
        // never discard samples the next frame still needs.
        let window_samples = defaults::ms_to_samples(self.config.window_ms);
        let next_frame_sample = defaults::ms_to_samples(self.next_frame_start_ms as u32);
        let keep_from = self
            .total_samples()
            .saturating_sub(2 * window_samples)
            .min(next_frame_sample);
        if keep_from > self.buffer_offset {
            self.audio.drain(..keep_from - self.buffer_offset);
            self.buffer_offset = keep_from;
        }
    }

    /// Frames overlapping `[t0_ms, t1_ms)`.
    pub fn frames_in_range(&self, t0_ms: u64, t1_ms: u64) -> Vec<&SpeakerFrame> {
        self.frames
            .iter()
            .filter(|f| f.t_end_ms > t0_ms && f.t_start_ms < t1_ms)
            .collect()
    }

    /// Run offline clustering over all stored frames, writing each frame's
    /// `speaker_id`. Returns the number of clusters found.
    pub fn cluster_frames(&mut self, max_speakers: usize, threshold: f32) -> usize {
        recluster_frames(self.frames.make_contiguous(), max_speakers, threshold)
    }

    /// All stored frames in time order.
    pub fn all_frames(&self) -> impl Iterator<Item = &SpeakerFrame> {
        self.frames.iter()
    }

    /// Number of stored frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Majority-vote speaker over frames overlapping `[t0_ms, t1_ms)`.
    ///
    /// Returns the winning speaker and the fraction of votes it received,
    /// or `None` when no assigned frames overlap the range.
    pub fn majority_speaker(&self, t0_ms: u64, t1_ms: u64) -> Option<(i32, f32)> {
        let mut votes: std::collections::BTreeMap<i32, u32> = std::collections::BTreeMap::new();
        let mut total = 0u32;
        for frame in self.frames_in_range(t0_ms, t1_ms) {
            if frame.speaker_id >= 0 {
                *votes.entry(frame.speaker_id).or_insert(0) += 1;
                total += 1;
            }
        }
        let (&winner, &count) = votes.iter().max_by_key(|(_, &count)| count)?;
        Some((winner, count as f32 / total as f32))
    }
}
