//! Hold-and-emit arbitration for overlapping windows.
//!
//! Consecutive windows overlap, so the same stretch of audio is transcribed
//! more than once. The arbiter guarantees each piece of transcript is
//! emitted exactly once and in order:
//!
//! - the `last_emitted_end_ms` watermark kills segments that fall entirely
//!   inside already-emitted territory and trims ones that straddle it;
//! - segments reaching into a window's hold zone are deferred to the next
//!   window, so text cut off at the buffer edge is not emitted prematurely.

use crate::asr::engine::AsrWord;

/// A segment between ASR output and chunk emission, in absolute time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSegment {
    pub text: String,
    /// Absolute start, ms since session start.
    pub start_ms: u64,
    /// Absolute end, ms since session start.
    pub end_ms: u64,
    /// Online speaker assignment (-1 = unknown).
    pub speaker_id: i32,
    /// Confidence in the speaker assignment, 0.0-1.0.
    pub speaker_confidence: f32,
    /// Word-level detail with absolute timings, when available.
    pub words: Vec<AsrWord>,
}

/// Per-window emit/hold/drop decision state.
#[derive(Debug, Default)]
pub struct HoldEmitArbiter {
    held: Vec<PendingSegment>,
    last_emitted_end_ms: u64,
}

impl HoldEmitArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// High-water mark of emitted absolute end time.
    pub fn last_emitted_end_ms(&self) -> u64 {
        self.last_emitted_end_ms
    }

    /// Number of segments currently held for the next window.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Trim a segment against the watermark and, if it survives, advance
    /// the watermark and return it for emission.
    fn emit(&mut self, mut segment: PendingSegment) -> Option<PendingSegment> {
        if segment.text.trim().is_empty() {
            return None;
        }
        if segment.start_ms < self.last_emitted_end_ms {
            segment.start_ms = self.last_emitted_end_ms;
        }
        if segment.start_ms >= segment.end_ms {
            return None;
        }
        self.last_emitted_end_ms = self.last_emitted_end_ms.max(segment.end_ms);
        Some(segment)
    }

    /// Release all held segments for emission, oldest first.
    ///
    /// Called once per window before its new segments are arbitrated, and
    /// again at end of stream. Segments invalidated by the watermark are
    /// silently dropped.
    pub fn release_held(&mut self) -> Vec<PendingSegment> {
        let held = std::mem::take(&mut self.held);
        held.into_iter().filter_map(|s| self.emit(s)).collect()
    }

    /// Arbitrate one of the window's new segments.
    ///
    /// `t1_rel_ms` is the segment's end relative to the window buffer and
    /// `emit_boundary_ms` the buffer's emit/hold division. Returns the
    /// segment if it should be emitted now; `None` means it was held or
    /// dropped.
    pub fn offer(
        &mut self,
        segment: PendingSegment,
        t1_rel_ms: u64,
        emit_boundary_ms: u64,
    ) -> Option<PendingSegment> {
        if segment.text.trim().is_empty() {
            return None;
        }
        // Entirely inside already-emitted territory: duplicate from overlap
        if segment.end_ms <= self.last_emitted_end_ms {
            return None;
        }
        // Reaches into the hold zone: wait for the next window's context
        if t1_rel_ms >= emit_boundary_ms {
            self.held.push(segment);
            return None;
        }
        self.emit(segment)
    }

    /// Arbitrate a segment from the end-of-stream flush (nothing is held).
    pub fn flush(&mut self, segment: PendingSegment) -> Option<PendingSegment> {
        if segment.end_ms <= self.last_emitted_end_ms {
            return None;
        }
        self.emit(segment)
    }
}
