//! ASR engine trait and scripted mock.

use crate::error::{Result, SottoError};
use std::sync::{Arc, Mutex};

/// One word within a segment, with buffer-relative timings.
#[derive(Debug, Clone, PartialEq)]
pub struct AsrWord {
    pub text: String,
    /// Start, milliseconds relative to the transcribed buffer.
    pub t0_ms: u64,
    /// End, milliseconds relative to the transcribed buffer.
    pub t1_ms: u64,
    /// Engine confidence in this word, 0.0-1.0.
    pub probability: f32,
}

/// A transcribed segment with buffer-relative millisecond timings.
///
/// Segments returned from one engine call are in ascending time order and
/// non-overlapping, with `0 <= t0_ms < t1_ms <= buffer duration`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AsrSegment {
    pub text: String,
    pub t0_ms: u64,
    pub t1_ms: u64,
    /// Word-level breakdown; empty unless word timestamps were requested.
    pub words: Vec<AsrWord>,
}

impl AsrSegment {
    /// Shorthand for a plain segment without word detail.
    pub fn new(text: &str, t0_ms: u64, t1_ms: u64) -> Self {
        Self {
            text: text.to_string(),
            t0_ms,
            t1_ms,
            words: Vec::new(),
        }
    }
}

/// Trait for speech-to-text engines.
///
/// Implementations convert 16kHz mono int16 audio into segments. An empty
/// result on silence or failure-to-detect is normal, not an error.
pub trait AsrEngine: Send {
    /// Transcribe a buffer into segments.
    fn transcribe(&mut self, samples: &[i16]) -> Result<Vec<AsrSegment>>;

    /// Transcribe a buffer, populating each segment's word list.
    fn transcribe_with_words(&mut self, samples: &[i16]) -> Result<Vec<AsrSegment>>;

    /// Set the inference thread count (0 = engine default).
    fn set_threads(&mut self, n: usize);

    /// Set the transcription language code (model-dependent).
    fn set_language(&mut self, code: &str);

    /// Name of the loaded model.
    fn model_name(&self) -> &str;

    /// True when the engine can accept buffers.
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Default)]
struct MockState {
    script: Vec<Vec<AsrSegment>>,
    next: usize,
    call_lengths: Vec<usize>,
    fail_on_call: Option<usize>,
    latency: Option<std::time::Duration>,
}

/// Scripted ASR engine for tests.
///
/// Each `transcribe` call pops the next entry from the script; calls past
/// the end of the script return no segments (silence). The mock is a cheap
/// handle around shared state, so tests can keep a clone and inspect the
/// buffers the pipeline actually submitted.
#[derive(Debug, Clone)]
pub struct MockAsrEngine {
    state: Arc<Mutex<MockState>>,
    model_name: String,
}

impl MockAsrEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            model_name: "mock".to_string(),
        }
    }

    /// Script per-call responses, consumed in order.
    pub fn with_script(self, script: Vec<Vec<AsrSegment>>) -> Self {
        self.state.lock().unwrap().script = script;
        self
    }

    /// Fail (with [`SottoError::EngineFailure`]) on the given call index.
    pub fn with_failure_on_call(self, call: usize) -> Self {
        self.state.lock().unwrap().fail_on_call = Some(call);
        self
    }

    /// Sleep this long per call, simulating slow inference.
    pub fn with_latency_ms(self, latency_ms: u64) -> Self {
        self.state.lock().unwrap().latency =
            Some(std::time::Duration::from_millis(latency_ms));
        self
    }

    /// Sample counts of every buffer submitted so far.
    pub fn call_lengths(&self) -> Vec<usize> {
        self.state.lock().unwrap().call_lengths.clone()
    }

    /// Number of transcribe calls made so far.
    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().call_lengths.len()
    }
}

impl Default for MockAsrEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AsrEngine for MockAsrEngine {
    fn transcribe(&mut self, samples: &[i16]) -> Result<Vec<AsrSegment>> {
        let mut state = self.state.lock().unwrap();
        let call = state.call_lengths.len();
        state.call_lengths.push(samples.len());

        if let Some(latency) = state.latency {
            std::thread::sleep(latency);
        }

        if state.fail_on_call == Some(call) {
            return Err(SottoError::EngineFailure {
                message: format!("scripted failure on call {}", call),
            });
        }

        if state.next < state.script.len() {
            let segments = state.script[state.next].clone();
            state.next += 1;
            Ok(segments)
        } else {
            Ok(Vec::new())
        }
    }

    fn transcribe_with_words(&mut self, samples: &[i16]) -> Result<Vec<AsrSegment>> {
        self.transcribe(samples)
    }

    fn set_threads(&mut self, _n: usize) {}

    fn set_language(&mut self, _code: &str) {}

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        true
    }
}
