//! Sample-rate conversion to the 16kHz pipeline rate.
//!
//! Single-tap linear interpolation: cheap, streamable, and adequate for
//! speech models. It measurably degrades high-frequency content on some
//! source rates; callers that care about fidelity should pre-convert with a
//! polyphase resampler and feed 16kHz directly (the conversion is skipped
//! entirely when input already matches the target rate).

use crate::defaults;

/// Resample mono int16 audio from `from_rate` to `to_rate`.
///
/// Output length is `round(len * to_rate / from_rate)`; the first output
/// sample aligns with the first input sample. Values are clamped to the
/// int16 range. Returns the input unchanged when the rates match.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = (samples.len() as f64 * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let i0 = src_pos as usize;
        let i1 = (i0 + 1).min(samples.len() - 1);
        let frac = src_pos - i0 as f64;
        let i0 = i0.min(samples.len() - 1);
        let v = (1.0 - frac) * samples[i0] as f64 + frac * samples[i1] as f64;
        out.push(v.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
    }

    out
}

/// Resample mono int16 audio at an arbitrary rate to 16kHz.
pub fn resample_to_16k(samples: &[i16], from_rate: u32) -> Vec<i16> {
    resample(samples, from_rate, defaults::SAMPLE_RATE)
}
