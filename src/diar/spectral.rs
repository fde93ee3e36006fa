//! Built-in log-mel spectral embedder.
//!
//! A model-free speaker representation: average log-mel band energies over
//! the window, mean/variance normalized, then scaled to unit length. Far
//! weaker than a neural speaker model, but workable for two well-separated
//! voices and enough to run the full pipeline with zero model files.

use crate::defaults;
use crate::diar::embedder::{l2_normalize, SpeakerEmbedder};
use crate::error::Result;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Analysis FFT size (32ms at 16kHz).
const FFT_SIZE: usize = 512;
/// Analysis hop (10ms at 16kHz).
const HOP_SIZE: usize = 160;
/// Number of mel bands = embedding dimension.
const N_MELS: usize = 40;
/// Lower edge of the mel filterbank in Hz.
const F_MIN: f64 = 80.0;

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filterbank over the one-sided spectrum.
fn build_mel_filters(sample_rate: u32) -> Vec<Vec<f32>> {
    let n_bins = FFT_SIZE / 2 + 1;
    let f_max = sample_rate as f64 / 2.0;
    let mel_min = hz_to_mel(F_MIN);
    let mel_max = hz_to_mel(f_max);

    let mut mel_points = Vec::with_capacity(N_MELS + 2);
    for i in 0..N_MELS + 2 {
        let mel = mel_min + (mel_max - mel_min) * i as f64 / (N_MELS + 1) as f64;
        mel_points.push(mel_to_hz(mel));
    }

    let mut filters = vec![vec![0.0f32; n_bins]; N_MELS];
    for m in 0..N_MELS {
        let (f_left, f_center, f_right) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
        for k in 0..n_bins {
            let freq = k as f64 * sample_rate as f64 / FFT_SIZE as f64;
            if freq >= f_left && freq <= f_center {
                filters[m][k] = ((freq - f_left) / (f_center - f_left)) as f32;
            } else if freq > f_center && freq <= f_right {
                filters[m][k] = ((f_right - freq) / (f_right - f_center)) as f32;
            }
        }
    }
    filters
}

/// Log-mel averaging embedder.
pub struct SpectralEmbedder {
    fft: Arc<dyn Fft<f32>>,
    hann: Vec<f32>,
    mel_filters: Vec<Vec<f32>>,
}

impl SpectralEmbedder {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);
        let hann = (0..FFT_SIZE)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / (FFT_SIZE - 1) as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();
        Self {
            fft,
            hann,
            mel_filters: build_mel_filters(defaults::SAMPLE_RATE),
        }
    }
}

impl Default for SpectralEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeakerEmbedder for SpectralEmbedder {
    fn embed(&mut self, samples: &[i16]) -> Result<Vec<f32>> {
        let mut mel_energy = vec![0.0f64; N_MELS];
        let mut frame_count = 0usize;
        let mut scratch = vec![Complex32::default(); FFT_SIZE];

        let mut pos = 0;
        while pos + FFT_SIZE <= samples.len() {
            for i in 0..FFT_SIZE {
                scratch[i] = Complex32::new(
                    samples[pos + i] as f32 / 32768.0 * self.hann[i],
                    0.0,
                );
            }
            self.fft.process(&mut scratch);

            let n_bins = FFT_SIZE / 2 + 1;
            for (m, filter) in self.mel_filters.iter().enumerate() {
                let mut energy = 0.0f64;
                for k in 0..n_bins {
                    energy += scratch[k].norm_sqr() as f64 * filter[k] as f64;
                }
                mel_energy[m] += energy;
            }
            frame_count += 1;
            pos += HOP_SIZE;
        }

        // Too little audio for even one analysis frame: zero-pad one frame.
        if frame_count == 0 {
            for i in 0..FFT_SIZE {
                let s = samples.get(i).copied().unwrap_or(0);
                scratch[i] = Complex32::new(s as f32 / 32768.0 * self.hann[i], 0.0);
            }
            self.fft.process(&mut scratch);
            let n_bins = FFT_SIZE / 2 + 1;
            for (m, filter) in self.mel_filters.iter().enumerate() {
                let mut energy = 0.0f64;
                for k in 0..n_bins {
                    energy += scratch[k].norm_sqr() as f64 * filter[k] as f64;
                }
                mel_energy[m] += energy;
            }
            frame_count = 1;
        }

        // Average over frames, log-compress
        let mut mel: Vec<f32> = mel_energy
            .iter()
            .map(|&e| ((e / frame_count as f64) + 1e-10).ln() as f32)
            .collect();

        // Mean/variance normalization
        let mean: f32 = mel.iter().sum::<f32>() / mel.len() as f32;
        let var: f32 = mel.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / mel.len() as f32;
        let std = (var + 1e-8).sqrt();
        for v in mel.iter_mut() {
            *v = (*v - mean) / std;
        }

        l2_normalize(&mut mel);
        Ok(mel)
    }

    fn embedding_dim(&self) -> usize {
        N_MELS
    }
}
