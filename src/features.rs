/// MFCC feature extraction
///
/// Reduces the 1-second classifier window to a fixed 40 x 40 matrix of
/// mel-frequency cepstral coefficients: Hann-windowed FFT frames, a
/// triangular mel filterbank (HTK mel scale), log energies and an
/// orthonormal DCT-II. One second at hop 400 yields 39 frames; trailing
/// frames are zero-padded up to the fixed frame count.

use crate::chunk::{AudioSample, SAMPLE_RATE};
use crate::error::MonitorError;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Floor applied before taking the log of mel energies
const LOG_FLOOR: f32 = 1e-10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MfccConfig {
    pub n_mfcc: usize,
    pub n_mels: usize,
    pub n_fft: usize,
    pub hop_length: usize,
    /// Output frame count; shorter inputs are zero-padded, longer truncated
    pub n_frames: usize,
    pub fmin: f32,
    pub fmax: f32,
}

impl Default for MfccConfig {
    fn default() -> Self {
        Self {
            n_mfcc: 40,
            n_mels: 40,
            n_fft: 512,
            hop_length: 400,
            n_frames: 40,
            fmin: 0.0,
            fmax: SAMPLE_RATE as f32 / 2.0,
        }
    }
}

impl MfccConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return Err(MonitorError::Config(
                "mfcc.n_mfcc must be between 1 and n_mels".to_string(),
            ));
        }

        if self.n_fft == 0 || self.hop_length == 0 || self.n_frames == 0 {
            return Err(MonitorError::Config(
                "mfcc.n_fft, hop_length and n_frames must be positive".to_string(),
            ));
        }

        if !(self.fmin >= 0.0 && self.fmin < self.fmax && self.fmax <= SAMPLE_RATE as f32 / 2.0) {
            return Err(MonitorError::Config(format!(
                "mfcc frequency range {}..{} Hz is invalid",
                self.fmin, self.fmax
            )));
        }

        Ok(())
    }
}

/// Fixed-shape feature tensor, row-major by coefficient
#[derive(Debug, Clone, PartialEq)]
pub struct Features {
    data: Vec<f32>,
    n_coeffs: usize,
    n_frames: usize,
    valid_frames: usize,
}

impl Features {
    /// (coefficients, frames)
    pub fn shape(&self) -> (usize, usize) {
        (self.n_coeffs, self.n_frames)
    }

    pub fn get(&self, coeff: usize, frame: usize) -> f32 {
        self.data[coeff * self.n_frames + frame]
    }

    /// All values of one coefficient across frames
    pub fn coefficient(&self, coeff: usize) -> &[f32] {
        let start = coeff * self.n_frames;
        &self.data[start..start + self.n_frames]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Frames computed from audio, the rest being padding
    pub fn valid_frames(&self) -> usize {
        self.valid_frames
    }

    /// Mean of one coefficient over the non-padded frames
    pub fn coefficient_mean(&self, coeff: usize) -> f32 {
        if self.valid_frames == 0 {
            return 0.0;
        }
        let row = &self.coefficient(coeff)[..self.valid_frames];
        row.iter().sum::<f32>() / self.valid_frames as f32
    }
}

pub fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

pub fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// `n_mels` triangular filters over the `n_fft / 2 + 1` spectrum bins
fn mel_filterbank(config: &MfccConfig) -> Vec<Vec<f32>> {
    let n_bins = config.n_fft / 2 + 1;
    let bin_hz = SAMPLE_RATE as f32 / config.n_fft as f32;

    let mel_min = hz_to_mel(config.fmin);
    let mel_max = hz_to_mel(config.fmax);
    let edges: Vec<f32> = (0..config.n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (config.n_mels + 1) as f32))
        .collect();

    (0..config.n_mels)
        .map(|m| {
            let (lower, center, upper) = (edges[m], edges[m + 1], edges[m + 2]);
            (0..n_bins)
                .map(|k| {
                    let f = k as f32 * bin_hz;
                    let rising = (f - lower) / (center - lower);
                    let falling = (upper - f) / (upper - center);
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// Orthonormal DCT-II basis, `n_out` rows of length `n_in`
fn dct_matrix(n_out: usize, n_in: usize) -> Vec<Vec<f32>> {
    let n = n_in as f32;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|i| {
                    scale
                        * (std::f32::consts::PI * k as f32 * (2 * i + 1) as f32 / (2.0 * n)).cos()
                })
                .collect()
        })
        .collect()
}

pub struct MfccExtractor {
    config: MfccConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filterbank: Vec<Vec<f32>>,
    dct: Vec<Vec<f32>>,
}

impl MfccExtractor {
    pub fn new(config: MfccConfig) -> Result<Self, MonitorError> {
        config.validate()?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        let n = config.n_fft;
        let window = (0..n)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos()))
            .collect();

        debug!(
            "MFCC extractor: {} coeffs x {} frames (fft {}, hop {})",
            config.n_mfcc, config.n_frames, config.n_fft, config.hop_length
        );

        Ok(Self {
            filterbank: mel_filterbank(&config),
            dct: dct_matrix(config.n_mfcc, config.n_mels),
            config,
            fft,
            window,
        })
    }

    /// Frames that fit in `len` samples without centering
    pub fn frame_count(&self, len: usize) -> usize {
        if len < self.config.n_fft {
            0
        } else {
            1 + (len - self.config.n_fft) / self.config.hop_length
        }
    }

    pub fn extract(&self, samples: &[AudioSample]) -> Result<Features, MonitorError> {
        let available = self.frame_count(samples.len());
        if available == 0 {
            return Err(MonitorError::Inference(format!(
                "window of {} samples is shorter than one {}-sample frame",
                samples.len(),
                self.config.n_fft
            )));
        }

        let n_coeffs = self.config.n_mfcc;
        let n_frames = self.config.n_frames;
        let valid_frames = available.min(n_frames);
        let n_bins = self.config.n_fft / 2 + 1;

        let mut data = vec![0.0; n_coeffs * n_frames];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.config.n_fft];
        let mut log_mel = vec![0.0f32; self.config.n_mels];

        for frame in 0..valid_frames {
            let start = frame * self.config.hop_length;
            let segment = &samples[start..start + self.config.n_fft];

            for ((slot, &s), &w) in buffer.iter_mut().zip(segment).zip(&self.window) {
                *slot = Complex::new(s * w, 0.0);
            }
            self.fft.process(&mut buffer);

            let power: Vec<f32> = buffer[..n_bins].iter().map(|c| c.norm_sqr()).collect();

            for (energy, filter) in log_mel.iter_mut().zip(&self.filterbank) {
                let e: f32 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                *energy = e.max(LOG_FLOOR).ln();
            }

            for (k, basis) in self.dct.iter().enumerate() {
                data[k * n_frames + frame] = basis.iter().zip(&log_mel).map(|(b, x)| b * x).sum();
            }
        }

        Ok(Features {
            data,
            n_coeffs,
            n_frames,
            valid_frames,
        })
    }

    pub fn config(&self) -> &MfccConfig {
        &self.config
    }
}
