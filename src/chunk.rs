/// Audio chunk module
///
/// One stride of mono audio as delivered by the capture producer.

use std::time::Instant;

/// Capture sample rate (mono, normalized f32)
pub const SAMPLE_RATE: usize = 16000;

/// Time advance between successive analysis windows
pub const STRIDE_MS: usize = 250;

/// Samples per stride: 250ms at 16kHz
pub const STRIDE_SAMPLES: usize = SAMPLE_RATE * STRIDE_MS / 1000; // 4,000 samples

/// Audio sample format (f32 normalized to -1.0 to 1.0)
pub type AudioSample = f32;

/// One stride of captured audio
///
/// Built once per stride by the producer, moved through the chunk channel
/// and dropped after a single detection-loop iteration.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    samples: Vec<AudioSample>,
    timestamp: Instant,
    rms: f32,
}

impl AudioChunk {
    /// Wrap captured samples, computing their RMS energy
    pub fn new(samples: Vec<AudioSample>, timestamp: Instant) -> Self {
        let rms = compute_rms(&samples);
        Self {
            samples,
            timestamp,
            rms,
        }
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    /// Capture time of the chunk (monotonic)
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Root-mean-square energy of the chunk
    pub fn rms(&self) -> f32 {
        self.rms
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the chunk in seconds at the capture rate
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }

    pub fn into_samples(self) -> Vec<AudioSample> {
        self.samples
    }
}

/// `sqrt(mean(sample^2))`, zero for an empty slice
pub fn compute_rms(samples: &[AudioSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stride_size() {
        assert_eq!(STRIDE_SAMPLES, 4000);
    }

    #[test]
    fn test_rms_of_constant_magnitude() {
        let samples: Vec<f32> = (0..STRIDE_SAMPLES)
            .map(|i| if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();

        let chunk = AudioChunk::new(samples, Instant::now());
        assert_relative_eq!(chunk.rms(), 0.1, epsilon = 1e-6);
        assert_relative_eq!(chunk.duration_secs(), 0.25);
    }

    #[test]
    fn test_rms_of_silence_and_empty() {
        assert_eq!(compute_rms(&[0.0; 100]), 0.0);
        assert_eq!(compute_rms(&[]), 0.0);
    }

    #[test]
    fn test_rms_of_sine() {
        let sine: Vec<f32> = (0..SAMPLE_RATE)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
            })
            .collect();

        // Peak / sqrt(2)
        assert_relative_eq!(compute_rms(&sine), 0.5 / 2f32.sqrt(), epsilon = 1e-3);
    }
}
