/// Audio buffer module for rolling audio data
///
/// Two fixed-capacity rings over the stride stream:
/// - `SlidingWindowBuffer`: the 1-second window handed to the classifier.
///   It starts zero-filled so a window is available from the first stride;
///   the first few windows therefore contain synthetic silence.
/// - `PreRollBuffer`: the last few seconds of audio, kept regardless of mode
///   and snapshotted at activation so the command recording includes the
///   wake word and whatever preceded it.
///
/// Each stride shifts the oldest `stride` samples out and appends the new
/// ones at the tail; the occupied length never changes once full.

use crate::chunk::{AudioSample, SAMPLE_RATE};
use ringbuf::traits::{Consumer, Observer, Producer, RingBuffer};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::debug;

/// Classifier window: 1 second at 16kHz
pub const WINDOW_DURATION_SECS: f32 = 1.0;
pub const WINDOW_SIZE: usize = SAMPLE_RATE; // 16,000 samples

/// Pre-roll kept ahead of every command recording
pub const PREROLL_DURATION_SECS: f32 = 2.0;
pub const PREROLL_SIZE: usize = 2 * SAMPLE_RATE; // 32,000 samples

#[derive(Error, Debug)]
pub enum AudioBufferError {
    #[error("Invalid buffer size: {0}")]
    InvalidSize(usize),
}

type SampleRing = HeapRb<AudioSample>;

fn check_capacity(capacity: usize) -> Result<(), AudioBufferError> {
    if capacity == 0 {
        return Err(AudioBufferError::InvalidSize(capacity));
    }
    Ok(())
}

/// Convert a duration in seconds to a sample count at the capture rate
pub fn samples_for_secs(secs: f32) -> usize {
    (secs * SAMPLE_RATE as f32).round() as usize
}

/// Fixed-length rolling window feeding the classifier
pub struct SlidingWindowBuffer {
    ring: SampleRing,
}

impl SlidingWindowBuffer {
    /// Create the default 1-second window
    pub fn new() -> Self {
        Self::zero_filled(WINDOW_SIZE)
    }

    /// Create a window of `capacity` samples, zero-filled
    pub fn with_capacity(capacity: usize) -> Result<Self, AudioBufferError> {
        check_capacity(capacity)?;
        Ok(Self::zero_filled(capacity))
    }

    fn zero_filled(capacity: usize) -> Self {
        debug!("Creating sliding window with capacity: {} samples", capacity);

        let mut ring = SampleRing::new(capacity);
        ring.push_iter(std::iter::repeat(0.0).take(capacity));

        Self { ring }
    }

    /// Shift in one stride of samples, discarding the oldest
    pub fn add_samples(&mut self, samples: &[AudioSample]) {
        self.ring.push_slice_overwrite(samples);
    }

    /// Current window contents, oldest first
    pub fn samples(&self) -> Vec<AudioSample> {
        self.ring.iter().copied().collect()
    }

    /// Always equal to the capacity
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Zero-fill again, as after construction
    pub fn reset(&mut self) {
        let capacity = self.capacity();
        self.ring.clear();
        self.ring.push_iter(std::iter::repeat(0.0).take(capacity));
        debug!("Sliding window reset");
    }
}

impl Default for SlidingWindowBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Always-on circular buffer of recent audio
pub struct PreRollBuffer {
    ring: SampleRing,
}

impl PreRollBuffer {
    /// Create the default 2-second pre-roll
    pub fn new() -> Self {
        Self::empty(PREROLL_SIZE)
    }

    /// Create a pre-roll holding at most `capacity` samples
    pub fn with_capacity(capacity: usize) -> Result<Self, AudioBufferError> {
        check_capacity(capacity)?;
        Ok(Self::empty(capacity))
    }

    fn empty(capacity: usize) -> Self {
        debug!("Creating pre-roll buffer with capacity: {} samples", capacity);
        Self {
            ring: SampleRing::new(capacity),
        }
    }

    /// Append samples, overwriting the oldest once full
    pub fn add_samples(&mut self, samples: &[AudioSample]) {
        self.ring.push_slice_overwrite(samples);
    }

    /// Copy of the current contents in chronological order
    pub fn snapshot(&self) -> Vec<AudioSample> {
        self.ring.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    /// Duration of audio currently held (in seconds)
    pub fn duration_secs(&self) -> f32 {
        self.len() as f32 / SAMPLE_RATE as f32
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        debug!("Cleared pre-roll buffer");
    }
}

impl Default for PreRollBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::STRIDE_SAMPLES;
    use approx::assert_relative_eq;

    fn stride(value: f32) -> Vec<f32> {
        vec![value; STRIDE_SAMPLES]
    }

    #[test]
    fn test_window_starts_zero_filled() {
        let window = SlidingWindowBuffer::new();
        assert_eq!(window.len(), WINDOW_SIZE);
        assert_eq!(window.capacity(), WINDOW_SIZE);
        assert!(window.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_window_length_constant_and_tail_is_latest_stride() {
        let mut window = SlidingWindowBuffer::new();

        for i in 0..10 {
            let latest: Vec<f32> = (0..STRIDE_SAMPLES)
                .map(|j| (i * STRIDE_SAMPLES + j) as f32 * 1e-6)
                .collect();
            window.add_samples(&latest);

            let contents = window.samples();
            assert_eq!(contents.len(), WINDOW_SIZE);
            assert_eq!(&contents[WINDOW_SIZE - STRIDE_SAMPLES..], latest.as_slice());
        }
    }

    #[test]
    fn test_window_keeps_overlap() {
        let mut window = SlidingWindowBuffer::new();
        window.add_samples(&stride(0.1));
        window.add_samples(&stride(0.2));

        let contents = window.samples();
        // 75% of the window is retained between strides
        assert!(contents[..2 * STRIDE_SAMPLES].iter().all(|&s| s == 0.0));
        assert!(contents[2 * STRIDE_SAMPLES..3 * STRIDE_SAMPLES].iter().all(|&s| s == 0.1));
        assert!(contents[3 * STRIDE_SAMPLES..].iter().all(|&s| s == 0.2));
    }

    #[test]
    fn test_window_oversized_write() {
        let mut window = SlidingWindowBuffer::with_capacity(10).unwrap();
        let samples: Vec<f32> = (0..25).map(|i| i as f32).collect();
        window.add_samples(&samples);

        assert_eq!(window.len(), 10);
        assert_eq!(window.samples(), samples[15..].to_vec());
    }

    #[test]
    fn test_window_reset() {
        let mut window = SlidingWindowBuffer::with_capacity(8).unwrap();
        window.add_samples(&[1.0; 8]);
        window.reset();

        assert_eq!(window.samples(), vec![0.0; 8]);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            SlidingWindowBuffer::with_capacity(0),
            Err(AudioBufferError::InvalidSize(0))
        ));
        assert!(PreRollBuffer::with_capacity(0).is_err());
    }

    #[test]
    fn test_preroll_starts_empty() {
        let preroll = PreRollBuffer::new();
        assert!(preroll.is_empty());
        assert!(preroll.snapshot().is_empty());
        assert_eq!(preroll.capacity(), PREROLL_SIZE);
    }

    #[test]
    fn test_preroll_snapshot_is_chronological() {
        let mut preroll = PreRollBuffer::with_capacity(6).unwrap();
        preroll.add_samples(&[1.0, 2.0, 3.0, 4.0]);
        preroll.add_samples(&[5.0, 6.0, 7.0, 8.0]);

        assert_eq!(preroll.snapshot(), vec![3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_preroll_snapshot_is_a_copy() {
        let mut preroll = PreRollBuffer::with_capacity(4).unwrap();
        preroll.add_samples(&[1.0, 2.0]);

        let snapshot = preroll.snapshot();
        preroll.add_samples(&[3.0, 4.0, 5.0]);

        assert_eq!(snapshot, vec![1.0, 2.0]);
        assert_eq!(preroll.snapshot(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_preroll_duration() {
        let mut preroll = PreRollBuffer::new();
        for _ in 0..4 {
            preroll.add_samples(&stride(0.0));
        }
        assert_relative_eq!(preroll.duration_secs(), 1.0, epsilon = 0.01);

        for _ in 0..20 {
            preroll.add_samples(&stride(0.0));
        }
        assert_relative_eq!(preroll.duration_secs(), PREROLL_DURATION_SECS, epsilon = 0.01);
    }

    #[test]
    fn test_samples_for_secs() {
        assert_eq!(samples_for_secs(WINDOW_DURATION_SECS), WINDOW_SIZE);
        assert_eq!(samples_for_secs(0.25), STRIDE_SAMPLES);
    }
}
