/// Voice Activity Detection (VAD) module
///
/// Tracks the background noise floor with an exponential moving average of
/// chunk RMS and flags a chunk as speech when its energy clears the floor by
/// a fixed margin. Chunks below an absolute energy floor are reported as
/// near-silence so the detection loop can skip the classifier entirely.

use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Absolute RMS below which classification is skipped
pub const VAD_INITIAL_THRESHOLD_RMS: f32 = 0.01;

/// VAD configuration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Weight of the newest chunk in the noise-floor average
    pub noise_alpha: f32,

    /// Speech when `rms > noise_floor * threshold_multiplier`
    pub threshold_multiplier: f32,

    /// Noise floor before any audio has been seen
    pub initial_noise_floor: f32,

    /// Chunks quieter than this skip inference
    pub min_rms: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            noise_alpha: 0.05,
            threshold_multiplier: 1.5,
            initial_noise_floor: 0.01,
            min_rms: VAD_INITIAL_THRESHOLD_RMS,
        }
    }
}

impl VadConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !(self.noise_alpha > 0.0 && self.noise_alpha <= 1.0) {
            return Err(MonitorError::Config(
                "vad.noise_alpha must be in (0.0, 1.0]".to_string(),
            ));
        }

        if self.threshold_multiplier < 1.0 {
            return Err(MonitorError::Config(
                "vad.threshold_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.initial_noise_floor < 0.0 || self.min_rms < 0.0 {
            return Err(MonitorError::Config(
                "vad energy levels must be non-negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// Per-chunk speech decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Silence,
    Speech,
}

/// Adaptive energy-based voice activity detector
pub struct AdaptiveVad {
    config: VadConfig,
    noise_floor: f32,
    state: VadState,
}

impl AdaptiveVad {
    /// Create a new VAD with default configuration
    pub fn new() -> Self {
        Self::with_config(VadConfig::default())
    }

    /// Create a new VAD with custom configuration
    pub fn with_config(config: VadConfig) -> Self {
        debug!("Initializing VAD with config: {:?}", config);

        Self {
            noise_floor: config.initial_noise_floor,
            config,
            state: VadState::Silence,
        }
    }

    /// Fold one chunk's RMS into the noise floor and classify it
    ///
    /// Returns whether the chunk is speech.
    pub fn update(&mut self, rms: f32) -> bool {
        let alpha = self.config.noise_alpha;
        self.noise_floor = (1.0 - alpha) * self.noise_floor + alpha * rms;

        let is_speaking = rms > self.threshold();
        let next = if is_speaking {
            VadState::Speech
        } else {
            VadState::Silence
        };

        trace!(
            "VAD: rms={:.4}, noise_floor={:.4}, threshold={:.4}",
            rms,
            self.noise_floor,
            self.threshold()
        );

        if next != self.state {
            debug!("VAD: {:?} -> {:?}", self.state, next);
            self.state = next;
        }

        is_speaking
    }

    /// Whether a chunk is too quiet to be worth classifying
    pub fn is_near_silence(&self, rms: f32) -> bool {
        rms < self.config.min_rms
    }

    /// Current speech threshold
    pub fn threshold(&self) -> f32 {
        self.noise_floor * self.config.threshold_multiplier
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn is_speaking(&self) -> bool {
        self.state == VadState::Speech
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Reset VAD to initial state
    pub fn reset(&mut self) {
        self.noise_floor = self.config.initial_noise_floor;
        self.state = VadState::Silence;
        debug!("VAD reset to initial state");
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

impl Default for AdaptiveVad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_vad_config_default() {
        let config = VadConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold_multiplier, 1.5);
        assert_eq!(config.min_rms, VAD_INITIAL_THRESHOLD_RMS);
    }

    #[test]
    fn test_vad_config_validation() {
        let mut config = VadConfig::default();
        config.noise_alpha = 0.0;
        assert!(config.validate().is_err());

        config.noise_alpha = 0.05;
        config.threshold_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_noise_floor_ema() {
        let mut vad = AdaptiveVad::new();
        vad.update(0.11);

        // 0.95 * 0.01 + 0.05 * 0.11
        assert_relative_eq!(vad.noise_floor(), 0.015, epsilon = 1e-6);
        assert_relative_eq!(vad.threshold(), 0.0225, epsilon = 1e-6);
    }

    #[test]
    fn test_speech_detection() {
        let mut vad = AdaptiveVad::new();

        assert!(vad.update(0.2));
        assert!(vad.is_speaking());
        assert_eq!(vad.state(), VadState::Speech);

        assert!(!vad.update(0.001));
        assert_eq!(vad.state(), VadState::Silence);
    }

    #[test]
    fn test_floor_adapts_to_steady_noise() {
        let mut vad = AdaptiveVad::new();

        // Steady hum eventually stops counting as speech
        for _ in 0..200 {
            vad.update(0.05);
        }

        assert_relative_eq!(vad.noise_floor(), 0.05, epsilon = 1e-3);
        assert!(!vad.update(0.05));
        assert!(vad.update(0.2));
    }

    #[test]
    fn test_near_silence_floor() {
        let vad = AdaptiveVad::new();
        assert!(vad.is_near_silence(0.0));
        assert!(vad.is_near_silence(0.009));
        assert!(!vad.is_near_silence(0.01));
        assert!(!vad.is_near_silence(0.3));
    }

    #[test]
    fn test_reset() {
        let mut vad = AdaptiveVad::new();
        for _ in 0..20 {
            vad.update(0.4);
        }
        assert!(vad.noise_floor() > 0.1);

        vad.reset();
        assert_eq!(vad.noise_floor(), 0.01);
        assert!(!vad.is_speaking());
    }
}
