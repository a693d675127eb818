/// Keyword-spotting classifier boundary
///
/// The monitor treats the classifier as a black box from a feature matrix
/// to a probability. Model formats and runtimes live behind this trait.

use crate::error::MonitorError;
use crate::features::Features;
use serde::{Deserialize, Serialize};

/// Wake-word classifier
#[cfg_attr(test, mockall::automock)]
pub trait Classifier: Send {
    /// Probability in [0, 1] that the window contains the wake word
    fn predict(&mut self, features: &Features) -> Result<f32, MonitorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyClassifierConfig {
    /// Mean c0 at which the probability is 0.5
    pub midpoint: f32,
    /// Logistic slope
    pub steepness: f32,
}

impl Default for EnergyClassifierConfig {
    fn default() -> Self {
        Self {
            midpoint: -20.0,
            steepness: 0.25,
        }
    }
}

/// Heuristic stand-in for a trained model
///
/// Scores a window by its mean 0th cepstral coefficient (overall log
/// energy) through a logistic curve. It fires on any loud sound, so it is
/// only useful for exercising the pipeline end to end.
#[derive(Debug, Clone, Default)]
pub struct EnergyClassifier {
    config: EnergyClassifierConfig,
}

impl EnergyClassifier {
    pub fn new(config: EnergyClassifierConfig) -> Self {
        Self { config }
    }
}

impl Classifier for EnergyClassifier {
    fn predict(&mut self, features: &Features) -> Result<f32, MonitorError> {
        let c0 = features.coefficient_mean(0);
        if !c0.is_finite() {
            return Err(MonitorError::Inference(format!("non-finite c0: {c0}")));
        }

        let z = self.config.steepness * (c0 - self.config.midpoint);
        Ok(1.0 / (1.0 + (-z).exp()))
    }
}
