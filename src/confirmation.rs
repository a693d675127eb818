/// Activation confirmation
///
/// A single classifier spike is not an activation. `ConfirmationTracker`
/// collects high-confidence detections and confirms only once enough of them
/// land inside a short window. After an activation a cooldown suppresses the
/// tail of the same utterance.

use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    /// Detections older than this are pruned (seconds)
    pub window_secs: f64,

    /// Detections needed inside the window to confirm
    pub required_count: usize,

    /// Activations suppressed for this long after one fires (seconds)
    pub cooldown_secs: f64,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            window_secs: 1.5,
            required_count: 2,
            cooldown_secs: 3.0,
        }
    }
}

impl ConfirmationConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.window_secs <= 0.0 {
            return Err(MonitorError::Config(
                "confirmation.window_secs must be positive".to_string(),
            ));
        }

        if self.required_count == 0 {
            return Err(MonitorError::Config(
                "confirmation.required_count must be at least 1".to_string(),
            ));
        }

        if self.cooldown_secs < 0.0 {
            return Err(MonitorError::Config(
                "confirmation.cooldown_secs must be non-negative".to_string(),
            ));
        }

        Ok(())
    }
}

/// One above-threshold classifier result
#[derive(Debug, Clone, Copy)]
pub struct Detection {
    pub timestamp: Instant,
    pub confidence: f32,
}

pub struct ConfirmationTracker {
    window: Duration,
    required_count: usize,
    cooldown: Duration,
    detections: VecDeque<Detection>,
    last_activation: Option<Instant>,
}

impl ConfirmationTracker {
    pub fn new(config: &ConfirmationConfig) -> Self {
        Self {
            window: Duration::from_secs_f64(config.window_secs),
            required_count: config.required_count,
            cooldown: Duration::from_secs_f64(config.cooldown_secs),
            detections: VecDeque::with_capacity(config.required_count + 1),
            last_activation: None,
        }
    }

    /// Record a detection at `now` and prune anything outside the window
    pub fn add_detection(&mut self, confidence: f32, now: Instant) {
        self.detections.push_back(Detection {
            timestamp: now,
            confidence,
        });
        self.prune(now);

        trace!(
            "Detection {:.3} recorded, {} in window",
            confidence,
            self.detections.len()
        );
    }

    /// Drop detections with `now - timestamp > window`
    pub fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.detections.front() {
            if now.saturating_duration_since(oldest.timestamp) > self.window {
                self.detections.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.detections.len() >= self.required_count
    }

    /// True while `now - last_activation < cooldown`
    pub fn is_in_cooldown(&self, now: Instant) -> bool {
        match self.last_activation {
            Some(at) => now.saturating_duration_since(at) < self.cooldown,
            None => false,
        }
    }

    /// Start the cooldown. Callers follow this with `clear()`.
    pub fn activate(&mut self, now: Instant) {
        debug!(
            "Activation confirmed with {} detections",
            self.detections.len()
        );
        self.last_activation = Some(now);
    }

    /// Forget pending detections; the cooldown is kept
    pub fn clear(&mut self) {
        self.detections.clear();
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Highest confidence among pending detections
    pub fn peak_confidence(&self) -> Option<f32> {
        self.detections.iter().map(|d| d.confidence).reduce(f32::max)
    }

    pub fn last_activation(&self) -> Option<Instant> {
        self.last_activation
    }
}
