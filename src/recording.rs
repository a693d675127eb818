/// Command recording
///
/// Owns the recording that follows an activation. The session starts with
/// the pre-roll snapshot, accumulates every chunk that arrives while
/// recording, and ends on sustained silence or at the safety limit.
///
/// Durations are measured on the sample clock: the recorded length is the
/// number of samples appended since activation divided by the sample rate,
/// so termination does not depend on scheduling jitter.

use crate::chunk::{AudioChunk, AudioSample, SAMPLE_RATE};
use crate::error::MonitorError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Contiguous silence that ends a recording (seconds)
    pub silence_secs: f64,

    /// Silence cannot end a recording shorter than this (seconds)
    pub min_secs: f64,

    /// Safety limit on recording length (seconds)
    pub max_secs: f64,

    /// Silence when `rms < noise_floor * silence_multiplier`
    pub silence_multiplier: f32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            silence_secs: 1.5,
            min_secs: 0.5,
            max_secs: 10.0,
            silence_multiplier: 2.0,
        }
    }
}

impl RecordingConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.silence_secs <= 0.0 || self.min_secs < 0.0 {
            return Err(MonitorError::Config(
                "recording.silence_secs must be positive and min_secs non-negative".to_string(),
            ));
        }

        if self.max_secs < self.min_secs {
            return Err(MonitorError::Config(format!(
                "recording.max_secs ({}) must be >= min_secs ({})",
                self.max_secs, self.min_secs
            )));
        }

        if self.silence_multiplier <= 0.0 {
            return Err(MonitorError::Config(
                "recording.silence_multiplier must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn secs_to_samples(secs: f64) -> usize {
    (secs * SAMPLE_RATE as f64).round() as usize
}

/// Why a recording ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The speaker stopped talking
    Silence,
    /// The safety limit was reached
    MaxDuration,
    /// The monitor was stopped mid-recording
    Shutdown,
}

/// In-progress recording; exists only while the mode is RECORDING
#[derive(Debug)]
pub struct RecordingSession {
    /// First element is the pre-roll snapshot
    chunks: Vec<Vec<AudioSample>>,
    captured_at: DateTime<Local>,
    recorded_samples: usize,
    silence_samples: usize,
}

impl RecordingSession {
    fn new(preroll: Vec<AudioSample>, captured_at: DateTime<Local>) -> Self {
        Self {
            chunks: vec![preroll],
            captured_at,
            recorded_samples: 0,
            silence_samples: 0,
        }
    }

    /// Seconds recorded since activation, excluding pre-roll
    pub fn recorded_secs(&self) -> f64 {
        self.recorded_samples as f64 / SAMPLE_RATE as f64
    }

    /// Length of the current run of silent chunks
    pub fn silence_secs(&self) -> f64 {
        self.silence_samples as f64 / SAMPLE_RATE as f64
    }

    pub fn total_samples(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}

/// A finished recording ready to be written and dispatched
#[derive(Debug, Clone)]
pub struct FinishedRecording {
    pub samples: Vec<AudioSample>,
    /// Pre-roll plus recorded audio, in seconds
    pub duration_secs: f64,
    pub captured_at: DateTime<Local>,
    pub reason: TerminationReason,
}

pub struct RecordingController {
    config: RecordingConfig,
    silence_limit: usize,
    min_samples: usize,
    max_samples: usize,
    session: Option<RecordingSession>,
}

impl RecordingController {
    pub fn new(config: RecordingConfig) -> Self {
        Self {
            silence_limit: secs_to_samples(config.silence_secs),
            min_samples: secs_to_samples(config.min_secs),
            max_samples: secs_to_samples(config.max_secs),
            config,
            session: None,
        }
    }

    /// Open a session seeded with the pre-roll snapshot
    ///
    /// Any session still open is discarded.
    pub fn start(&mut self, preroll: Vec<AudioSample>, captured_at: DateTime<Local>) {
        if self.session.is_some() {
            debug!("Discarding unfinished recording session");
        }

        info!(
            "Recording started with {:.2}s pre-roll",
            preroll.len() as f64 / SAMPLE_RATE as f64
        );
        self.session = Some(RecordingSession::new(preroll, captured_at));
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Append a chunk and evaluate termination
    ///
    /// Returns the termination reason once the recording should end. The
    /// session stays open until `finish` is called.
    pub fn push(&mut self, chunk: &AudioChunk, noise_floor: f32) -> Option<TerminationReason> {
        let silence_threshold = noise_floor * self.config.silence_multiplier;
        let session = self.session.as_mut()?;

        session.chunks.push(chunk.samples().to_vec());
        session.recorded_samples += chunk.len();

        if chunk.rms() < silence_threshold {
            session.silence_samples += chunk.len();
        } else {
            session.silence_samples = 0;
        }

        if session.recorded_samples >= self.max_samples {
            debug!("Recording hit max duration ({:.2}s)", session.recorded_secs());
            return Some(TerminationReason::MaxDuration);
        }

        if session.silence_samples >= self.silence_limit
            && session.recorded_samples >= self.min_samples
        {
            debug!(
                "Recording ended by {:.2}s of silence after {:.2}s",
                session.silence_secs(),
                session.recorded_secs()
            );
            return Some(TerminationReason::Silence);
        }

        None
    }

    /// Whether the open session is long enough to keep on shutdown
    pub fn meets_minimum(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.recorded_samples >= self.min_samples)
    }

    /// Close the session and concatenate its audio
    pub fn finish(&mut self, reason: TerminationReason) -> Option<FinishedRecording> {
        let session = self.session.take()?;
        let total = session.total_samples();

        let mut samples = Vec::with_capacity(total);
        for chunk in session.chunks {
            samples.extend_from_slice(&chunk);
        }

        let duration_secs = total as f64 / SAMPLE_RATE as f64;
        info!("Recording finished ({:?}): {:.2}s", reason, duration_secs);

        Some(FinishedRecording {
            samples,
            duration_secs,
            captured_at: session.captured_at,
            reason,
        })
    }

    /// Drop the open session without producing a recording
    pub fn discard(&mut self) {
        if self.session.take().is_some() {
            debug!("Recording session discarded");
        }
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::STRIDE_SAMPLES;
    use approx::assert_relative_eq;
    use std::time::{Duration, Instant};

    fn chunk(level: f32, at: Instant) -> AudioChunk {
        let samples = (0..STRIDE_SAMPLES)
            .map(|i| if i % 2 == 0 { level } else { -level })
            .collect();
        AudioChunk::new(samples, at)
    }

    fn stride_time(t0: Instant, n: u32) -> Instant {
        t0 + Duration::from_millis(250 * n as u64)
    }

    fn started(preroll: usize) -> (RecordingController, Instant) {
        let mut controller = RecordingController::new(RecordingConfig::default());
        let t0 = Instant::now();
        controller.start(vec![0.0; preroll], Local::now());
        (controller, t0)
    }

    #[test]
    fn test_config_validation() {
        assert!(RecordingConfig::default().validate().is_ok());

        let config = RecordingConfig {
            max_secs: 0.2,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_terminates_after_speech_then_silence() {
        let (mut controller, t0) = started(0);
        let noise_floor = 0.01;
        let mut n = 0;

        // 2s of speech
        for _ in 0..8 {
            n += 1;
            assert_eq!(controller.push(&chunk(0.1, stride_time(t0, n)), noise_floor), None);
        }

        // 1.6s of silence: the sixth silent stride completes 1.5s
        let mut ended_at = None;
        for _ in 0..7 {
            n += 1;
            if let Some(reason) = controller.push(&chunk(0.005, stride_time(t0, n)), noise_floor) {
                assert_eq!(reason, TerminationReason::Silence);
                ended_at = Some(controller.session().map(|s| s.recorded_secs()));
                break;
            }
        }

        assert_eq!(ended_at, Some(Some(3.5)));
        let finished = controller.finish(TerminationReason::Silence).unwrap();
        assert_relative_eq!(finished.duration_secs, 3.5);
        assert!(!controller.is_active());
    }

    #[test]
    fn test_speech_resets_silence() {
        let (mut controller, t0) = started(0);

        for n in 0..4 {
            controller.push(&chunk(0.005, stride_time(t0, n)), 0.01);
        }
        assert_relative_eq!(controller.session().unwrap().silence_secs(), 1.0);

        controller.push(&chunk(0.2, stride_time(t0, 4)), 0.01);
        let session = controller.session().unwrap();
        assert_eq!(session.silence_secs(), 0.0);
    }

    #[test]
    fn test_silence_before_minimum_keeps_recording() {
        let mut controller = RecordingController::new(RecordingConfig {
            silence_secs: 0.25,
            min_secs: 1.0,
            ..Default::default()
        });
        let t0 = Instant::now();
        controller.start(Vec::new(), Local::now());

        for n in 0..3 {
            assert_eq!(controller.push(&chunk(0.0, stride_time(t0, n)), 0.01), None);
        }
        assert_eq!(
            controller.push(&chunk(0.0, stride_time(t0, 3)), 0.01),
            Some(TerminationReason::Silence)
        );
    }

    #[test]
    fn test_max_duration_boundary() {
        let (mut controller, t0) = started(0);

        for n in 0..39 {
            assert_eq!(controller.push(&chunk(0.3, stride_time(t0, n)), 0.01), None);
        }

        assert_eq!(
            controller.push(&chunk(0.3, stride_time(t0, 39)), 0.01),
            Some(TerminationReason::MaxDuration)
        );
        assert_eq!(controller.session().unwrap().recorded_secs(), 10.0);
    }

    #[test]
    fn test_finish_prepends_preroll() {
        let (mut controller, t0) = started(2 * SAMPLE_RATE);
        controller.push(&chunk(0.3, t0), 0.01);

        let finished = controller.finish(TerminationReason::Shutdown).unwrap();
        assert_eq!(finished.samples.len(), 2 * SAMPLE_RATE + STRIDE_SAMPLES);
        assert_eq!(finished.samples[0], 0.0);
        assert_eq!(finished.samples[2 * SAMPLE_RATE], 0.3);
        assert_relative_eq!(finished.duration_secs, 2.25);
        assert_eq!(finished.reason, TerminationReason::Shutdown);
    }

    #[test]
    fn test_minimum_and_discard() {
        let (mut controller, t0) = started(0);
        controller.push(&chunk(0.3, t0), 0.01);
        assert!(!controller.meets_minimum());

        controller.push(&chunk(0.3, stride_time(t0, 1)), 0.01);
        assert!(controller.meets_minimum());

        controller.discard();
        assert!(!controller.is_active());
        assert!(controller.finish(TerminationReason::Shutdown).is_none());
    }

    #[test]
    fn test_push_without_session() {
        let mut controller = RecordingController::new(RecordingConfig::default());
        assert_eq!(controller.push(&chunk(0.3, Instant::now()), 0.01), None);
    }
}
