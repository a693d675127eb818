/// Detection loop
///
/// Consumer task. Owns the window and pre-roll buffers, the VAD, the
/// confirmation tracker, the recording session and the classifier, and
/// drives the mode transitions for each chunk it receives:
///
/// - MONITORING: roll the buffers, classify non-silent windows, confirm and
///   activate.
/// - RECORDING: append to the session until silence or the safety limit,
///   then write the WAV, dispatch it and return to MONITORING.
/// - PAUSED / ERROR: drain and discard.
/// - PROCESSING and the external stages: keep the buffers rolling only.
///
/// Chunk timestamps are used as "now", so timing follows capture time.

use crate::audio_buffer::{PreRollBuffer, SlidingWindowBuffer};
use crate::capture::StopSignal;
use crate::chunk::AudioChunk;
use crate::classifier::Classifier;
use crate::config::MonitorConfig;
use crate::confirmation::ConfirmationTracker;
use crate::dispatch::{CapturedCommand, CommandDispatcher};
use crate::error::{ErrorKind, MonitorError};
use crate::features::MfccExtractor;
use crate::recording::{RecordingController, TerminationReason};
use crate::recovery::ErrorRecoveryManager;
use crate::state::{Counter, Mode, StreamState};
use crate::vad::AdaptiveVad;
use crate::wav;
use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Classifier probability that counts as a detection
    pub activation_threshold: f32,

    /// Chunk receive timeout; bounds how long stop and control commands wait
    pub recv_timeout_secs: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.92,
            recv_timeout_secs: 1.0,
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !(0.0..=1.0).contains(&self.activation_threshold) {
            return Err(MonitorError::Config(
                "detection.activation_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.recv_timeout_secs <= 0.0 {
            return Err(MonitorError::Config(
                "detection.recv_timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Out-of-band requests from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Forget pending detections
    Recalibrate,
}

pub struct DetectionLoop<C: Classifier> {
    config: DetectionConfig,
    output_dir: PathBuf,
    state: StreamState,
    window: SlidingWindowBuffer,
    preroll: PreRollBuffer,
    vad: AdaptiveVad,
    tracker: ConfirmationTracker,
    recovery: ErrorRecoveryManager,
    recorder: RecordingController,
    extractor: MfccExtractor,
    classifier: C,
    dispatcher: CommandDispatcher,
    last_inference: Option<Instant>,
    fps: f32,
    /// Chunks were discarded while paused; buffers predate the gap
    stale: bool,
}

impl<C: Classifier> DetectionLoop<C> {
    pub fn new(
        config: &MonitorConfig,
        classifier: C,
        dispatcher: CommandDispatcher,
        state: StreamState,
    ) -> Result<Self, MonitorError> {
        Ok(Self {
            config: config.detection.clone(),
            output_dir: config.output_dir.clone(),
            state,
            window: SlidingWindowBuffer::new(),
            preroll: PreRollBuffer::new(),
            vad: AdaptiveVad::with_config(config.vad.clone()),
            tracker: ConfirmationTracker::new(&config.confirmation),
            recovery: ErrorRecoveryManager::new(&config.recovery),
            recorder: RecordingController::new(config.recording.clone()),
            extractor: MfccExtractor::new(config.mfcc.clone())?,
            classifier,
            dispatcher,
            last_inference: None,
            fps: 0.0,
            stale: false,
        })
    }

    /// Consume chunks until stopped or the chunk channel closes
    pub fn run(
        mut self,
        chunks: Receiver<AudioChunk>,
        control: Receiver<ControlCommand>,
        stop: StopSignal,
    ) {
        let timeout = Duration::from_secs_f64(self.config.recv_timeout_secs);
        info!("Detection loop started");

        while !stop.is_stopped() {
            while let Ok(command) = control.try_recv() {
                self.handle_control(command);
            }

            match chunks.recv_timeout(timeout) {
                Ok(chunk) => {
                    if let Err(e) = self.process_chunk(&chunk) {
                        error!("Detection failed: {}", e);
                        self.recorder.discard();
                        self.state.fail(format!("Inference failure budget exhausted: {e}"));
                    }
                }
                // No audio yet; the producer may be reconnecting
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Chunk channel closed");
                    break;
                }
            }
        }

        self.shutdown();
        info!("Detection loop stopped");
    }

    pub fn handle_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Recalibrate => {
                self.tracker.clear();
                info!("Recalibrated: pending detections cleared");
            }
        }
    }

    /// One loop iteration for one chunk
    ///
    /// Returns an error only when inference failures exceed their budget.
    pub fn process_chunk(&mut self, chunk: &AudioChunk) -> Result<(), MonitorError> {
        match self.state.mode() {
            Mode::Paused | Mode::Error => {
                self.stale = true;
                self.state.bump(Counter::ChunksDiscarded);
                Ok(())
            }
            Mode::Monitoring => {
                if self.stale {
                    self.restart_listening();
                }
                self.monitor_chunk(chunk)
            }
            Mode::Recording if self.recorder.is_active() => {
                self.record_chunk(chunk);
                Ok(())
            }
            Mode::Recording | Mode::Processing | Mode::Transcribing | Mode::ProcessingNlu => {
                self.observe(chunk);
                Ok(())
            }
        }
    }

    /// Drop audio and detections from before a pause
    fn restart_listening(&mut self) {
        self.window.reset();
        self.preroll.clear();
        self.vad.reset();
        self.tracker.clear();
        self.last_inference = None;
        self.stale = false;
        info!("Listening resumed with fresh buffers");
    }

    /// Roll the buffers and the noise floor
    fn observe(&mut self, chunk: &AudioChunk) {
        self.window.add_samples(chunk.samples());
        self.preroll.add_samples(chunk.samples());
        let speaking = self.vad.update(chunk.rms());
        self.state.update_vad(self.vad.noise_floor(), speaking);
    }

    fn monitor_chunk(&mut self, chunk: &AudioChunk) -> Result<(), MonitorError> {
        self.observe(chunk);
        let now = chunk.timestamp();

        if self.vad.is_near_silence(chunk.rms()) {
            self.state.set_confidence(0.0);
            self.tracker.prune(now);
            return Ok(());
        }

        let probability = match self.infer() {
            Ok(p) => {
                self.recovery.reset(ErrorKind::Inference);
                p
            }
            Err(e) => {
                self.state.bump(Counter::InferenceFailures);
                let kind = e.kind().unwrap_or(ErrorKind::Inference);
                if self.recovery.should_retry(kind, now) {
                    warn!("Skipping window: {}", e);
                    return Ok(());
                }
                return Err(e);
            }
        };

        self.update_fps(now);
        self.state.record_inference(probability, Some(self.fps));
        trace!("p={:.4} rms={:.4}", probability, chunk.rms());

        if probability >= self.config.activation_threshold && !self.tracker.is_in_cooldown(now) {
            self.tracker.add_detection(probability, now);
            self.state.bump(Counter::Detections);
            debug!("Detection p={:.3} ({} pending)", probability, self.tracker.len());

            if self.tracker.is_confirmed() {
                self.activate(now);
            }
        } else {
            self.tracker.prune(now);
        }

        Ok(())
    }

    fn infer(&mut self) -> Result<f32, MonitorError> {
        let features = self.extractor.extract(&self.window.samples())?;
        let probability = self.classifier.predict(&features)?;

        if !probability.is_finite() {
            return Err(MonitorError::Inference(format!(
                "classifier returned {probability}"
            )));
        }
        Ok(probability.clamp(0.0, 1.0))
    }

    fn update_fps(&mut self, now: Instant) {
        if let Some(previous) = self.last_inference {
            let dt = now.saturating_duration_since(previous).as_secs_f32();
            if dt > 0.0 {
                let instant = 1.0 / dt;
                self.fps = if self.fps == 0.0 {
                    instant
                } else {
                    0.9 * self.fps + 0.1 * instant
                };
            }
        }
        self.last_inference = Some(now);
    }

    fn activate(&mut self, now: Instant) {
        let preroll = self.preroll.snapshot();

        if let Err(e) = self.state.transition(Mode::Recording) {
            warn!("Activation ignored: {}", e);
            return;
        }

        let peak = self.tracker.peak_confidence().unwrap_or_default();
        self.tracker.activate(now);
        self.tracker.clear();
        self.recorder.start(preroll, Local::now());
        self.state.bump(Counter::Activations);

        info!("Wake word confirmed (peak confidence {:.3})", peak);
    }

    fn record_chunk(&mut self, chunk: &AudioChunk) {
        self.observe(chunk);

        if let Some(reason) = self.recorder.push(chunk, self.vad.noise_floor()) {
            self.finish_recording(reason);
        }
    }

    /// RECORDING -> PROCESSING -> MONITORING, writing and dispatching on the way
    fn finish_recording(&mut self, reason: TerminationReason) {
        if let Err(e) = self.state.transition(Mode::Processing) {
            warn!("Recording discarded: {}", e);
            self.recorder.discard();
            return;
        }

        if let Some(recording) = self.recorder.finish(reason) {
            match wav::save_command(&self.output_dir, &recording.samples, &recording.captured_at) {
                Ok(audio_path) => {
                    info!(
                        "Command saved: {} ({:.2}s)",
                        audio_path.display(),
                        recording.duration_secs
                    );
                    self.dispatcher.submit(CapturedCommand {
                        audio_path,
                        duration_secs: recording.duration_secs,
                        captured_at: recording.captured_at,
                        reason: recording.reason,
                    });
                }
                Err(e) => error!("Failed to save command recording: {}", e),
            }
        }

        if let Err(e) = self.state.transition(Mode::Monitoring) {
            warn!("Could not return to monitoring: {}", e);
        }
    }

    /// Keep a long-enough recording interrupted by stop, discard the rest
    fn shutdown(&mut self) {
        if !self.recorder.is_active() {
            return;
        }

        if self.recorder.meets_minimum() {
            self.finish_recording(TerminationReason::Shutdown);
        } else {
            debug!("Discarding short recording at shutdown");
            self.recorder.discard();
        }
    }

    pub fn pending_detections(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }
}
