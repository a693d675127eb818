/// Shared stream state
///
/// The only state both worker threads touch. Mode, metrics, counters and
/// the last error live behind one mutex; the lock is held only for the
/// read-modify-write itself, never across device I/O or inference.

use crate::error::MonitorError;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Operating mode of the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Listening for the wake word
    Monitoring,

    /// Capturing the voice command that follows an activation
    Recording,

    /// Packaging and handing off a finished recording
    Processing,

    /// Set by the downstream speech-to-text stage
    Transcribing,

    /// Set by the downstream intent stage
    ProcessingNlu,

    /// Unrecoverable failure; only a restart clears it
    Error,

    /// Detection suspended by the user
    Paused,
}

impl Mode {
    /// Transition table. Staying in the same mode is always allowed.
    pub fn can_transition_to(self, next: Mode) -> bool {
        use Mode::*;

        if self == next {
            return true;
        }

        match self {
            Monitoring => matches!(next, Recording | Paused | Transcribing | ProcessingNlu | Error),
            Recording => matches!(next, Processing | Error),
            Processing => matches!(next, Monitoring | Transcribing | Error),
            Transcribing => matches!(next, ProcessingNlu | Monitoring | Error),
            ProcessingNlu => matches!(next, Monitoring | Error),
            Paused => matches!(next, Monitoring | Error),
            Error => false,
        }
    }

    /// Modes owned by the downstream stage rather than the core
    pub fn is_external_stage(self) -> bool {
        matches!(self, Mode::Transcribing | Mode::ProcessingNlu)
    }

    pub fn is_terminal(self) -> bool {
        self == Mode::Error
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Monitoring => "monitoring",
            Mode::Recording => "recording",
            Mode::Processing => "processing",
            Mode::Transcribing => "transcribing",
            Mode::ProcessingNlu => "processing_nlu",
            Mode::Error => "error",
            Mode::Paused => "paused",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live metrics shown on the status line
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StreamMetrics {
    /// Classifier invocations per second
    pub fps: f32,
    pub cpu_percent: f32,
    pub last_confidence: f32,
    pub noise_floor: f32,
    pub is_speaking: bool,
}

/// Running totals since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamCounters {
    pub chunks_captured: u64,
    pub chunks_dropped: u64,
    pub chunks_discarded: u64,
    pub inferences: u64,
    pub inference_failures: u64,
    pub detections: u64,
    pub activations: u64,
    pub reconnects: u64,
    pub reconnect_attempts: u32,
    pub commands_dispatched: u64,
    pub commands_dropped: u64,
}

/// Counter selector for `StreamState::bump`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    ChunksCaptured,
    ChunksDropped,
    ChunksDiscarded,
    InferenceFailures,
    Detections,
    Activations,
    Reconnects,
    CommandsDispatched,
    CommandsDropped,
}

/// Point-in-time copy of the shared state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamStatus {
    pub mode: Mode,
    pub metrics: StreamMetrics,
    pub last_error: Option<String>,
    pub counters: StreamCounters,
}

impl StreamStatus {
    /// One-line rendering for a continuously refreshed terminal display
    pub fn status_line(&self) -> String {
        let vad = if self.metrics.is_speaking { "speech" } else { "..    " };
        format!(
            "[{:<14}] CPU: {:4.1}% | FPS: {:4.1} | VAD: {} | Conf: {:.4} | Noise: {:.4} | Error: {}",
            self.mode.as_str(),
            self.metrics.cpu_percent,
            self.metrics.fps,
            vad,
            self.metrics.last_confidence,
            self.metrics.noise_floor,
            self.last_error.as_deref().unwrap_or("none"),
        )
    }
}

#[derive(Debug)]
struct StateInner {
    mode: Mode,
    metrics: StreamMetrics,
    last_error: Option<String>,
    counters: StreamCounters,
}

impl StateInner {
    fn new() -> Self {
        Self {
            mode: Mode::Monitoring,
            metrics: StreamMetrics::default(),
            last_error: None,
            counters: StreamCounters::default(),
        }
    }
}

/// Cloneable handle to the state shared by producer, detection loop and
/// control surface
#[derive(Debug, Clone)]
pub struct StreamState {
    inner: Arc<Mutex<StateInner>>,
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StateInner::new())),
        }
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock().mode
    }

    /// Move to `to` if the transition table allows it from the current mode
    ///
    /// Core-owned edges only. ERROR is reached through `fail`. Returns the
    /// previous mode.
    pub(crate) fn transition(&self, to: Mode) -> Result<Mode, MonitorError> {
        let mut inner = self.inner.lock();
        let from = inner.mode;

        if to == Mode::Error || !from.can_transition_to(to) {
            return Err(MonitorError::InvalidTransition { from, to });
        }

        if from != to {
            inner.mode = to;
            debug!("State: {} -> {}", from, to);
        }

        Ok(from)
    }

    /// Move from `from` to `to`, failing if the current mode is not `from`
    pub(crate) fn transition_from(&self, from: Mode, to: Mode) -> Result<Mode, MonitorError> {
        let mut inner = self.inner.lock();
        let current = inner.mode;

        if current != from || to == Mode::Error || !from.can_transition_to(to) {
            return Err(MonitorError::InvalidTransition { from: current, to });
        }

        inner.mode = to;
        debug!("State: {} -> {}", from, to);
        Ok(from)
    }

    /// Mode change requested by the downstream transcription stage
    ///
    /// Accepts TRANSCRIBING or PROCESSING_NLU as targets, and MONITORING
    /// only when leaving one of those two. Everything else belongs to the
    /// core.
    pub fn set_external_stage(&self, to: Mode) -> Result<Mode, MonitorError> {
        let mut inner = self.inner.lock();
        let from = inner.mode;

        let allowed = match to {
            Mode::Transcribing | Mode::ProcessingNlu => true,
            Mode::Monitoring => from.is_external_stage(),
            _ => false,
        };

        if !allowed || !from.can_transition_to(to) {
            return Err(MonitorError::InvalidTransition { from, to });
        }

        if from != to {
            inner.mode = to;
            debug!("State: {} -> {} (external)", from, to);
        }

        Ok(from)
    }

    /// Enter the terminal error state, recording `message`
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        let mut inner = self.inner.lock();

        if inner.mode != Mode::Error {
            error!("State: {} -> error ({})", inner.mode, message);
        }

        inner.mode = Mode::Error;
        inner.last_error = Some(message);
    }

    /// Record a recoverable fault without changing the mode
    pub fn record_fault(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("Recoverable fault: {}", message);
        self.inner.lock().last_error = Some(message);
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Back to a fresh monitoring state. Used when the core is restarted.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = StateInner::new();
        info!("Stream state reset");
    }

    pub fn set_cpu_usage(&self, percent: f32) {
        self.inner.lock().metrics.cpu_percent = percent;
    }

    pub fn set_confidence(&self, confidence: f32) {
        self.inner.lock().metrics.last_confidence = confidence;
    }

    /// Store a classifier result and, when known, the current inference rate
    pub fn record_inference(&self, confidence: f32, fps: Option<f32>) {
        let mut inner = self.inner.lock();
        inner.metrics.last_confidence = confidence;
        if let Some(fps) = fps {
            inner.metrics.fps = fps;
        }
        inner.counters.inferences += 1;
    }

    pub fn update_vad(&self, noise_floor: f32, is_speaking: bool) {
        let mut inner = self.inner.lock();
        inner.metrics.noise_floor = noise_floor;
        inner.metrics.is_speaking = is_speaking;
    }

    pub fn bump(&self, counter: Counter) {
        let mut inner = self.inner.lock();
        let c = &mut inner.counters;
        match counter {
            Counter::ChunksCaptured => c.chunks_captured += 1,
            Counter::ChunksDropped => c.chunks_dropped += 1,
            Counter::ChunksDiscarded => c.chunks_discarded += 1,
            Counter::InferenceFailures => c.inference_failures += 1,
            Counter::Detections => c.detections += 1,
            Counter::Activations => c.activations += 1,
            Counter::Reconnects => c.reconnects += 1,
            Counter::CommandsDispatched => c.commands_dispatched += 1,
            Counter::CommandsDropped => c.commands_dropped += 1,
        }
    }

    /// Consecutive failed device opens in the current reconnect cycle
    pub fn set_reconnect_attempts(&self, attempts: u32) {
        self.inner.lock().counters.reconnect_attempts = attempts;
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.inner.lock().metrics
    }

    pub fn counters(&self) -> StreamCounters {
        self.inner.lock().counters
    }

    pub fn status(&self) -> StreamStatus {
        let inner = self.inner.lock();
        StreamStatus {
            mode: inner.mode,
            metrics: inner.metrics,
            last_error: inner.last_error.clone(),
            counters: inner.counters,
        }
    }
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}
