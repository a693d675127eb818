/// Audio capture producer
///
/// Owns the input device. Reads one stride at a time, wraps it in an
/// `AudioChunk` and pushes it into the drop-oldest chunk channel. Device
/// faults (open failures, I/O errors, a stream that stops delivering audio)
/// are handled here by reopening the device; only an exhausted reconnect
/// budget is fatal.

use crate::channel::{DropOldestSender, PushOutcome};
use crate::chunk::{AudioChunk, AudioSample, STRIDE_SAMPLES};
use crate::error::{ErrorKind, MonitorError};
use crate::recovery::{ErrorRecoveryManager, RecoveryConfig};
use crate::state::{Counter, StreamState};
use cache_padded::CachePadded;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Granularity of interruptible sleeps
const STOP_POLL: Duration = Duration::from_millis(50);

/// Source of input streams
#[cfg_attr(test, mockall::automock)]
pub trait AudioDevice: Send {
    /// Open an input stream. `None` selects the system default device.
    fn open(&mut self, device_index: Option<usize>) -> Result<Box<dyn AudioStream>, MonitorError>;
}

/// An open input stream delivering mono 16kHz samples
#[cfg_attr(test, mockall::automock)]
pub trait AudioStream {
    /// Read exactly `frames` samples
    ///
    /// Waits at most a short poll interval and returns `Ok(None)` when a
    /// full stride is not available yet.
    fn read(&mut self, frames: usize) -> Result<Option<Vec<AudioSample>>, MonitorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device index, `None` for the system default
    pub device_index: Option<usize>,

    /// Consecutive failed opens before giving up
    pub max_reconnects: u32,

    /// Wait between reopen attempts (seconds)
    pub reconnect_delay_secs: f64,

    /// A stream silent for this long is treated as frozen (seconds)
    pub chunk_timeout_secs: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: None,
            max_reconnects: 5,
            reconnect_delay_secs: 2.0,
            chunk_timeout_secs: 2.0,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.max_reconnects == 0 {
            return Err(MonitorError::Config(
                "capture.max_reconnects must be at least 1".to_string(),
            ));
        }

        if self.reconnect_delay_secs < 0.0 || self.chunk_timeout_secs <= 0.0 {
            return Err(MonitorError::Config(
                "capture timeouts must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs_f64(self.reconnect_delay_secs)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_timeout_secs)
    }
}

/// Cooperative stop flag shared by the workers and the control surface
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<CachePadded<AtomicBool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for `duration`, waking early if stopped
    ///
    /// Returns true if the signal was raised.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}

/// Producer task: device in, chunks out
pub struct CaptureProducer {
    config: CaptureConfig,
    device: Box<dyn AudioDevice>,
    sender: DropOldestSender<AudioChunk>,
    state: StreamState,
    stop: StopSignal,
    recovery: ErrorRecoveryManager,
}

impl CaptureProducer {
    pub fn new(
        config: CaptureConfig,
        recovery: &RecoveryConfig,
        device: Box<dyn AudioDevice>,
        sender: DropOldestSender<AudioChunk>,
        state: StreamState,
        stop: StopSignal,
    ) -> Self {
        Self {
            config,
            device,
            sender,
            state,
            stop,
            recovery: ErrorRecoveryManager::new(recovery),
        }
    }

    /// Run until stopped or until the reconnect budget is exhausted
    ///
    /// Exhaustion moves the shared state to ERROR.
    pub fn run(mut self) {
        info!("Capture producer started");

        match self.capture_loop() {
            Ok(()) => info!("Capture producer stopped"),
            Err(e) => {
                error!("Capture producer terminated: {}", e);
                self.state.fail(e.to_string());
            }
        }
    }

    fn capture_loop(&mut self) -> Result<(), MonitorError> {
        let mut attempts: u32 = 0;
        let mut opened_once = false;

        while !self.stop.is_stopped() {
            let mut stream = match self.device.open(self.config.device_index) {
                Ok(stream) => stream,
                Err(e) => {
                    attempts += 1;
                    self.state.set_reconnect_attempts(attempts);
                    self.state.record_fault(format!(
                        "{} (attempt {}/{})",
                        e, attempts, self.config.max_reconnects
                    ));

                    if attempts >= self.config.max_reconnects {
                        return Err(MonitorError::ReconnectsExhausted(attempts));
                    }

                    self.stop.sleep(self.config.reconnect_delay());
                    continue;
                }
            };

            if opened_once {
                self.state.bump(Counter::Reconnects);
                info!("Audio stream reopened after {} failed attempts", attempts);
            } else {
                info!("Audio stream opened");
            }
            opened_once = true;
            attempts = 0;
            self.state.set_reconnect_attempts(0);

            match self.pump(stream.as_mut()) {
                Ok(()) => break,
                Err(e) if !e.needs_reconnect() => return Err(e),
                Err(e) => {
                    self.state.record_fault(e.to_string());

                    let within_budget = e
                        .kind()
                        .map_or(true, |kind| self.recovery.should_retry(kind, Instant::now()));

                    if !within_budget {
                        warn!(
                            "Repeated device faults, waiting {:?} before reopening",
                            self.config.reconnect_delay()
                        );
                        self.stop.sleep(self.config.reconnect_delay());
                    }
                }
            }
        }

        Ok(())
    }

    /// Read strides until stopped (`Ok`) or the stream faults (`Err`)
    fn pump(&mut self, stream: &mut dyn AudioStream) -> Result<(), MonitorError> {
        let chunk_timeout = self.config.chunk_timeout();
        let mut last_chunk = Instant::now();

        loop {
            if self.stop.is_stopped() {
                return Ok(());
            }

            let idle = last_chunk.elapsed();
            if idle >= chunk_timeout {
                return Err(MonitorError::DeviceFreeze(idle));
            }

            let Some(samples) = stream.read(STRIDE_SAMPLES)? else {
                continue;
            };

            let now = Instant::now();
            last_chunk = now;
            self.recovery.reset(ErrorKind::DeviceIo);
            self.recovery.reset(ErrorKind::DeviceFreeze);

            self.state.bump(Counter::ChunksCaptured);
            match self.sender.push(AudioChunk::new(samples, now)) {
                PushOutcome::Queued => {}
                PushOutcome::DroppedOldest => {
                    self.state.bump(Counter::ChunksDropped);
                    warn!("{}, dropped oldest chunk", MonitorError::ChannelFull("audio"));
                }
                PushOutcome::Disconnected => {
                    debug!("Chunk channel closed");
                    return Ok(());
                }
            }
        }
    }
}
