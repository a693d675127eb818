/// Monitor control surface
///
/// Wires the capture producer and the detection loop together and exposes
/// the operations used from outside: start, stop, pause, resume,
/// recalibrate, status and stats.
///
/// Both workers are plain threads. Each signals completion through a
/// channel from a drop guard, so `stop` can wait with a deadline and detach
/// a worker that does not exit in time instead of blocking forever.

use crate::capture::{AudioDevice, CaptureProducer, StopSignal};
use crate::channel::drop_oldest_channel;
use crate::chunk::AudioChunk;
use crate::classifier::Classifier;
use crate::config::MonitorConfig;
use crate::detection::{ControlCommand, DetectionLoop};
use crate::dispatch::{CapturedCommand, CommandDispatcher};
use crate::error::MonitorError;
use crate::state::{Mode, StreamState, StreamStatus};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{error, info, warn};

/// Status plus queue depths
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub running: bool,
    pub status: StreamStatus,
    pub chunk_queue_len: usize,
    pub command_queue_len: usize,
}

/// Signals its worker's completion when dropped, including on panic
struct DoneGuard(Sender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

struct Worker {
    name: &'static str,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

fn spawn_worker<F>(name: &'static str, body: F) -> Result<Worker, MonitorError>
where
    F: FnOnce() + Send + 'static,
{
    let (done_tx, done) = bounded(1);
    let handle = std::thread::Builder::new()
        .name(format!("wakeword-{name}"))
        .spawn(move || {
            let _guard = DoneGuard(done_tx);
            body();
        })?;

    Ok(Worker { name, done, handle })
}

/// Channels owned by one running session
struct Session {
    workers: Vec<Worker>,
    control: Sender<ControlCommand>,
    chunks: Receiver<AudioChunk>,
}

pub struct Monitor {
    config: MonitorConfig,
    state: StreamState,
    stop: StopSignal,
    session: Option<Session>,
    commands: Receiver<CapturedCommand>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        config.validate()?;

        // Replaced on start; keeps `commands()` valid before the first start
        let (_, commands) = bounded(1);

        Ok(Self {
            config,
            state: StreamState::new(),
            stop: StopSignal::new(),
            session: None,
            commands,
        })
    }

    /// Spawn the capture and detection workers
    ///
    /// Clears any previous ERROR state. Starting a running monitor is a no-op.
    pub fn start<C>(&mut self, device: Box<dyn AudioDevice>, classifier: C) -> Result<(), MonitorError>
    where
        C: Classifier + 'static,
    {
        if self.session.is_some() {
            warn!("Monitor already running");
            return Ok(());
        }

        self.state.reset();
        self.stop = StopSignal::new();

        let (chunk_tx, chunk_rx) = drop_oldest_channel(self.config.chunk_queue_capacity);
        let (dispatcher, commands) =
            CommandDispatcher::new(self.config.command_queue_capacity, self.state.clone());
        let (control_tx, control_rx) = unbounded();

        let detection = DetectionLoop::new(&self.config, classifier, dispatcher, self.state.clone())?;
        let producer = CaptureProducer::new(
            self.config.capture.clone(),
            &self.config.recovery,
            device,
            chunk_tx,
            self.state.clone(),
            self.stop.clone(),
        );

        let mut workers = Vec::with_capacity(2);
        workers.push(spawn_worker("capture", move || producer.run())?);

        let detection_chunks = chunk_rx.clone();
        let detection_stop = self.stop.clone();
        match spawn_worker("detection", move || {
            detection.run(detection_chunks, control_rx, detection_stop)
        }) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                self.stop.stop();
                return Err(e);
            }
        }

        self.commands = commands;
        self.session = Some(Session {
            workers,
            control: control_tx,
            chunks: chunk_rx,
        });

        info!(
            "Monitor started (device {:?}, output {})",
            self.config.capture.device_index,
            self.config.output_dir.display()
        );
        Ok(())
    }

    /// Raise the stop signal and wait, at most the shutdown timeout in total,
    /// for the workers
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        info!("Stopping monitor");
        self.stop.stop();
        let timeout = self.config.shutdown_timeout();
        // One bound for the whole shutdown, not per worker
        let deadline = Instant::now() + timeout;

        for worker in session.workers {
            match worker.done.recv_deadline(deadline) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if worker.handle.join().is_err() {
                        error!("{} worker panicked", worker.name);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(
                        "{} worker did not stop within {:?}, detaching",
                        worker.name, timeout
                    );
                }
            }
        }

        info!("Monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// MONITORING -> PAUSED
    pub fn pause(&self) -> Result<(), MonitorError> {
        self.state.transition(Mode::Paused)?;
        info!("Monitoring paused");
        Ok(())
    }

    /// PAUSED -> MONITORING
    pub fn resume(&self) -> Result<(), MonitorError> {
        self.state.transition_from(Mode::Paused, Mode::Monitoring)?;
        info!("Monitoring resumed");
        Ok(())
    }

    /// Clear pending detections; the noise floor keeps adapting on its own
    pub fn recalibrate(&self) -> Result<(), MonitorError> {
        let session = self.session.as_ref().ok_or(MonitorError::NotRunning)?;
        session
            .control
            .send(ControlCommand::Recalibrate)
            .map_err(|_| MonitorError::NotRunning)
    }

    pub fn status(&self) -> StreamStatus {
        self.state.status()
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            running: self.is_running(),
            status: self.state.status(),
            chunk_queue_len: self.session.as_ref().map_or(0, |s| s.chunks.len()),
            command_queue_len: self.commands.len(),
        }
    }

    /// Receiving end of the processing channel for the current session
    pub fn commands(&self) -> Receiver<CapturedCommand> {
        self.commands.clone()
    }

    /// Shared state handle; the downstream stage moves through
    /// TRANSCRIBING with `StreamState::set_external_stage`
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}
