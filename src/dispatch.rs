/// Command dispatch
///
/// Hands finished recordings to the downstream processing stage through a
/// bounded channel. A full channel drops the new command; work already
/// queued is never displaced.

use crate::error::MonitorError;
use crate::recording::TerminationReason;
use crate::state::{Counter, StreamState};
use chrono::{DateTime, Local};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// A recorded voice command ready for transcription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedCommand {
    pub audio_path: PathBuf,
    /// Pre-roll plus command audio, in seconds
    pub duration_secs: f64,
    pub captured_at: DateTime<Local>,
    pub reason: TerminationReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Submitted,
    Dropped,
}

pub struct CommandDispatcher {
    tx: Sender<CapturedCommand>,
    state: StreamState,
}

impl CommandDispatcher {
    /// Create a dispatcher and the receiving end handed to the consumer
    pub fn new(capacity: usize, state: StreamState) -> (Self, Receiver<CapturedCommand>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx, state }, rx)
    }

    /// Non-blocking hand-off
    pub fn submit(&self, command: CapturedCommand) -> DispatchOutcome {
        match self.tx.try_send(command) {
            Ok(()) => {
                self.state.bump(Counter::CommandsDispatched);
                DispatchOutcome::Submitted
            }
            Err(TrySendError::Full(command)) => {
                warn!(
                    "{}, dropping command {}",
                    MonitorError::ChannelFull("processing"),
                    command.audio_path.display()
                );
                self.state.bump(Counter::CommandsDropped);
                DispatchOutcome::Dropped
            }
            Err(TrySendError::Disconnected(command)) => {
                info!(
                    "No command consumer, dropping {}",
                    command.audio_path.display()
                );
                self.state.bump(Counter::CommandsDropped);
                DispatchOutcome::Dropped
            }
        }
    }

    /// Commands waiting for the consumer
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str) -> CapturedCommand {
        CapturedCommand {
            audio_path: PathBuf::from(name),
            duration_secs: 2.5,
            captured_at: Local::now(),
            reason: TerminationReason::Silence,
        }
    }

    #[test]
    fn test_submit_and_receive() {
        let state = StreamState::new();
        let (dispatcher, rx) = CommandDispatcher::new(10, state.clone());

        assert_eq!(dispatcher.submit(command("a.wav")), DispatchOutcome::Submitted);
        assert_eq!(dispatcher.len(), 1);

        let received = rx.try_recv().unwrap();
        assert_eq!(received.audio_path, PathBuf::from("a.wav"));
        assert_eq!(state.counters().commands_dispatched, 1);
    }

    #[test]
    fn test_full_channel_drops_new_command() {
        let state = StreamState::new();
        let (dispatcher, rx) = CommandDispatcher::new(2, state.clone());

        dispatcher.submit(command("first.wav"));
        dispatcher.submit(command("second.wav"));
        assert_eq!(dispatcher.submit(command("third.wav")), DispatchOutcome::Dropped);

        let queued: Vec<_> = rx.try_iter().map(|c| c.audio_path).collect();
        assert_eq!(queued, vec![PathBuf::from("first.wav"), PathBuf::from("second.wav")]);
        assert_eq!(state.counters().commands_dropped, 1);
    }

    #[test]
    fn test_disconnected_consumer() {
        let state = StreamState::new();
        let (dispatcher, rx) = CommandDispatcher::new(2, state.clone());
        drop(rx);

        assert_eq!(dispatcher.submit(command("a.wav")), DispatchOutcome::Dropped);
        assert_eq!(state.counters().commands_dropped, 1);
    }

    #[test]
    fn test_command_serializes() {
        let json = serde_json::to_value(command("cmd.wav")).unwrap();
        assert_eq!(json["audio_path"], "cmd.wav");
        assert_eq!(json["reason"], "silence");
    }
}
