/// Error types shared by the capture, detection and recording paths
///
/// Every fallible operation in the crate returns `MonitorError`. The
/// retry policy keys off `ErrorKind`, which groups errors by how they are
/// recovered rather than by where they were raised.

use crate::audio_buffer::AudioBufferError;
use crate::state::Mode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to open audio device: {0}")]
    DeviceOpen(String),

    #[error("Audio device frozen: no audio for {0:?}")]
    DeviceFreeze(Duration),

    #[error("Audio device I/O error: {0}")]
    DeviceIo(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("{0} channel full")]
    ChannelFull(&'static str),

    #[error("Microphone reconnect attempts exhausted after {0} tries")]
    ReconnectsExhausted(u32),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: Mode, to: Mode },

    #[error("Monitor is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Audio buffer error: {0}")]
    Buffer(#[from] AudioBufferError),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Retry-policy key for recoverable errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceOpen,
    DeviceFreeze,
    DeviceIo,
    Inference,
    ChannelFull,
}

impl MonitorError {
    /// Retry-policy kind, or `None` for errors that are never retried
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::DeviceOpen(_) => Some(ErrorKind::DeviceOpen),
            Self::DeviceFreeze(_) => Some(ErrorKind::DeviceFreeze),
            Self::DeviceIo(_) => Some(ErrorKind::DeviceIo),
            Self::Inference(_) => Some(ErrorKind::Inference),
            Self::ChannelFull(_) => Some(ErrorKind::ChannelFull),
            Self::ReconnectsExhausted(_)
            | Self::InvalidTransition { .. }
            | Self::NotRunning
            | Self::Config(_)
            | Self::Buffer(_)
            | Self::Wav(_)
            | Self::Io(_)
            | Self::Json(_) => None,
        }
    }

    /// Whether the producer should reopen the device after this error
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            Self::DeviceOpen(_) | Self::DeviceFreeze(_) | Self::DeviceIo(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            MonitorError::DeviceIo("overrun".into()).kind(),
            Some(ErrorKind::DeviceIo)
        );
        assert_eq!(
            MonitorError::Inference("bad tensor".into()).kind(),
            Some(ErrorKind::Inference)
        );
        assert_eq!(MonitorError::ReconnectsExhausted(5).kind(), None);
    }

    #[test]
    fn test_reconnect_classification() {
        assert!(MonitorError::DeviceFreeze(Duration::from_secs(2)).needs_reconnect());
        assert!(MonitorError::DeviceOpen("busy".into()).needs_reconnect());
        assert!(!MonitorError::Inference("nan".into()).needs_reconnect());
        assert!(!MonitorError::ChannelFull("processing").needs_reconnect());
    }

    #[test]
    fn test_transition_message() {
        let err = MonitorError::InvalidTransition {
            from: Mode::Recording,
            to: Mode::Paused,
        };
        assert_eq!(err.to_string(), "Invalid state transition: recording -> paused");
    }
}
