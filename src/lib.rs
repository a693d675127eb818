/// Wake-word monitor library
///
/// Always-on microphone capture, wake-word confirmation over a sliding
/// window, command recording with silence-based endpointing, and hand-off
/// of finished recordings to a downstream processing stage.

pub mod audio_buffer;
pub mod capture;
pub mod channel;
pub mod chunk;
pub mod classifier;
pub mod config;
pub mod confirmation;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod microphone;
pub mod monitor;
pub mod recording;
pub mod recovery;
pub mod state;
pub mod vad;
pub mod wav;

// Re-export main types
pub use capture::{AudioDevice, AudioStream, CaptureConfig, StopSignal};
pub use chunk::{AudioChunk, AudioSample, SAMPLE_RATE, STRIDE_SAMPLES};
pub use classifier::{Classifier, EnergyClassifier, EnergyClassifierConfig};
pub use config::MonitorConfig;
pub use dispatch::CapturedCommand;
pub use error::{ErrorKind, MonitorError};
pub use features::{Features, MfccConfig, MfccExtractor};
pub use microphone::{list_input_devices, InputDeviceInfo, MicrophoneDevice};
pub use monitor::{Monitor, MonitorStats};
pub use recording::TerminationReason;
pub use state::{Mode, StreamState, StreamStatus};
