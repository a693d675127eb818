/// Monitor configuration
///
/// One tree of per-component settings. Every section has serde defaults, so
/// a JSON file only needs the keys it changes. A few common settings can be
/// overridden from the environment.

use crate::capture::CaptureConfig;
use crate::classifier::EnergyClassifierConfig;
use crate::confirmation::ConfirmationConfig;
use crate::detection::DetectionConfig;
use crate::error::MonitorError;
use crate::features::MfccConfig;
use crate::recording::RecordingConfig;
use crate::recovery::RecoveryConfig;
use crate::vad::VadConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub const ENV_CONFIG_PATH: &str = "WAKEWORD_CONFIG";
pub const ENV_DEVICE_INDEX: &str = "WAKEWORD_DEVICE_INDEX";
pub const ENV_THRESHOLD: &str = "WAKEWORD_THRESHOLD";
pub const ENV_OUTPUT_DIR: &str = "WAKEWORD_OUTPUT_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Where command recordings are written
    pub output_dir: PathBuf,

    /// Capture-to-detection queue, in chunks (about 5s of audio)
    pub chunk_queue_capacity: usize,

    /// Finished commands awaiting the downstream consumer
    pub command_queue_capacity: usize,

    /// Bound on waiting for each worker at shutdown (seconds)
    pub shutdown_timeout_secs: f64,

    pub capture: CaptureConfig,
    pub detection: DetectionConfig,
    pub vad: VadConfig,
    pub confirmation: ConfirmationConfig,
    pub recording: RecordingConfig,
    pub recovery: RecoveryConfig,
    pub mfcc: MfccConfig,
    pub energy_classifier: EnergyClassifierConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("captured_commands"),
            chunk_queue_capacity: 20,
            command_queue_capacity: 10,
            shutdown_timeout_secs: 3.0,
            capture: CaptureConfig::default(),
            detection: DetectionConfig::default(),
            vad: VadConfig::default(),
            confirmation: ConfirmationConfig::default(),
            recording: RecordingConfig::default(),
            recovery: RecoveryConfig::default(),
            mfcc: MfccConfig::default(),
            energy_classifier: EnergyClassifierConfig::default(),
        }
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, MonitorError> {
    value
        .trim()
        .parse()
        .map_err(|_| MonitorError::Config(format!("{key}: cannot parse '{value}'")))
}

impl MonitorConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.chunk_queue_capacity == 0 || self.command_queue_capacity == 0 {
            return Err(MonitorError::Config(
                "queue capacities must be at least 1".to_string(),
            ));
        }

        if self.shutdown_timeout_secs <= 0.0 {
            return Err(MonitorError::Config(
                "shutdown_timeout_secs must be positive".to_string(),
            ));
        }

        self.capture.validate()?;
        self.detection.validate()?;
        self.vad.validate()?;
        self.confirmation.validate()?;
        self.recording.validate()?;
        self.recovery.validate()?;
        self.mfcc.validate()?;

        Ok(())
    }

    /// Read a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self, MonitorError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Overlay environment variables on top of the current values
    pub fn apply_env(&mut self) -> Result<(), MonitorError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`, keyed by environment variable name
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DEVICE_INDEX) {
            self.capture.device_index = Some(parse_env(ENV_DEVICE_INDEX, &value)?);
        }

        if let Some(value) = lookup(ENV_THRESHOLD) {
            self.detection.activation_threshold = parse_env(ENV_THRESHOLD, &value)?;
        }

        if let Some(value) = lookup(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(value);
        }

        Ok(())
    }

    /// File named by `WAKEWORD_CONFIG` (or defaults), then env overrides,
    /// then validation
    pub fn load() -> Result<Self, MonitorError> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => {
                info!("{} not set, using default configuration", ENV_CONFIG_PATH);
                Self::default()
            }
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_queue_capacity, 20);
        assert_eq!(config.command_queue_capacity, 10);
        assert_eq!(config.output_dir, PathBuf::from("captured_commands"));
        assert_eq!(config.detection.activation_threshold, 0.92);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "output_dir": "/tmp/cmds", "confirmation": {{ "required_count": 3 }} }}"#
        )
        .unwrap();

        let config = MonitorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/cmds"));
        assert_eq!(config.confirmation.required_count, 3);
        assert_eq!(config.confirmation.window_secs, 1.5);
        assert_eq!(config.capture.max_reconnects, 5);
    }

    #[test]
    fn test_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        assert!(matches!(
            MonitorConfig::from_file(file.path()),
            Err(MonitorError::Json(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DEVICE_INDEX, "2"),
            (ENV_THRESHOLD, "0.8"),
            (ENV_OUTPUT_DIR, "out"),
        ]
        .into_iter()
        .collect();

        let mut config = MonitorConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.capture.device_index, Some(2));
        assert_eq!(config.detection.activation_threshold, 0.8);
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = MonitorConfig::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_DEVICE_INDEX).then(|| "mic".to_string())
        });
        assert!(matches!(result, Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_invalid_nested_section() {
        let mut config = MonitorConfig::default();
        config.detection.activation_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.chunk_queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trips_through_json() {
        let config = MonitorConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: MonitorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.recording.max_secs, 10.0);
        assert_eq!(parsed.mfcc.n_mfcc, 40);
    }
}
