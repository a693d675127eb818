/// Error recovery policy
///
/// Per-kind retry budget. A burst of failures of one kind is allowed up to
/// `max_retries`; once a kind has been quiet for longer than the cooldown its
/// count starts over. One manager is owned by each worker, not shared.

use crate::error::{ErrorKind, MonitorError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Failures of one kind tolerated inside a burst
    pub max_retries: u32,

    /// Quiet period after which a kind's count resets (seconds)
    pub cooldown_secs: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            cooldown_secs: 1.0,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.cooldown_secs < 0.0 {
            return Err(MonitorError::Config(
                "recovery.cooldown_secs must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct ErrorRecord {
    count: u32,
    last_seen: Instant,
}

pub struct ErrorRecoveryManager {
    max_retries: u32,
    cooldown: Duration,
    records: HashMap<ErrorKind, ErrorRecord>,
}

impl ErrorRecoveryManager {
    pub fn new(config: &RecoveryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            cooldown: Duration::from_secs_f64(config.cooldown_secs),
            records: HashMap::new(),
        }
    }

    /// Count one failure of `kind` at `now` and report whether it is still
    /// within budget
    pub fn should_retry(&mut self, kind: ErrorKind, now: Instant) -> bool {
        let cooldown = self.cooldown;
        let record = self.records.entry(kind).or_insert(ErrorRecord {
            count: 0,
            last_seen: now,
        });

        if now.saturating_duration_since(record.last_seen) > cooldown {
            debug!("{:?} quiet for longer than cooldown, count reset", kind);
            record.count = 0;
        }

        record.count += 1;
        record.last_seen = now;

        let retry = record.count <= self.max_retries;
        if !retry {
            warn!(
                "{:?} failed {} times in a burst (budget {})",
                kind, record.count, self.max_retries
            );
        }
        retry
    }

    /// Zero the count for `kind` after a confirmed recovery
    pub fn reset(&mut self, kind: ErrorKind) {
        if let Some(record) = self.records.get_mut(&kind) {
            record.count = 0;
        }
    }

    pub fn retry_count(&self, kind: ErrorKind) -> u32 {
        self.records.get(&kind).map_or(0, |r| r.count)
    }
}

impl Default for ErrorRecoveryManager {
    fn default() -> Self {
        Self::new(&RecoveryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(t0: Instant, millis: u64) -> Instant {
        t0 + Duration::from_millis(millis)
    }

    #[test]
    fn test_budget_exhausted_within_burst() {
        let t0 = Instant::now();
        let mut recovery = ErrorRecoveryManager::default();

        assert!(recovery.should_retry(ErrorKind::Inference, t0));
        assert!(recovery.should_retry(ErrorKind::Inference, ms(t0, 250)));
        assert!(recovery.should_retry(ErrorKind::Inference, ms(t0, 500)));
        assert!(!recovery.should_retry(ErrorKind::Inference, ms(t0, 750)));
        assert_eq!(recovery.retry_count(ErrorKind::Inference), 4);
    }

    #[test]
    fn test_count_resets_after_quiet_period() {
        let t0 = Instant::now();
        let mut recovery = ErrorRecoveryManager::default();

        for i in 0..3 {
            assert!(recovery.should_retry(ErrorKind::DeviceIo, ms(t0, i * 100)));
        }

        // 1.1s since the last failure: a new burst
        assert!(recovery.should_retry(ErrorKind::DeviceIo, ms(t0, 1300)));
        assert_eq!(recovery.retry_count(ErrorKind::DeviceIo), 1);
    }

    #[test]
    fn test_kinds_are_independent() {
        let t0 = Instant::now();
        let mut recovery = ErrorRecoveryManager::default();

        for _ in 0..4 {
            recovery.should_retry(ErrorKind::Inference, t0);
        }

        assert!(recovery.should_retry(ErrorKind::DeviceFreeze, t0));
        assert_eq!(recovery.retry_count(ErrorKind::DeviceFreeze), 1);
        assert_eq!(recovery.retry_count(ErrorKind::DeviceIo), 0);
    }

    #[test]
    fn test_reset_on_recovery() {
        let t0 = Instant::now();
        let mut recovery = ErrorRecoveryManager::default();

        recovery.should_retry(ErrorKind::Inference, t0);
        recovery.should_retry(ErrorKind::Inference, t0);
        recovery.reset(ErrorKind::Inference);

        assert_eq!(recovery.retry_count(ErrorKind::Inference), 0);
        assert!(recovery.should_retry(ErrorKind::Inference, t0));
    }

    #[test]
    fn test_zero_budget() {
        let mut recovery = ErrorRecoveryManager::new(&RecoveryConfig {
            max_retries: 0,
            cooldown_secs: 1.0,
        });
        assert!(!recovery.should_retry(ErrorKind::Inference, Instant::now()));
    }
}
