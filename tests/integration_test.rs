/// Integration tests for the wake-word monitor
///
/// Drives the full capture -> detection -> recording -> dispatch pipeline
/// with a scripted audio device and a stub classifier.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use wakeword_monitor::wav::wav_duration;
use wakeword_monitor::{
    AudioDevice, AudioSample, AudioStream, Classifier, Features, Mode, Monitor, MonitorConfig,
    MonitorError, TerminationReason,
};

/// Chunk levels shared between the test and the device
type Script = Arc<Mutex<VecDeque<f32>>>;

struct ScriptedDevice {
    script: Script,
}

struct ScriptedStream {
    script: Script,
}

impl AudioDevice for ScriptedDevice {
    fn open(&mut self, _device_index: Option<usize>) -> Result<Box<dyn AudioStream>, MonitorError> {
        Ok(Box::new(ScriptedStream {
            script: self.script.clone(),
        }))
    }
}

impl AudioStream for ScriptedStream {
    fn read(&mut self, frames: usize) -> Result<Option<Vec<AudioSample>>, MonitorError> {
        std::thread::sleep(Duration::from_millis(5));

        // Silence once the script runs out
        let level = self.script.lock().pop_front().unwrap_or(0.0);
        Ok(Some(
            (0..frames)
                .map(|i| if i % 2 == 0 { level } else { -level })
                .collect(),
        ))
    }
}

struct UnpluggedDevice;

impl AudioDevice for UnpluggedDevice {
    fn open(&mut self, _device_index: Option<usize>) -> Result<Box<dyn AudioStream>, MonitorError> {
        Err(MonitorError::DeviceOpen("no such device".to_string()))
    }
}

/// Treats every window it is asked about as the wake word
struct AlwaysWakeWord;

impl Classifier for AlwaysWakeWord {
    fn predict(&mut self, _features: &Features) -> Result<f32, MonitorError> {
        Ok(0.99)
    }
}

fn test_config(dir: &std::path::Path) -> MonitorConfig {
    let mut config = MonitorConfig {
        output_dir: dir.join("commands"),
        chunk_queue_capacity: 64,
        ..Default::default()
    };
    config.capture.reconnect_delay_secs = 0.0;
    config.capture.max_reconnects = 3;
    config.detection.recv_timeout_secs = 0.05;
    config
}

fn script(levels: &[(f32, usize)]) -> Script {
    let mut queue = VecDeque::new();
    for &(level, count) in levels {
        queue.extend(std::iter::repeat(level).take(count));
    }
    Arc::new(Mutex::new(queue))
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_wake_word_to_dispatched_command() {
    let dir = tempdir().unwrap();
    let mut monitor = Monitor::new(test_config(dir.path())).unwrap();

    // 2.5s quiet, wake word, 1s of command, trailing silence
    let levels = script(&[(0.0, 10), (0.3, 2), (0.3, 4), (0.0, 7)]);
    monitor
        .start(Box::new(ScriptedDevice { script: levels }), AlwaysWakeWord)
        .unwrap();

    let command = monitor
        .commands()
        .recv_timeout(Duration::from_secs(5))
        .expect("command dispatched");

    assert_eq!(command.reason, TerminationReason::Silence);
    // 2s pre-roll + 1s speech + 1.5s silence
    assert!((command.duration_secs - 4.5).abs() < 1e-9);
    assert!(command.audio_path.exists());
    assert!((wav_duration(&command.audio_path).unwrap() - 4.5).abs() < 1e-3);

    assert!(wait_until(Duration::from_secs(1), || {
        monitor.status().mode == Mode::Monitoring
    }));

    let counters = monitor.status().counters;
    assert_eq!(counters.activations, 1);
    assert_eq!(counters.commands_dispatched, 1);
    assert_eq!(counters.chunks_dropped, 0);

    monitor.stop();
    assert!(!monitor.is_running());
}

#[test]
fn test_unplugged_device_reaches_error() {
    let dir = tempdir().unwrap();
    let mut monitor = Monitor::new(test_config(dir.path())).unwrap();

    monitor
        .start(Box::new(UnpluggedDevice), AlwaysWakeWord)
        .unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        monitor.status().mode == Mode::Error
    }));

    let status = monitor.status();
    assert_eq!(status.counters.reconnect_attempts, 3);
    assert!(status.last_error.unwrap().contains("exhausted"));
    assert!(monitor.pause().is_err());

    monitor.stop();
}

#[test]
fn test_paused_monitor_ignores_wake_word() {
    let dir = tempdir().unwrap();
    let mut monitor = Monitor::new(test_config(dir.path())).unwrap();

    let levels = script(&[]);
    monitor
        .start(
            Box::new(ScriptedDevice {
                script: levels.clone(),
            }),
            AlwaysWakeWord,
        )
        .unwrap();

    monitor.pause().unwrap();
    levels.lock().extend([0.3; 6]);

    assert!(wait_until(Duration::from_secs(3), || levels.lock().is_empty()));
    std::thread::sleep(Duration::from_millis(200));

    let status = monitor.status();
    assert_eq!(status.mode, Mode::Paused);
    assert_eq!(status.counters.activations, 0);
    assert!(status.counters.chunks_discarded >= 6);

    monitor.resume().unwrap();
    assert_eq!(monitor.status().mode, Mode::Monitoring);
    assert!(monitor.commands().try_recv().is_err());

    monitor.stop();
}
