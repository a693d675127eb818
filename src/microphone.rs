/// cpal-backed microphone
///
/// `MicrophoneDevice` opens an input device by index, preferring a native
/// 16kHz configuration. Other rates are captured at the device default,
/// down-mixed to mono and linearly resampled. The cpal callback only converts
/// and forwards buffers; stride assembly happens on the producer thread in
/// `MicrophoneStream::read`.

use crate::capture::{AudioDevice, AudioStream};
use crate::chunk::{AudioSample, SAMPLE_RATE};
use crate::error::MonitorError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TARGET_RATE: u32 = SAMPLE_RATE as u32;

/// Callback buffers queued between the audio thread and the producer
const CALLBACK_QUEUE: usize = 64;

/// Longest `read` waits before reporting that no stride is ready
const READ_POLL: Duration = Duration::from_millis(100);

/// An input device as reported by the host
#[derive(Debug, Clone, Serialize)]
pub struct InputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

/// Enumerate input devices in host order
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, MonitorError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| MonitorError::DeviceOpen(format!("Failed to enumerate input devices: {e}")))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            InputDeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            }
        })
        .collect())
}

/// Input device factory used by the capture producer
#[derive(Debug, Default)]
pub struct MicrophoneDevice;

impl MicrophoneDevice {
    pub fn new() -> Self {
        Self
    }
}

fn resolve_device(device_index: Option<usize>) -> Result<cpal::Device, MonitorError> {
    let host = cpal::default_host();

    match device_index {
        Some(index) => host
            .input_devices()
            .map_err(|e| MonitorError::DeviceOpen(format!("Failed to enumerate input devices: {e}")))?
            .nth(index)
            .ok_or_else(|| MonitorError::DeviceOpen(format!("Input device {index} not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| MonitorError::DeviceOpen("No default input device available".to_string())),
    }
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

/// Native 16kHz if any range allows it (fewest channels first), else the default
fn select_config(device: &cpal::Device) -> Result<SupportedStreamConfig, MonitorError> {
    let native = device.supported_input_configs().ok().and_then(|ranges| {
        ranges
            .filter(|r| {
                is_supported_format(r.sample_format())
                    && r.min_sample_rate().0 <= TARGET_RATE
                    && r.max_sample_rate().0 >= TARGET_RATE
            })
            .min_by_key(|r| r.channels())
            .map(|r| r.with_sample_rate(SampleRate(TARGET_RATE)))
    });

    match native {
        Some(config) => Ok(config),
        None => device
            .default_input_config()
            .map_err(|e| MonitorError::DeviceOpen(format!("Failed to get default input config: {e}"))),
    }
}

/// Average interleaved frames to mono, converting each sample to f32
fn downmix<T, F>(out: &mut Vec<AudioSample>, data: &[T], channels: usize, convert: F)
where
    T: Copy,
    F: Fn(T) -> f32,
{
    if channels <= 1 {
        out.extend(data.iter().copied().map(convert));
        return;
    }

    out.extend(
        data.chunks(channels)
            .map(|frame| frame.iter().copied().map(&convert).sum::<f32>() / frame.len() as f32),
    );
}

/// Streaming linear interpolation from `from_rate` to `to_rate`
///
/// Callback buffers are treated as one continuous signal: the fractional
/// read position and the last input sample carry over, so no samples are
/// lost and interpolation does not restart at buffer edges.
struct LinearResampler {
    ratio: f64,
    passthrough: bool,
    /// Next output position, relative to `prev` when it is set
    pos: f64,
    prev: Option<AudioSample>,
}

impl LinearResampler {
    fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            ratio: from_rate as f64 / to_rate.max(1) as f64,
            passthrough: from_rate == to_rate,
            pos: 0.0,
            prev: None,
        }
    }

    fn process(&mut self, input: &[AudioSample], out: &mut Vec<AudioSample>) {
        if self.passthrough {
            out.extend_from_slice(input);
            return;
        }
        let Some(&last) = input.last() else {
            return;
        };

        let prev = self.prev;
        let offset = usize::from(prev.is_some());
        let len = input.len() + offset;
        let sample = |i: usize| match (i, prev) {
            (0, Some(prev)) => prev,
            _ => input[i - offset],
        };

        loop {
            let idx = self.pos.floor() as usize;
            if idx + 1 >= len {
                break;
            }
            let frac = (self.pos - idx as f64) as f32;
            let s0 = sample(idx);
            out.push(s0 + frac * (sample(idx + 1) - s0));
            self.pos += self.ratio;
        }

        // Re-anchor on the last input sample, which becomes index 0
        self.pos -= (len - 1) as f64;
        self.prev = Some(last);
    }
}

/// Runs on the cpal audio thread
struct CallbackForwarder {
    channels: usize,
    resampler: LinearResampler,
    scratch: Vec<AudioSample>,
    tx: Sender<Vec<AudioSample>>,
    dropped: Arc<AtomicUsize>,
}

impl CallbackForwarder {
    fn forward<T, F>(&mut self, data: &[T], convert: F)
    where
        T: Copy,
        F: Fn(T) -> f32,
    {
        self.scratch.clear();
        downmix(&mut self.scratch, data, self.channels, convert);

        let mut mono = Vec::with_capacity(self.scratch.len());
        self.resampler.process(&self.scratch, &mut mono);
        if mono.is_empty() {
            return;
        }

        if let Err(TrySendError::Full(_)) = self.tx.try_send(mono) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl AudioDevice for MicrophoneDevice {
    fn open(&mut self, device_index: Option<usize>) -> Result<Box<dyn AudioStream>, MonitorError> {
        let device = resolve_device(device_index)?;
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());

        let supported = select_config(&device)?;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        let device_rate = config.sample_rate.0;
        let channels = usize::from(config.channels.max(1));

        info!(
            "Opening input device '{}': {:?} {}Hz x{}",
            name, format, device_rate, channels
        );
        if device_rate != TARGET_RATE {
            debug!("Resampling {}Hz -> {}Hz", device_rate, TARGET_RATE);
        }

        let (tx, rx) = bounded(CALLBACK_QUEUE);
        let (err_tx, err_rx) = bounded::<String>(4);
        let dropped = Arc::new(AtomicUsize::new(0));

        let mut forwarder = CallbackForwarder {
            channels,
            resampler: LinearResampler::new(device_rate, TARGET_RATE),
            scratch: Vec::new(),
            tx,
            dropped: dropped.clone(),
        };

        let err_fn = move |err: cpal::StreamError| {
            let _ = err_tx.try_send(err.to_string());
        };

        let stream = match format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| forwarder.forward(data, |s| s),
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    forwarder.forward(data, |s| s as f32 / 32_768.0)
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    forwarder.forward(data, |s| (s as f32 - 32_768.0) / 32_768.0)
                },
                err_fn,
                None,
            ),
            other => {
                return Err(MonitorError::DeviceOpen(format!(
                    "Unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|e| MonitorError::DeviceOpen(format!("Failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| MonitorError::DeviceOpen(format!("Failed to start input stream: {e}")))?;

        Ok(Box::new(MicrophoneStream {
            _stream: stream,
            rx,
            err_rx,
            pending: Vec::new(),
            dropped,
            reported_drops: 0,
        }))
    }
}

/// Open cpal input stream; dropping it closes the device
pub struct MicrophoneStream {
    _stream: cpal::Stream,
    rx: Receiver<Vec<AudioSample>>,
    err_rx: Receiver<String>,
    pending: Vec<AudioSample>,
    dropped: Arc<AtomicUsize>,
    reported_drops: usize,
}

impl MicrophoneStream {
    fn check_errors(&mut self) -> Result<(), MonitorError> {
        match self.err_rx.try_recv() {
            Ok(message) => Err(MonitorError::DeviceIo(message)),
            Err(TryRecvError::Empty) => Ok(()),
            Err(TryRecvError::Disconnected) => Ok(()),
        }
    }

    fn report_drops(&mut self) {
        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > self.reported_drops {
            warn!(
                "Audio callback queue full, {} buffers dropped",
                dropped - self.reported_drops
            );
            self.reported_drops = dropped;
        }
    }
}

impl AudioStream for MicrophoneStream {
    fn read(&mut self, frames: usize) -> Result<Option<Vec<AudioSample>>, MonitorError> {
        self.check_errors()?;
        self.report_drops();

        let deadline = Instant::now() + READ_POLL;
        while self.pending.len() < frames {
            match self.rx.recv_deadline(deadline) {
                Ok(buffer) => self.pending.extend_from_slice(&buffer),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MonitorError::DeviceIo("Input stream closed".to_string()))
                }
            }
        }

        Ok(Some(self.pending.drain(..frames).collect()))
    }
}
