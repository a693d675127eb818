/// WAV output artifact
///
/// Finished recordings are written as 16-bit PCM mono at the capture rate.
/// Samples are scaled by 32767 on write and divided by 32767 on read, so a
/// round trip is exact to within one quantization step.

use crate::chunk::{AudioSample, SAMPLE_RATE};
use crate::error::MonitorError;
use chrono::{DateTime, Local};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use tracing::debug;

const PCM_SCALE: f32 = 32767.0;

fn spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// File name derived from the activation time, e.g. `cmd_20240131_094512_250.wav`
pub fn command_file_name(captured_at: &DateTime<Local>) -> String {
    format!("cmd_{}.wav", captured_at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Write `samples` to `path` as 16-bit mono PCM
pub fn write_wav(path: &Path, samples: &[AudioSample]) -> Result<(), MonitorError> {
    let mut writer = WavWriter::create(path, spec())?;

    for &sample in samples {
        let pcm = (sample.clamp(-1.0, 1.0) * PCM_SCALE).round() as i16;
        writer.write_sample(pcm)?;
    }

    writer.finalize()?;
    debug!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}

/// Write a recording into `dir`, creating it if needed, and return the path
pub fn save_command(
    dir: &Path,
    samples: &[AudioSample],
    captured_at: &DateTime<Local>,
) -> Result<PathBuf, MonitorError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(command_file_name(captured_at));
    write_wav(&path, samples)?;
    Ok(path)
}

/// Read a WAV file back as normalized samples (first channel only)
pub fn read_wav(path: &Path) -> Result<Vec<AudioSample>, MonitorError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<AudioSample> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = if spec.bits_per_sample == 16 {
                PCM_SCALE
            } else {
                ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32
            };
            reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .step_by(channels)
            .collect::<Result<_, _>>()?,
    };

    Ok(samples)
}

/// Duration of a WAV file in seconds
pub fn wav_duration(path: &Path) -> Result<f64, MonitorError> {
    let reader = WavReader::open(path)?;
    Ok(reader.duration() as f64 / reader.spec().sample_rate as f64)
}
