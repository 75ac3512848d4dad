//! Canonical WAV files: 16 kHz, mono, 16-bit PCM.

use crate::defaults::{BITS_PER_SAMPLE, CHANNELS, SAMPLE_RATE};
use crate::error::{Result, ScribeError};
use std::path::Path;

fn canonical_spec() -> hound::WavSpec {
    hound::WavSpec {
        channels: CHANNELS,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: BITS_PER_SAMPLE,
        sample_format: hound::SampleFormat::Int,
    }
}

fn wav_error(path: &Path, e: hound::Error) -> ScribeError {
    match e {
        hound::Error::IoError(io) => ScribeError::Io(io),
        other => ScribeError::validation(format!("bad WAV {}: {other}", path.display())),
    }
}

/// Average interleaved frames into one channel.
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).round() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

/// Write mono 16 kHz samples as a canonical WAV file.
pub fn write_canonical(path: &Path, samples: &[f32]) -> Result<()> {
    let mut writer =
        hound::WavWriter::create(path, canonical_spec()).map_err(|e| wav_error(path, e))?;
    for &s in samples {
        let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer.write_sample(pcm).map_err(|e| wav_error(path, e))?;
    }
    writer.finalize().map_err(|e| wav_error(path, e))?;
    Ok(())
}

/// Duration from the WAV header alone.
pub fn duration_ms(path: &Path) -> Result<u64> {
    let reader = hound::WavReader::open(path).map_err(|e| wav_error(path, e))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err(ScribeError::validation(format!(
            "bad WAV {}: zero sample rate",
            path.display()
        )));
    }
    Ok(reader.duration() as u64 * 1000 / spec.sample_rate as u64)
}

/// Read a WAV file as mono 16 kHz `f32` samples, converting if needed.
pub fn read_mono_16k(path: &Path) -> Result<Vec<f32>> {
    let mut reader = hound::WavReader::open(path).map_err(|e| wav_error(path, e))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| wav_error(path, e))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| wav_error(path, e))?,
    };

    let mono = downmix(&interleaved, spec.channels as usize);
    Ok(resample(&mono, spec.sample_rate, SAMPLE_RATE))
}
