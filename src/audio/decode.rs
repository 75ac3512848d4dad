//! Container/codec decoding via symphonia.

use crate::error::{Result, ScribeError};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecType, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Mono PCM decoded from a source file, at the source's own rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub source_channels: usize,
}

impl DecodedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Whether the compiled-in codec registry can decode `codec`.
pub fn codec_available(codec: CodecType) -> bool {
    symphonia::default::get_codecs().get_codec(codec).is_some()
}

fn unreadable(path: &Path, e: impl std::fmt::Display) -> ScribeError {
    ScribeError::validation(format!("cannot decode {}: {e}", path.display()))
}

/// Decode the first audio track of `path`, down-mixing to mono.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| unreadable(path, e))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| unreadable(path, "no audio track"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unreadable(path, e))?;

    let mut samples = Vec::new();
    let mut channels = 0usize;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // Chained streams are not followed; treat a reset as the end.
            Err(SymphoniaError::ResetRequired) => break,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::IoError(e)) => {
                return Err(ScribeError::transient(format!(
                    "read {}: {e}",
                    path.display()
                )));
            }
            Err(e) => return Err(unreadable(path, e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                channels = spec.channels.count().max(1);
                if sample_rate == 0 {
                    sample_rate = spec.rate;
                }
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend(super::wav::downmix(buf.samples(), channels));
            }
            // A damaged packet is skipped; the duration check catches real loss.
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!(path = %path.display(), error = e, "skipping undecodable packet");
            }
            Err(SymphoniaError::IoError(_)) => continue,
            Err(e) => return Err(unreadable(path, e)),
        }
    }

    if sample_rate == 0 {
        return Err(unreadable(path, "unknown sample rate"));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        source_channels: channels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::fixtures;
    use symphonia::core::codecs::{CODEC_TYPE_AAC, CODEC_TYPE_PCM_S16LE};
    use tempfile::TempDir;

    #[test]
    fn decodes_stereo_wav_to_mono() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("in.wav");
        fixtures::write_tone(&path, 44_100, 2, 1.5);

        let decoded = decode_file(&path).unwrap();
        assert_eq!(decoded.sample_rate, 44_100);
        assert_eq!(decoded.source_channels, 2);
        assert_eq!(decoded.samples.len(), 66_150);
        assert_eq!(decoded.duration_ms(), 1500);
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.m4a");
        std::fs::write(&path, b"definitely not audio").unwrap();

        let err = decode_file(&path).unwrap_err();
        assert!(matches!(err, ScribeError::Validation { .. }), "{err}");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = decode_file(Path::new("/nonexistent/a.wav")).unwrap_err();
        assert!(matches!(err, ScribeError::Io(_)));
    }

    #[test]
    fn registry_has_field_recorder_codecs() {
        assert!(codec_available(CODEC_TYPE_PCM_S16LE));
        assert!(codec_available(CODEC_TYPE_AAC));
    }
}
