//! Default configuration constants for fieldscribe.
//!
//! Shared by the config types, the converter and the chunked transcriber so
//! the canonical audio format and the window geometry have one definition.

/// Canonical sample rate in Hz for converted audio.
///
/// Whisper models (including NB-Whisper) are trained on 16kHz mono input.
pub const SAMPLE_RATE: u32 = 16000;

/// Canonical channel count for converted audio.
pub const CHANNELS: u16 = 1;

/// Canonical bit depth for converted audio.
pub const BITS_PER_SAMPLE: u16 = 16;

/// Length of one transcription window in seconds.
///
/// Whisper's encoder sees at most 30 seconds of audio per pass.
pub const WINDOW_SECS: f64 = 30.0;

/// Overlap between consecutive windows in seconds.
pub const OVERLAP_SECS: f64 = 1.0;

/// Default transcription model name.
pub const DEFAULT_MODEL: &str = "nb-whisper-small";

/// Language forced on the transcription model.
pub const DEFAULT_LANGUAGE: &str = "no";

/// Maximum conversion duration drift in milliseconds.
///
/// Covers container and codec rounding (AAC priming samples, resampler tail).
pub const DURATION_TOLERANCE_MS: u64 = 500;

/// Attempts per download before the file is reported as failed.
pub const DOWNLOAD_RETRIES: u32 = 3;

/// Attempts per transcription window before the session is failed.
pub const WINDOW_RETRIES: u32 = 3;

/// First retry delay; doubled on each further attempt.
pub const RETRY_BACKOFF_MS: u64 = 1000;

/// Concurrent downloads during a sync pass.
pub const SYNC_CONCURRENCY: usize = 4;

/// Concurrent conversions during a batch conversion.
pub const CONVERT_CONCURRENCY: usize = 2;

/// Concurrent transcription workers sharing the model.
pub const TRANSCRIBE_WORKERS: usize = 1;

/// Capacity of the work queue before `submit` waits.
pub const QUEUE_CAPACITY: usize = 64;

/// Original-audio extensions the converter accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["m4a", "mp3", "wav", "flac", "aac", "ogg"];

/// Returns true if `ext` (without dot, any case) is a supported input format.
pub fn is_supported_extension(ext: &str) -> bool {
    let ext = ext.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}

/// Report the GPU backend compiled into this build.
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else {
        "CPU"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_stride_is_window_minus_overlap() {
        assert_eq!(WINDOW_SECS - OVERLAP_SECS, 29.0);
    }

    #[test]
    fn supported_extension_is_case_insensitive() {
        assert!(is_supported_extension("M4A"));
        assert!(is_supported_extension("wav"));
        assert!(!is_supported_extension("txt"));
    }

    #[test]
    fn gpu_backend_matches_compiled_feature() {
        let expected = if cfg!(feature = "cuda") {
            "CUDA"
        } else if cfg!(feature = "vulkan") {
            "Vulkan"
        } else {
            "CPU"
        };
        assert_eq!(gpu_backend(), expected);
    }
}
