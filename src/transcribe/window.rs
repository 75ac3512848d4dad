//! Fixed-length overlapping analysis windows.

use crate::defaults::{OVERLAP_SECS, SAMPLE_RATE, WINDOW_SECS};

/// One analysis window, `[start, end)` in seconds of the source audio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

impl Window {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Sample range of this window in a 16 kHz buffer of `len` samples.
    pub fn sample_range(&self, len: usize) -> std::ops::Range<usize> {
        let to_sample = |secs: f64| ((secs * SAMPLE_RATE as f64).round() as usize).min(len);
        to_sample(self.start)..to_sample(self.end)
    }
}

/// Split `duration_secs` into 30 s windows that overlap by 1 s.
///
/// Window `i` covers `[i * 29, min(i * 29 + 30, duration))`. Audio of 30 s
/// or less yields a single window; zero (or invalid) duration yields one
/// zero-length window.
pub fn plan_windows(duration_secs: f64) -> Vec<Window> {
    plan_windows_with(duration_secs, WINDOW_SECS, OVERLAP_SECS)
}

pub fn plan_windows_with(duration_secs: f64, window_secs: f64, overlap_secs: f64) -> Vec<Window> {
    let duration = if duration_secs.is_finite() {
        duration_secs.max(0.0)
    } else {
        0.0
    };
    let stride = (window_secs - overlap_secs).max(f64::EPSILON);

    let mut windows = Vec::new();
    loop {
        let index = windows.len();
        let start = index as f64 * stride;
        let end = (start + window_secs).min(duration);
        windows.push(Window { index, start, end });
        if end >= duration {
            return windows;
        }
    }
}
