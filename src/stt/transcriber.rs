use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, ScribeError};
use crate::ledger::Segment;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Output of one model call over one window.
///
/// Segment times are relative to the start of the window, in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowTranscription {
    pub segments: Vec<Segment>,
    pub inference_ms: u64,
}

impl WindowTranscription {
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (real Whisper vs mock).
pub trait Transcriber: Send + Sync {
    /// Transcribe one window of 16 kHz mono samples in `[-1.0, 1.0]`.
    fn transcribe(&self, audio: &[f32]) -> Result<WindowTranscription>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;

    /// Language code the model is forced to.
    fn language(&self) -> &str;

    /// Check if the transcriber is ready
    fn is_ready(&self) -> bool;
}

impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[f32]) -> Result<WindowTranscription> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn language(&self) -> &str {
        (**self).language()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

/// Mock transcriber for testing.
///
/// Without a script every call yields one segment spanning the whole window.
/// Scripted windows are handed out in call order.
#[derive(Debug)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    script: Mutex<VecDeque<Vec<Segment>>>,
    transient_failures: AtomicUsize,
    fail_from_call: Option<usize>,
    calls: AtomicUsize,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            script: Mutex::new(VecDeque::new()),
            transient_failures: AtomicUsize::new(0),
            fail_from_call: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Queue the segments returned by the next successful call.
    pub fn with_window(self, segments: Vec<Segment>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push_back(segments);
        self
    }

    /// Fail the first `count` calls with a transient error.
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Fail every call from the `call`-th (zero based) onward.
    pub fn failing_from_call(mut self, call: usize) -> Self {
        self.fail_from_call = Some(call);
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(self) -> Self {
        self.failing_from_call(0)
    }

    /// Number of `transcribe` calls so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, audio: &[f32]) -> Result<WindowTranscription> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_from_call.is_some_and(|from| call >= from) {
            return Err(ScribeError::transient("mock transcription failure"));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ScribeError::transient("mock transient failure"));
        }

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        let segments = scripted.unwrap_or_else(|| {
            vec![Segment {
                start: 0.0,
                end: audio.len() as f64 / SAMPLE_RATE as f64,
                text: self.response.clone(),
                confidence: 0.9,
            }]
        });

        Ok(WindowTranscription {
            segments,
            inference_ms: 1,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn language(&self) -> &str {
        crate::defaults::DEFAULT_LANGUAGE
    }

    fn is_ready(&self) -> bool {
        self.fail_from_call != Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_string(),
            confidence: 1.0,
        }
    }

    #[test]
    fn test_mock_transcriber_spans_window() {
        let transcriber = MockTranscriber::new("test-model").with_response("hei og hå");

        let result = transcriber.transcribe(&vec![0.0; 32_000]).unwrap();

        assert_eq!(result.segments.len(), 1);
        assert_eq!(result.segments[0].end, 2.0);
        assert_eq!(result.text(), "hei og hå");
    }

    #[test]
    fn test_mock_transcriber_follows_script_then_default() {
        let transcriber = MockTranscriber::new("m")
            .with_window(vec![seg(0.0, 1.0, "en"), seg(1.0, 2.0, "to")])
            .with_window(vec![]);

        assert_eq!(transcriber.transcribe(&[0.0; 10]).unwrap().text(), "en to");
        assert!(transcriber.transcribe(&[0.0; 10]).unwrap().segments.is_empty());
        assert_eq!(
            transcriber.transcribe(&[0.0; 10]).unwrap().text(),
            "mock transcription"
        );
        assert_eq!(transcriber.calls(), 3);
    }

    #[test]
    fn test_mock_transcriber_transient_failures_then_success() {
        let transcriber = MockTranscriber::new("m").with_transient_failures(2);
        let first = transcriber.transcribe(&[0.0; 10]).unwrap_err();
        assert!(first.is_retryable());
        assert!(transcriber.transcribe(&[0.0; 10]).is_err());
        assert!(transcriber.transcribe(&[0.0; 10]).is_ok());
    }

    #[test]
    fn test_mock_transcriber_fails_from_call() {
        let transcriber = MockTranscriber::new("m").failing_from_call(1);
        assert!(transcriber.transcribe(&[0.0; 10]).is_ok());
        assert!(transcriber.transcribe(&[0.0; 10]).is_err());
        assert!(transcriber.transcribe(&[0.0; 10]).is_err());
    }

    #[test]
    fn test_mock_transcriber_is_ready() {
        assert!(MockTranscriber::new("m").is_ready());
        assert!(!MockTranscriber::new("m").with_failure().is_ready());
    }

    #[test]
    fn test_arc_transcriber_delegates() {
        let transcriber: Arc<dyn Transcriber> = Arc::new(MockTranscriber::new("nb-whisper-small"));
        assert_eq!(transcriber.model_name(), "nb-whisper-small");
        assert_eq!(transcriber.language(), "no");
    }
}
