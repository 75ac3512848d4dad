//! Stitching per-window segments into one transcript.
//!
//! Windows overlap by a second, so the model hears the seam twice. The
//! earlier window keeps the overlap: later segments that end inside it are
//! dropped, a segment straddling it is trimmed to start where the previous
//! one ended, and words it repeats from the tail of the retained text are
//! removed.

use crate::ledger::Segment;

/// Longest run of repeated boundary words that is removed.
const MAX_BOUNDARY_WORDS: usize = 8;

/// Single repeated words shorter than this are kept ("i", "å").
const MIN_SINGLE_WORD_LEN: usize = 2;

/// Strips Whisper non-speech annotations such as `[MUSIC]`, `(inaudible)`
/// or `*latter*`.
///
/// Unmatched opening delimiters are kept as-is.
pub fn clean_transcription(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        let close = match ch {
            '[' => ']',
            '(' => ')',
            '*' => '*',
            _ => {
                result.push(ch);
                continue;
            }
        };
        let mut inner = String::new();
        let mut closed = false;
        while let Some(&next) = chars.peek() {
            chars.next();
            if next == close {
                closed = true;
                break;
            }
            inner.push(next);
        }
        if !closed {
            result.push(ch);
            result.push_str(&inner);
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lower-cased alphanumerics of a word, for boundary comparison.
fn normalize(word: &str) -> String {
    word.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Remove the leading words of `text` that repeat the end of `tail`.
fn drop_repeated_prefix(tail: &[String], text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let normalized: Vec<String> = words.iter().map(|w| normalize(w)).collect();
    let max = MAX_BOUNDARY_WORDS.min(tail.len()).min(words.len());

    let repeated = (1..=max).rev().find(|&k| {
        let tail_words = &tail[tail.len() - k..];
        let head_words = &normalized[..k];
        let long_enough = k > 1 || head_words[0].chars().count() >= MIN_SINGLE_WORD_LEN;
        long_enough
            && head_words.iter().all(|w| !w.is_empty())
            && tail_words == head_words
    });

    words[repeated.unwrap_or(0)..].join(" ")
}

/// Normalized words at the end of the retained segments.
fn tail_words(merged: &[Segment]) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for segment in merged.iter().rev() {
        let mut segment_words: Vec<String> =
            segment.text.split_whitespace().map(normalize).collect();
        segment_words.append(&mut words);
        words = segment_words;
        if words.len() >= MAX_BOUNDARY_WORDS {
            break;
        }
    }
    let skip = words.len().saturating_sub(MAX_BOUNDARY_WORDS);
    words.split_off(skip)
}

/// Merge absolute-time segments of consecutive windows.
///
/// `chunks` must be in window order. The result is time-ordered, free of
/// overlaps, stripped of annotation markers, and clamped to
/// `[0, duration_secs]`.
pub fn merge(chunks: &[Vec<Segment>], duration_secs: f64) -> Vec<Segment> {
    let duration = duration_secs.max(0.0);
    let mut merged: Vec<Segment> = Vec::new();

    for chunk in chunks {
        let mut ordered: Vec<&Segment> = chunk.iter().collect();
        ordered.sort_by(|a, b| a.start.total_cmp(&b.start));

        for segment in ordered {
            let mut segment = segment.clone();
            segment.text = clean_transcription(&segment.text);
            segment.start = segment.start.clamp(0.0, duration);
            segment.end = segment.end.clamp(segment.start, duration);

            if let Some(prev_end) = merged.last().map(|s| s.end) {
                if segment.end <= prev_end {
                    continue;
                }
                if segment.start < prev_end {
                    segment.start = prev_end;
                    segment.text = drop_repeated_prefix(&tail_words(&merged), &segment.text);
                }
            }

            if segment.text.is_empty() {
                continue;
            }
            merged.push(segment);
        }
    }

    merged
}

/// Segment texts joined in order.
pub fn full_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
