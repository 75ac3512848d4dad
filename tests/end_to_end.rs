//! Whole-pipeline scenarios against a directory drop folder and a scripted
//! transcriber.

use fieldscribe::convert::ConvertOptions;
use fieldscribe::ledger::{Segment, Stage};
use fieldscribe::queue::{Job, JobOutcome, WorkQueue};
use fieldscribe::remote::DirectoryInventory;
use fieldscribe::stt::MockTranscriber;
use fieldscribe::sync::SyncOptions;
use fieldscribe::transcribe::TranscribeOptions;
use fieldscribe::{LocalStore, Pipeline, ScribeError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        let env = Self {
            dir: TempDir::new().unwrap(),
        };
        std::fs::create_dir_all(env.remote()).unwrap();
        env
    }

    fn remote(&self) -> PathBuf {
        self.dir.path().join("drop")
    }

    fn store_root(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    fn pipeline(&self, transcriber: Arc<MockTranscriber>, max_retries: u32) -> Pipeline {
        let sync = SyncOptions {
            backoff: Duration::from_millis(1),
            ..SyncOptions::default()
        };
        let transcribe = TranscribeOptions {
            workers: 2,
            max_retries,
            retry_backoff: Duration::from_millis(1),
        };
        Pipeline::open(LocalStore::new(self.store_root()), ConvertOptions::default())
            .unwrap()
            .with_remote(Arc::new(DirectoryInventory::new(self.remote(), false)), sync)
            .with_transcriber(transcriber, transcribe)
    }
}

/// 16-bit PCM sine at `rate` Hz with `channels` channels.
fn write_wav(path: &Path, rate: u32, channels: u16, seconds: f64) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (rate as f64 * seconds).round() as usize;
    for i in 0..frames {
        let t = i as f64 / rate as f64;
        let s = ((t * 220.0 * std::f64::consts::TAU).sin() * 6000.0) as i16;
        for _ in 0..channels {
            writer.write_sample(s).unwrap();
        }
    }
    writer.finalize().unwrap();
}

fn seg(start: f64, end: f64, text: &str) -> Segment {
    Segment {
        start,
        end,
        text: text.to_string(),
        confidence: 0.8,
    }
}

#[tokio::test]
async fn ninety_five_second_recording_end_to_end() {
    let env = Env::new();
    write_wav(&env.remote().join("tur.wav"), 16_000, 1, 95.0);
    let mock = Arc::new(
        MockTranscriber::new("nb-whisper-small")
            .with_window(vec![seg(0.0, 29.5, "vi gikk langs elva"), seg(29.5, 30.0, "mot brua")])
            .with_window(vec![seg(0.0, 1.2, "mot brua og"), seg(1.2, 30.0, "videre opp")])
            .with_window(vec![seg(0.0, 1.0, "opp"), seg(1.0, 30.0, "til fjellet")])
            .with_window(vec![seg(0.0, 1.5, "fjellet i dag"), seg(1.5, 8.0, "slutt")]),
    );
    let pipeline = env.pipeline(mock.clone(), 1);

    let synced = pipeline.sync().await.unwrap();
    assert_eq!(synced.downloads.downloaded, vec!["tur".to_string()]);
    assert!(pipeline.convert("tur").await.success);

    let transcript = pipeline.transcribe("tur").await.unwrap();
    assert_eq!(mock.calls(), 4);
    assert_eq!(transcript.windows, 4);
    assert_eq!(
        transcript.full_text,
        "vi gikk langs elva mot brua og videre opp til fjellet i dag slutt"
    );
    assert_eq!(transcript.segments.last().unwrap().end, 95.0);
    for pair in transcript.segments.windows(2) {
        assert!(pair[1].start >= pair[0].end);
    }
    assert!(env.store_root().join("transcripts/tur.json").is_file());

    // idempotent: same object, no extra model calls
    let again = pipeline.transcribe("tur").await.unwrap();
    assert!(Arc::ptr_eq(&transcript, &again));
    assert_eq!(mock.calls(), 4);
}

#[tokio::test]
async fn short_recording_has_one_window_within_duration() {
    let env = Env::new();
    write_wav(&env.remote().join("kort.wav"), 44_100, 2, 12.0);
    let mock = Arc::new(MockTranscriber::new("m"));
    let pipeline = env.pipeline(mock.clone(), 1);

    pipeline.sync().await.unwrap();
    let transcript = pipeline.process("kort").await.unwrap();

    assert_eq!(transcript.windows, 1);
    assert_eq!(mock.calls(), 1);
    assert!(transcript.segments.iter().all(|s| s.end <= 12.0 + 1e-9));
    assert!((transcript.audio_duration_secs - 12.0).abs() < 0.01);
}

#[tokio::test]
async fn converted_duration_matches_source() {
    let env = Env::new();
    write_wav(&env.remote().join("lang.wav"), 48_000, 2, 61.3);
    let pipeline = env.pipeline(Arc::new(MockTranscriber::new("m")), 1);

    pipeline.sync().await.unwrap();
    let result = pipeline.convert("lang").await;

    assert!(result.success, "{:?}", result.error);
    assert!(result.duration_ms.abs_diff(61_300) <= 500);
    let reader = hound::WavReader::open(result.converted_path.unwrap()).unwrap();
    assert_eq!(reader.spec().sample_rate, 16_000);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.spec().bits_per_sample, 16);
}

#[tokio::test]
async fn sync_reconciles_partial_and_missing_files() {
    let env = Env::new();
    for (id, secs) in [("A", 3.0), ("B", 6.0), ("C", 1.5)] {
        write_wav(&env.remote().join(format!("{id}.wav")), 16_000, 1, secs);
    }
    let originals = env.store_root().join("originals");
    std::fs::create_dir_all(&originals).unwrap();
    std::fs::copy(env.remote().join("A.wav"), originals.join("A.wav")).unwrap();
    let c = std::fs::read(env.remote().join("C.wav")).unwrap();
    std::fs::write(originals.join("C.wav"), &c[..c.len() * 3 / 5]).unwrap();

    let pipeline = env.pipeline(Arc::new(MockTranscriber::new("m")), 1);
    let synchronizer = pipeline.synchronizer().unwrap();

    let report = synchronizer.reconcile().await.unwrap();
    assert_eq!(report.present, vec!["A".to_string()]);
    assert_eq!(
        report.missing.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
        vec!["B"]
    );
    assert_eq!(
        report.size_mismatch.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
        vec!["C"]
    );

    let downloads = synchronizer.download_missing().await.unwrap();
    assert!(downloads.failed.is_empty(), "{:?}", downloads.failed);
    assert_eq!(synchronizer.reconcile().await.unwrap().present.len(), 3);
    assert_eq!(std::fs::read(originals.join("C.wav")).unwrap(), c);
}

#[tokio::test]
async fn failed_transcription_retries_at_transcribing() {
    let env = Env::new();
    write_wav(&env.remote().join("feil.wav"), 16_000, 1, 40.0);
    {
        let failing = Arc::new(MockTranscriber::new("m").failing_from_call(1));
        let pipeline = env.pipeline(failing, 0);
        pipeline.sync().await.unwrap();
        let err = pipeline.process("feil").await.unwrap_err();
        assert!(matches!(err, ScribeError::WindowFailed { window: 1, .. }));
    }

    let converted = env.store_root().join("converted/feil.wav");
    let before = std::fs::read(&converted).unwrap();

    // a fresh process sees the failure on disk
    let healthy = Arc::new(MockTranscriber::new("m"));
    let pipeline = env.pipeline(healthy.clone(), 0);
    let status = pipeline.ledger().get_status("feil").unwrap();
    assert_eq!(status.stage, Stage::Failed);
    assert_eq!(status.failed_at, Some(Stage::Transcribing));
    assert_eq!(status.failed_window, Some(1));

    let resumed = pipeline.ledger().retry("feil").unwrap();
    assert_eq!(resumed.stage, Stage::Transcribing);
    assert_eq!(std::fs::read(&converted).unwrap(), before);

    let transcript = pipeline.transcribe("feil").await.unwrap();
    assert_eq!(transcript.windows, 2);
    assert_eq!(healthy.calls(), 2);
    assert_eq!(pipeline.ledger().get("feil").unwrap().stage, Stage::Complete);
}

#[tokio::test]
async fn one_bad_file_does_not_stop_the_batch() {
    let env = Env::new();
    write_wav(&env.remote().join("god.wav"), 22_050, 1, 2.0);
    std::fs::write(env.remote().join("rar.wav"), b"RIFF\x24\x00\x00\x00WAVEjunkjunkjunk").unwrap();
    let pipeline = Arc::new(env.pipeline(Arc::new(MockTranscriber::new("m")), 1));
    let queue = WorkQueue::start(pipeline.clone(), 2, 8);

    queue.submit(Job::Sync).await.unwrap().wait().await.unwrap();
    let outcome = queue.submit(Job::ConvertAll).await.unwrap().wait().await.unwrap();
    let JobOutcome::ConvertedAll(results) = outcome else {
        panic!("unexpected outcome: {outcome:?}");
    };
    assert_eq!(results.len(), 2);
    assert!(results.iter().find(|r| r.file_id == "god").unwrap().success);
    assert!(!results.iter().find(|r| r.file_id == "rar").unwrap().success);

    let bad = pipeline.ledger().get("rar").unwrap();
    assert_eq!(bad.stage, Stage::Downloaded);
    assert!(bad.error.is_some());
    assert_eq!(pipeline.transcription_candidates(), vec!["god".to_string()]);

    let outcome = queue
        .submit(Job::Transcribe("god".into()))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(outcome.is_success());
    queue.shutdown().await;
}

#[tokio::test]
async fn interrupted_conversion_is_recovered_on_restart() {
    let env = Env::new();
    write_wav(&env.remote().join("avbrutt.wav"), 16_000, 1, 1.0);
    {
        let pipeline = env.pipeline(Arc::new(MockTranscriber::new("m")), 1);
        pipeline.sync().await.unwrap();
        pipeline
            .ledger()
            .advance("avbrutt", Stage::Converting, None)
            .unwrap();
        // dropped mid-stage, as after a crash
    }

    let pipeline = env.pipeline(Arc::new(MockTranscriber::new("m")), 1);
    let session = pipeline.ledger().get("avbrutt").unwrap();
    assert_eq!(session.stage, Stage::Failed);
    assert_eq!(session.failed_at, Some(Stage::Converting));
    assert_eq!(session.error.as_deref(), Some("interrupted"));

    pipeline.ledger().retry("avbrutt").unwrap();
    assert!(pipeline.convert("avbrutt").await.success);
    assert_eq!(pipeline.ledger().get("avbrutt").unwrap().stage, Stage::Converted);
}
