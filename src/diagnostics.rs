//! Environment diagnostics and pipeline status.
//!
//! Verifies that the decoder, the model and the storage are usable before a
//! batch starts, and summarizes where every recording stands.

use crate::audio::codec_available;
use crate::config::Config;
use crate::defaults;
use crate::error::Result;
use crate::ledger::{SessionLedger, Stage};
use crate::store::LocalStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use symphonia::core::codecs::{CODEC_TYPE_AAC, CODEC_TYPE_PCM_S16LE};

/// Result of a dependency check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum CheckResult {
    /// Present and working
    Ok,
    /// Missing
    NotFound,
    /// Present but with issues
    Warning(String),
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckResult::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub result: CheckResult,
    /// What to do about a failed check.
    pub hint: Option<String>,
}

impl Check {
    fn new(name: &'static str, result: CheckResult) -> Self {
        Self {
            name,
            result,
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        if !self.result.is_ok() {
            self.hint = Some(hint.into());
        }
        self
    }
}

fn check_decoder() -> CheckResult {
    match (
        codec_available(CODEC_TYPE_AAC),
        codec_available(CODEC_TYPE_PCM_S16LE),
    ) {
        (true, true) => CheckResult::Ok,
        (false, false) => CheckResult::NotFound,
        (false, true) => CheckResult::Warning("AAC decoder missing; .m4a files will fail".to_string()),
        (true, false) => CheckResult::Warning("PCM decoder missing; .wav files will fail".to_string()),
    }
}

fn check_whisper() -> CheckResult {
    if cfg!(feature = "whisper") {
        CheckResult::Ok
    } else {
        CheckResult::NotFound
    }
}

fn check_model(path: &Path) -> CheckResult {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => CheckResult::Ok,
        Ok(_) => CheckResult::Warning(format!("{} is empty or not a file", path.display())),
        Err(_) => CheckResult::NotFound,
    }
}

/// Create and remove a probe file under the storage root.
fn check_storage(root: &Path) -> CheckResult {
    if let Err(e) = std::fs::create_dir_all(root) {
        return CheckResult::Warning(format!("cannot create {}: {e}", root.display()));
    }
    let probe = root.join(".fieldscribe-write-test");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckResult::Ok
        }
        Err(e) => CheckResult::Warning(format!("{} is not writable: {e}", root.display())),
    }
}

fn check_remote(config: &Config) -> CheckResult {
    match (&config.remote.directory, &config.remote.url) {
        (Some(dir), _) if dir.is_dir() => CheckResult::Ok,
        (Some(dir), _) => CheckResult::Warning(format!("drop folder {} does not exist", dir.display())),
        (None, Some(url)) if cfg!(feature = "remote-http") => {
            tracing::debug!(url, "remote inventory configured");
            CheckResult::Ok
        }
        (None, Some(_)) => {
            CheckResult::Warning("HTTP remote configured but built without remote-http".to_string())
        }
        (None, None) => CheckResult::NotFound,
    }
}

/// Check for an NVIDIA GPU via `nvidia-smi`.
fn check_gpu() -> CheckResult {
    let compiled = defaults::gpu_backend();
    match Command::new("nvidia-smi")
        .arg("--query-gpu=gpu_name")
        .arg("--format=csv,noheader")
        .output()
    {
        Ok(output) if output.status.success() => {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if compiled == "CUDA" {
                CheckResult::Ok
            } else {
                CheckResult::Warning(format!(
                    "{name} found but built for {compiled}; rebuild with --features cuda"
                ))
            }
        }
        _ if compiled == "CPU" => CheckResult::Ok,
        _ => CheckResult::Warning(format!("built for {compiled} but no NVIDIA GPU found")),
    }
}

/// Run every dependency check for `config`.
pub fn check_dependencies(config: &Config) -> Vec<Check> {
    let model = crate::stt::resolve_model_path(&config.transcribe);
    vec![
        Check::new("decoder (symphonia)", check_decoder())
            .with_hint("rebuild with symphonia's aac and pcm features"),
        Check::new("whisper", check_whisper()).with_hint("rebuild with --features whisper"),
        Check::new("model", check_model(&model)).with_hint(format!(
            "fieldscribe models install {}",
            config.transcribe.model
        )),
        Check::new("storage", check_storage(&config.storage.root))
            .with_hint("set storage.root or FIELDSCRIBE_STORAGE to a writable directory"),
        Check::new("remote", check_remote(config))
            .with_hint("set remote.directory or remote.url in the config file"),
        Check::new("gpu", check_gpu()),
    ]
}

/// Print checks the way `fieldscribe check` shows them.
pub fn print_checks(checks: &[Check]) {
    println!("Checking dependencies...\n");
    for check in checks {
        match &check.result {
            CheckResult::Ok => println!("{:<22} ✓ OK", check.name),
            CheckResult::NotFound => println!("{:<22} ✗ NOT FOUND", check.name),
            CheckResult::Warning(msg) => println!("{:<22} ⚠ WARNING: {msg}", check.name),
        }
        if let Some(hint) = &check.hint {
            println!("{:<22}   {hint}", "");
        }
    }
    println!();
    println!("GPU backend: {}", defaults::gpu_backend());
}

/// Where the pipeline stands: checks, stage counts and disk usage.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub checks: Vec<Check>,
    pub stages: BTreeMap<Stage, usize>,
    pub file_count: usize,
    pub total_bytes: u64,
}

impl StatusReport {
    pub fn collect(config: &Config, store: &LocalStore, ledger: &SessionLedger) -> Result<Self> {
        let usage = store.usage()?;
        Ok(Self {
            checks: check_dependencies(config),
            stages: ledger.stage_counts(),
            file_count: usage.file_count,
            total_bytes: usage.total_bytes,
        })
    }

    pub fn ready(&self) -> bool {
        self.checks
            .iter()
            .filter(|c| c.name != "gpu")
            .all(|c| c.result.is_ok())
    }

    pub fn failed_sessions(&self) -> usize {
        self.stages.get(&Stage::Failed).copied().unwrap_or(0)
    }
}
