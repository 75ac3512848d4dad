//! Model download and installation management.
//!
//! Models are stored as `ggml-<name>.bin` in the user's cache directory.

use crate::error::{Result, ScribeError};
use crate::models::catalog::{ModelInfo, get_model, resolve_name};
use std::fs;
use std::path::PathBuf;

#[cfg(feature = "model-download")]
use futures_util::StreamExt;
#[cfg(feature = "model-download")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "model-download")]
use sha1::{Digest, Sha1};
#[cfg(feature = "model-download")]
use std::io::Write;
#[cfg(feature = "model-download")]
use std::path::Path;

/// Directory where models are stored (`~/.cache/fieldscribe/models/` on Linux).
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("fieldscribe")
        .join("models")
}

/// Full path for a model file; the file may not exist.
pub fn model_path(name: &str) -> PathBuf {
    models_dir().join(format!("ggml-{}.bin", resolve_name(name)))
}

pub fn is_model_installed(name: &str) -> bool {
    model_path(name).exists()
}

/// Fetch `url` into `output_path`, verifying SHA-1 when one is published.
#[cfg(feature = "model-download")]
async fn download_to_path(info: &ModelInfo, output_path: &Path, progress: bool) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    tracing::info!(model = info.name, size_mb = info.size_mb, "downloading model");

    let response = reqwest::Client::new()
        .get(info.url())
        .send()
        .await
        .map_err(|e| ScribeError::transient(format!("failed to start model download: {e}")))?;
    if !response.status().is_success() {
        return Err(ScribeError::ResourceUnavailable {
            message: format!("model download returned status {}", response.status()),
        });
    }

    let total_size = response.content_length().unwrap_or(0);
    let pb = if progress {
        let pb = ProgressBar::new(total_size);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    } else {
        None
    };

    // Stream into a temporary name so an interrupted download is never
    // mistaken for an installed model.
    let partial = output_path.with_extension("bin.part");
    let mut hasher = Sha1::new();
    let mut file = fs::File::create(&partial)?;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| ScribeError::transient(format!("failed to read download chunk: {e}")))?;
        file.write_all(&chunk)?;
        hasher.update(&chunk);
        if let Some(ref pb) = pb {
            pb.inc(chunk.len() as u64);
        }
    }
    file.flush()?;
    if let Some(pb) = pb {
        pb.finish_with_message("Downloaded");
    }

    if !info.sha1.is_empty() {
        let calculated = format!("{:x}", hasher.finalize());
        if calculated != info.sha1 {
            if let Err(e) = fs::remove_file(&partial) {
                tracing::warn!(error = %e, "failed to remove corrupted download");
            }
            return Err(ScribeError::validation(format!(
                "SHA-1 checksum mismatch. Expected: {}, got: {calculated}",
                info.sha1
            )));
        }
        tracing::debug!(model = info.name, "checksum verified");
    }

    fs::rename(&partial, output_path)?;
    tracing::info!(path = %output_path.display(), "model installed");
    Ok(())
}

/// Download a catalog model unless it is already installed.
#[cfg(feature = "model-download")]
pub async fn download_model(name: &str, progress: bool) -> Result<PathBuf> {
    let path = model_path(name);
    if path.exists() {
        tracing::debug!(model = name, path = %path.display(), "model already installed");
        return Ok(path);
    }
    let info = get_model(name).ok_or_else(|| unknown_model(name))?;
    download_to_path(info, &path, progress).await?;
    Ok(path)
}

#[cfg(not(feature = "model-download"))]
pub async fn download_model(name: &str, _progress: bool) -> Result<PathBuf> {
    let path = model_path(name);
    if path.exists() {
        return Ok(path);
    }
    get_model(name).ok_or_else(|| unknown_model(name))?;
    Err(ScribeError::ResourceUnavailable {
        message: format!(
            "model '{name}' is not installed and this build cannot download models.\n\
             Place the ggml file at {}",
            path.display()
        ),
    })
}

fn unknown_model(name: &str) -> ScribeError {
    ScribeError::Other(format!(
        "Model '{name}' not found in catalog.\n\
         Run 'fieldscribe models list' to see available models."
    ))
}

/// Every installed `ggml-*.bin`, catalog or not, sorted by name.
pub fn list_installed_models() -> Vec<String> {
    let Ok(entries) = fs::read_dir(models_dir()) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let model = name.to_str()?.strip_prefix("ggml-")?.strip_suffix(".bin")?;
            entry.path().is_file().then(|| model.to_string())
        })
        .collect();
    names.sort();
    names
}

/// Format model information for display.
pub fn format_model_info(model: &ModelInfo) -> String {
    let status = if is_model_installed(model.name) {
        "[installed]"
    } else {
        "[not installed]"
    };
    format!("{:18} {:5} MB   {}", model.name, model.size_mb, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::list_models;

    #[test]
    fn test_models_dir_is_under_fieldscribe() {
        let dir = models_dir();
        assert!(dir.ends_with("fieldscribe/models"));
    }

    #[test]
    fn test_model_path_resolves_alias() {
        let path = model_path("small");
        assert!(path.ends_with("ggml-nb-whisper-small.bin"));
    }

    #[test]
    fn test_model_path_for_unknown_model() {
        assert!(model_path("custom").ends_with("ggml-custom.bin"));
    }

    #[test]
    fn test_is_model_installed_false_for_unknown() {
        assert!(!is_model_installed("nonexistent_model_xyz"));
    }

    #[test]
    fn test_format_model_info_shows_name_size_and_status() {
        let model = &list_models()[0];
        let formatted = format_model_info(model);
        assert!(formatted.contains("nb-whisper-tiny"));
        assert!(formatted.contains("78 MB"));
        assert!(formatted.contains("installed"));
    }

    #[test]
    fn test_list_installed_models_is_sorted() {
        let installed = list_installed_models();
        let mut sorted = installed.clone();
        sorted.sort();
        assert_eq!(installed, sorted);
    }

    #[tokio::test]
    async fn test_download_unknown_model_fails() {
        let err = download_model("definitely-not-a-model", false).await.unwrap_err();
        assert!(err.to_string().contains("not found in catalog"));
    }
}
