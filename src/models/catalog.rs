//! NB-Whisper model catalog.
//!
//! The National Library of Norway publishes Norwegian fine-tunes of Whisper
//! with ggml weights alongside the PyTorch checkpoints.

/// Metadata for an NB-Whisper model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Model identifier, e.g. "nb-whisper-small"
    pub name: &'static str,
    /// HuggingFace repository holding the weights
    pub repo: &'static str,
    /// Approximate download size in megabytes
    pub size_mb: u32,
    /// SHA-1 of the ggml file; empty when unpublished
    pub sha1: &'static str,
}

impl ModelInfo {
    /// Download URL of the ggml weights.
    pub fn url(&self) -> String {
        format!("https://huggingface.co/{}/resolve/main/ggml-model.bin", self.repo)
    }
}

pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "nb-whisper-tiny",
        repo: "NbAiLab/nb-whisper-tiny",
        size_mb: 78,
        sha1: "",
    },
    ModelInfo {
        name: "nb-whisper-base",
        repo: "NbAiLab/nb-whisper-base",
        size_mb: 148,
        sha1: "",
    },
    ModelInfo {
        name: "nb-whisper-small",
        repo: "NbAiLab/nb-whisper-small",
        size_mb: 488,
        sha1: "",
    },
    ModelInfo {
        name: "nb-whisper-medium",
        repo: "NbAiLab/nb-whisper-medium",
        size_mb: 1530,
        sha1: "",
    },
    ModelInfo {
        name: "nb-whisper-large",
        repo: "NbAiLab/nb-whisper-large",
        size_mb: 3100,
        sha1: "",
    },
];

/// Accept the bare size as shorthand: `small` -> `nb-whisper-small`.
pub fn resolve_name(name: &str) -> String {
    if MODELS.iter().any(|m| m.name.strip_prefix("nb-whisper-") == Some(name)) {
        format!("nb-whisper-{name}")
    } else {
        name.to_string()
    }
}

pub fn get_model(name: &str) -> Option<&'static ModelInfo> {
    let resolved = resolve_name(name);
    MODELS.iter().find(|m| m.name == resolved)
}

pub fn list_models() -> &'static [ModelInfo] {
    MODELS
}

/// `nb-whisper-small`, the model the pipeline was tuned with.
pub fn default_model() -> &'static ModelInfo {
    get_model(crate::defaults::DEFAULT_MODEL).unwrap_or(&MODELS[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_model_exists() {
        let model = get_model("nb-whisper-tiny").unwrap();
        assert_eq!(model.size_mb, 78);
        assert_eq!(model.repo, "NbAiLab/nb-whisper-tiny");
    }

    #[test]
    fn test_get_model_by_size_alias() {
        assert_eq!(get_model("medium").unwrap().name, "nb-whisper-medium");
        assert_eq!(resolve_name("large"), "nb-whisper-large");
        assert_eq!(resolve_name("custom-model"), "custom-model");
    }

    #[test]
    fn test_get_model_not_found() {
        assert!(get_model("nonexistent").is_none());
    }

    #[test]
    fn test_default_model_is_small() {
        assert_eq!(default_model().name, "nb-whisper-small");
    }

    #[test]
    fn test_all_models_have_huggingface_url() {
        for model in list_models() {
            let url = model.url();
            assert!(url.starts_with("https://huggingface.co/NbAiLab/"), "{url}");
            assert!(url.ends_with("/ggml-model.bin"), "{url}");
        }
    }
}
