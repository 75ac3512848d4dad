//! NB-Whisper model management.

pub mod catalog;
pub mod download;

pub use catalog::{ModelInfo, default_model, get_model, list_models};
pub use download::{download_model, is_model_installed, model_path, models_dir};
