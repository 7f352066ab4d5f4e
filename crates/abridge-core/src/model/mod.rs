//! Model identity and local file management

pub mod download;

pub use download::{ModelDownloader, ModelFiles};

/// HuggingFace repository of the summarisation checkpoint.
pub const MODEL_ID: &str = "facebook/bart-large-cnn";

/// Files the runtime cannot start without.
pub const REQUIRED_FILES: &[&str] = &["config.json", "model.safetensors"];

/// Either `tokenizer.json` or the `vocab.json` + `merges.txt` pair must be present.
pub const TOKENIZER_FILES: &[&str] = &["tokenizer.json", "vocab.json", "merges.txt"];

/// Files fetched when available; their absence only degrades defaults.
pub const OPTIONAL_FILES: &[&str] = &["tokenizer_config.json", "generation_config.json"];
