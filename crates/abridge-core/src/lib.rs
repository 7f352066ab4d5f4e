//! Abridge Core - Text Summarisation Runtime
//!
//! This crate runs `facebook/bart-large-cnn` natively on candle and exposes a
//! summarisation service that HTTP and CLI front-ends share.
//!
//! # Architecture
//!
//! - [`model`] resolves checkpoint files through the HuggingFace Hub
//! - [`models`] holds the BART encoder-decoder, device selection and the
//!   load-once model registry
//! - [`generation`] implements beam search and its logits processors
//! - [`runtime`] schedules requests onto blocking threads and tracks status
//!
//! # Example
//!
//! ```ignore
//! use abridge_core::{EngineConfig, SummaryEngine};
//!
//! let engine = SummaryEngine::new(EngineConfig::from_env()?)?;
//! let result = engine.summarise(article, 150, 50).await?;
//! println!("{}", result.summary);
//! ```

pub mod config;
pub mod error;
pub mod generation;
pub mod model;
pub mod models;
pub mod runtime;
pub mod summariser;
pub mod tokenizer;

pub use config::{EngineConfig, ServerConfig};
pub use error::{Error, Result};
pub use generation::GenerationParams;
pub use model::{ModelDownloader, ModelFiles, MODEL_ID};
pub use models::{DeviceKind, DeviceProfile, DeviceSelector, ModelLoader, ModelRegistry};
pub use runtime::{JobStatus, ModelLoadingStatus, ServiceStatus, SummaryEngine};
pub use summariser::{
    word_count, JobStage, Summariser, SummaryModel, SummaryResult, DEFAULT_MAX_LENGTH,
    DEFAULT_MIN_LENGTH,
};
