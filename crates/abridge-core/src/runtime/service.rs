//! Runtime service orchestrator.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::MODEL_ID;
use crate::models::registry::{LoadProgress, ModelLoader, ModelRegistry};
use crate::models::{DeviceKind, DeviceSelector};
use crate::runtime::loader::BartLoader;
use crate::runtime::status::{ServiceStatus, StatusTracker};
use crate::summariser::{word_count, Summariser, SummaryModel, SummaryResult};

/// Main summarisation runtime shared by every request.
pub struct SummaryEngine {
    config: EngineConfig,
    device: DeviceKind,
    registry: ModelRegistry,
    status: Arc<StatusTracker>,
    permits: Semaphore,
}

impl SummaryEngine {
    /// Create an engine backed by the native BART checkpoint.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let device = DeviceSelector::detect_with_preference(config.device.as_deref())?;
        let kind = device.kind;
        let loader = Arc::new(BartLoader::new(config.clone(), device));
        Self::with_loader(config, kind, loader)
    }

    /// Create an engine around any model loader.
    pub fn with_loader(
        config: EngineConfig,
        device: DeviceKind,
        loader: Arc<dyn ModelLoader>,
    ) -> Result<Self> {
        config.validate()?;
        let permits = Semaphore::new(config.max_concurrent);
        Ok(Self {
            config,
            device,
            registry: ModelRegistry::new(loader),
            status: Arc::new(StatusTracker::new()),
            permits,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Load the shared model if it is not resident yet.
    pub async fn load_model(&self) -> Result<Arc<dyn SummaryModel>> {
        if let Some(model) = self.registry.get().await {
            return Ok(model);
        }

        let tracker = self.status.clone();
        let progress: Arc<LoadProgress> =
            Arc::new(move |step: &str, fraction: f32| tracker.loading_step(step, fraction));

        let result = self.registry.load(progress).await;
        self.status.loading_finished();
        if let Err(e) = &result {
            warn!("Model load failed: {}", e);
        }
        result
    }

    pub async fn unload_model(&self) -> bool {
        self.registry.unload().await
    }

    pub async fn is_model_loaded(&self) -> bool {
        self.registry.is_loaded().await
    }

    /// Summarise `text` within `[min_length, max_length]` decoder tokens.
    pub async fn summarise(
        &self,
        text: String,
        max_length: usize,
        min_length: usize,
    ) -> Result<SummaryResult> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::InferenceError(e.to_string()))?;

        let model = self.load_model().await?;
        let job = self.status.start_job(word_count(&text));
        debug!(
            "Summarising {} chars (max_length={}, min_length={})",
            text.chars().count(),
            max_length,
            min_length
        );

        let tracker = self.status.clone();
        let result = tokio::task::spawn_blocking(move || {
            let summariser = Summariser::new(model);
            summariser.summarise(&text, max_length, min_length, &mut |stage, fraction| {
                tracker.update_job(job, stage, fraction)
            })
        })
        .await
        .map_err(|e| Error::InferenceError(format!("Summarisation task failed: {e}")))
        .and_then(|result| result);

        self.status.finish_job(job);
        if let Err(e) = &result {
            warn!("Summarisation failed: {}", e);
        }
        result
    }

    pub async fn status(&self) -> ServiceStatus {
        let model = self.registry.get().await;
        let device = model.as_ref().map(|m| m.device()).unwrap_or(self.device);
        ServiceStatus {
            model_loading: self.status.loading(),
            current_job: self.status.current_job(),
            device: device.to_string(),
            model: model
                .as_ref()
                .map(|m| m.name().to_string())
                .unwrap_or_else(|| MODEL_ID.to_string()),
            model_loaded: model.is_some(),
        }
    }

    /// Load the model up front when configured to.
    pub async fn preload(&self) -> Result<()> {
        if self.config.preload {
            info!("Preloading {}", MODEL_ID);
            self.load_model().await?;
        }
        Ok(())
    }
}
