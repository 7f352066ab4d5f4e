//! Model registry to ensure the summarisation model is loaded once and shared.

use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};
use tracing::info;

use crate::error::{Error, Result};
use crate::summariser::SummaryModel;

/// Callback receiving a loading step label and a completion fraction.
pub type LoadProgress = dyn Fn(&str, f32) + Send + Sync;

/// Produces a ready model. Called on a blocking thread.
pub trait ModelLoader: Send + Sync {
    fn load(&self, progress: &LoadProgress) -> Result<Arc<dyn SummaryModel>>;
}

type ModelCell = Arc<OnceCell<Arc<dyn SummaryModel>>>;

pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    model: RwLock<ModelCell>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            model: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    /// Return the shared model, loading it on first use.
    ///
    /// Concurrent callers wait on the same load. A failed load leaves the
    /// registry empty so the next call retries.
    pub async fn load(&self, progress: Arc<LoadProgress>) -> Result<Arc<dyn SummaryModel>> {
        let cell = self.model.read().await.clone();

        let model = cell
            .get_or_try_init({
                let loader = self.loader.clone();
                move || async move {
                    info!("Loading summarisation model");
                    tokio::task::spawn_blocking(move || loader.load(progress.as_ref()))
                        .await
                        .map_err(|e| Error::ModelLoadError(e.to_string()))?
                }
            })
            .await?;

        Ok(model.clone())
    }

    pub async fn get(&self) -> Option<Arc<dyn SummaryModel>> {
        self.model.read().await.get().cloned()
    }

    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.initialized()
    }

    /// Drop the shared model. Requests already holding it finish normally.
    pub async fn unload(&self) -> bool {
        let mut guard = self.model.write().await;
        let was_loaded = guard.initialized();
        *guard = Arc::new(OnceCell::new());
        if was_loaded {
            info!("Unloaded summarisation model");
        }
        was_loaded
    }
}
