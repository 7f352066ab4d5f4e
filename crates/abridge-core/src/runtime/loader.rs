//! Resolves checkpoint files and builds the native BART model.

use std::sync::Arc;

use tracing::info;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::{ModelDownloader, ModelFiles, MODEL_ID};
use crate::models::bart::BartSummaryModel;
use crate::models::device::DeviceProfile;
use crate::models::registry::{LoadProgress, ModelLoader};
use crate::summariser::SummaryModel;

pub struct BartLoader {
    config: EngineConfig,
    device: DeviceProfile,
}

impl BartLoader {
    pub fn new(config: EngineConfig, device: DeviceProfile) -> Self {
        Self { config, device }
    }

    fn resolve_files(&self, progress: &LoadProgress) -> Result<ModelFiles> {
        if let Some(dir) = &self.config.model_dir {
            info!("Using local checkpoint at {:?}", dir);
            return ModelFiles::from_dir(dir);
        }

        let downloader = ModelDownloader::new(self.config.models_dir.clone())?;
        if let Some(files) = downloader.cached() {
            return Ok(files);
        }
        progress(&format!("Downloading {MODEL_ID}"), 0.1);
        downloader.download(false)
    }
}

impl ModelLoader for BartLoader {
    fn load(&self, progress: &LoadProgress) -> Result<Arc<dyn SummaryModel>> {
        progress("Locating model files", 0.0);
        let files = self.resolve_files(progress)?;

        progress("Loading model weights", 0.5);
        let dtype = self.device.select_dtype(Some(self.config.dtype.as_str()));
        let model = BartSummaryModel::load(
            &files,
            &self.device,
            dtype,
            self.config.max_input_tokens,
        )
        .map_err(|e| match e {
            Error::ModelLoadError(_) | Error::ModelNotFound(_) => e,
            other => Error::ModelLoadError(other.to_string()),
        })?;

        progress("Model ready", 1.0);
        info!("{} ready on {}", MODEL_ID, self.device.kind);
        Ok(Arc::new(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_local_checkpoint_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            model_dir: Some(dir.path().join("absent")),
            ..EngineConfig::default()
        };
        let loader = BartLoader::new(config, DeviceProfile::cpu());

        let steps = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = steps.clone();
        let err = loader
            .load(&move |step: &str, _: f32| recorded.lock().unwrap().push(step.to_string()))
            .err()
            .unwrap();

        assert!(matches!(err, Error::ModelNotFound(_)));
        assert_eq!(steps.lock().unwrap().as_slice(), ["Locating model files"]);
    }

    #[test]
    fn test_corrupt_weights_surface_as_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"not safetensors").unwrap();
        std::fs::write(dir.path().join("vocab.json"), r#"{"<s>":0,"<pad>":1,"</s>":2}"#).unwrap();
        std::fs::write(dir.path().join("merges.txt"), "#version: 0.2\n").unwrap();

        let config = EngineConfig {
            model_dir: Some(dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let loader = BartLoader::new(config, DeviceProfile::cpu());
        let err = loader.load(&|_: &str, _: f32| {}).err().unwrap();
        assert!(matches!(err, Error::ModelLoadError(_)));
    }
}
