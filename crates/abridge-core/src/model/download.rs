//! Model downloading from HuggingFace Hub

use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::{Cache, Repo};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{MODEL_ID, OPTIONAL_FILES, REQUIRED_FILES, TOKENIZER_FILES};
use crate::error::{Error, Result};

/// A local directory holding a complete checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub dir: PathBuf,
}

impl ModelFiles {
    /// Check that `dir` holds the weights, the config and a usable tokenizer.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::ModelNotFound(format!(
                "Model directory {} does not exist",
                dir.display()
            )));
        }

        for file in REQUIRED_FILES {
            if !dir.join(file).exists() {
                return Err(Error::ModelNotFound(format!(
                    "{} is missing from {}",
                    file,
                    dir.display()
                )));
            }
        }

        let has_tokenizer_json = dir.join("tokenizer.json").exists();
        let has_bpe_files = dir.join("vocab.json").exists() && dir.join("merges.txt").exists();
        if !has_tokenizer_json && !has_bpe_files {
            return Err(Error::ModelNotFound(format!(
                "No tokenizer files (tokenizer.json or vocab.json + merges.txt) in {}",
                dir.display()
            )));
        }

        Ok(Self { dir })
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join("config.json")
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join("model.safetensors")
    }

    pub fn generation_config_path(&self) -> Option<PathBuf> {
        let path = self.dir.join("generation_config.json");
        path.exists().then_some(path)
    }
}

/// Model downloader for HuggingFace Hub
pub struct ModelDownloader {
    models_dir: PathBuf,
}

impl ModelDownloader {
    /// Create a new downloader that caches under `models_dir`
    pub fn new(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    fn api(&self, progress: bool) -> Result<Api> {
        ApiBuilder::new()
            .with_cache_dir(self.models_dir.clone())
            .with_progress(progress)
            .build()
            .map_err(|e| Error::HfHubError(e.to_string()))
    }

    /// Return the cached snapshot directory if every required file is present.
    pub fn cached(&self) -> Option<ModelFiles> {
        let cache = Cache::new(self.models_dir.clone());
        let repo = cache.repo(Repo::model(MODEL_ID.to_string()));
        let config = repo.get("config.json")?;
        let dir = config.parent()?.to_path_buf();
        ModelFiles::from_dir(dir).ok()
    }

    pub fn is_downloaded(&self) -> bool {
        self.cached().is_some()
    }

    /// Fetch the checkpoint, reusing whatever the cache already holds.
    pub fn download(&self, progress: bool) -> Result<ModelFiles> {
        if let Some(files) = self.cached() {
            debug!("Using cached {} at {:?}", MODEL_ID, files.dir);
            return Ok(files);
        }

        info!("Downloading {} into {:?}", MODEL_ID, self.models_dir);
        let api = self.api(progress)?;
        let repo = api.model(MODEL_ID.to_string());

        let mut snapshot_dir: Option<PathBuf> = None;
        for file in REQUIRED_FILES {
            let path = repo
                .get(file)
                .map_err(|e| Error::HfHubError(format!("Failed to fetch {file}: {e}")))?;
            debug!("Fetched {} -> {:?}", file, path);
            if snapshot_dir.is_none() {
                snapshot_dir = path.parent().map(Path::to_path_buf);
            }
        }

        let mut tokenizer_found = false;
        for file in TOKENIZER_FILES {
            match repo.get(file) {
                Ok(path) => {
                    debug!("Fetched {} -> {:?}", file, path);
                    tokenizer_found = true;
                }
                Err(e) => debug!("Tokenizer file {} unavailable: {}", file, e),
            }
        }
        if !tokenizer_found {
            return Err(Error::HfHubError(format!(
                "No tokenizer files available for {MODEL_ID}"
            )));
        }

        for file in OPTIONAL_FILES {
            if let Err(e) = repo.get(file) {
                warn!("Optional file {} unavailable: {}", file, e);
            }
        }

        let dir = snapshot_dir.ok_or_else(|| {
            Error::HfHubError(format!("Could not resolve snapshot directory for {MODEL_ID}"))
        })?;
        ModelFiles::from_dir(dir)
    }
}
