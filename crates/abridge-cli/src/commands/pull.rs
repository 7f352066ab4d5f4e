//! `abridge pull`: download the checkpoint into the local cache.

use std::path::PathBuf;
use std::time::Duration;

use abridge_core::{EngineConfig, ModelDownloader, MODEL_ID};
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

pub async fn execute(models_dir: Option<PathBuf>, quiet: bool) -> Result<()> {
    let models_dir = models_dir.unwrap_or_else(|| EngineConfig::default().models_dir);
    let downloader = ModelDownloader::new(models_dir)?;

    if let Some(files) = downloader.cached() {
        if !quiet {
            println!("{} is already available at {}", MODEL_ID, files.dir.display());
        }
        return Ok(());
    }

    let spinner = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")?);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Downloading {MODEL_ID}"));

    let result = tokio::task::spawn_blocking(move || downloader.download(false)).await?;
    match result {
        Ok(files) => {
            spinner.finish_with_message(format!(
                "Downloaded {} to {}",
                MODEL_ID,
                files.dir.display()
            ));
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message(format!("Download failed: {e}"));
            Err(e.into())
        }
    }
}
