//! `abridge summarise`: send text or a URL to the server and print the summary.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::http::ApiClient;

pub struct SummariseArgs {
    pub input: Option<PathBuf>,
    pub url: Option<String>,
    pub max_length: Option<u32>,
    pub min_length: Option<u32>,
    pub json: bool,
    pub quiet: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Source {
    Text { text: String },
    Url { url: String },
}

impl Source {
    fn endpoint(&self) -> &'static str {
        match self {
            Source::Text { .. } => "/api/summarise",
            Source::Url { .. } => "/api/summarise-url",
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryRequest {
    #[serde(flatten)]
    source: Source,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_length: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    input_word_count: usize,
    output_word_count: usize,
    compression_ratio: f64,
    processing_device: String,
    generation_time_ms: u64,
}

pub async fn execute(args: SummariseArgs, server: &str) -> Result<()> {
    let source = match args.url {
        Some(url) => Source::Url { url },
        None => {
            let text = read_input(args.input.as_ref()).await?;
            if text.trim().is_empty() {
                bail!("No input text to summarise");
            }
            Source::Text { text }
        }
    };

    let client = ApiClient::new(server);
    let request = SummaryRequest {
        source,
        max_length: args.max_length,
        min_length: args.min_length,
    };
    let response: Value = client
        .post_json(request.source.endpoint(), &request)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let summary = response["summary"]
        .as_str()
        .context("Response has no summary")?;
    println!("{summary}");

    if !args.quiet {
        let metadata: Metadata = serde_json::from_value(response["metadata"].clone())
            .context("Response has no metadata")?;
        eprintln!(
            "{} -> {} words (ratio {:.2}) on {} in {} ms",
            metadata.input_word_count,
            metadata.output_word_count,
            metadata.compression_ratio,
            metadata.processing_device,
            metadata.generation_time_ms
        );
    }
    Ok(())
}

/// Read from a file, or from stdin when no path or `-` is given.
async fn read_input(input: Option<&PathBuf>) -> Result<String> {
    match input {
        Some(path) if path.as_path() != Path::new("-") => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut text = String::new();
            tokio::io::stdin().read_to_string(&mut text).await?;
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_input_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("article.txt");
        std::fs::write(&path, "The quick brown fox.").unwrap();

        let text = read_input(Some(&path)).await.unwrap();
        assert_eq!(text, "The quick brown fox.");
    }

    #[tokio::test]
    async fn test_read_input_missing_file() {
        let err = read_input(Some(&PathBuf::from("/nonexistent/article.txt")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read"));
    }

    #[test]
    fn test_request_omits_unset_bounds() {
        let request = SummaryRequest {
            source: Source::Text {
                text: "hello there world".to_string(),
            },
            max_length: Some(100),
            min_length: None,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "text": "hello there world", "max_length": 100 })
        );
        assert_eq!(request.source.endpoint(), "/api/summarise");
    }

    #[test]
    fn test_url_request_targets_url_endpoint() {
        let request = SummaryRequest {
            source: Source::Url {
                url: "https://example.com/story".to_string(),
            },
            max_length: None,
            min_length: Some(20),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({ "url": "https://example.com/story", "min_length": 20 })
        );
        assert_eq!(request.source.endpoint(), "/api/summarise-url");
    }
}
