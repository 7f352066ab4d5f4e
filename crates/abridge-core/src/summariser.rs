//! Text summarisation over a sequence-to-sequence model.
//!
//! [`Summariser`] runs the four steps of one request: tokenize with
//! truncation, beam-search generation, decoding without special tokens, and
//! whitespace trimming. The model itself sits behind [`SummaryModel`] so the
//! pipeline can run against the native BART checkpoint or a test double.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::generation::GenerationParams;
use crate::models::device::DeviceKind;

/// Default upper bound on summary length, in decoder tokens.
pub const DEFAULT_MAX_LENGTH: usize = 150;
/// Default lower bound on summary length, in decoder tokens.
pub const DEFAULT_MIN_LENGTH: usize = 50;

/// A loaded encoder-decoder model with its tokenizer.
pub trait SummaryModel: Send + Sync {
    /// Model identifier reported to clients.
    fn name(&self) -> &str;

    fn device(&self) -> DeviceKind;

    /// Tokenize `text` into encoder input ids, truncated and wrapped in the
    /// model's sequence markers.
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Generate output ids for one encoded input. `on_step` receives the
    /// current decoder length after every step.
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
        on_step: &mut dyn FnMut(usize),
    ) -> Result<Vec<u32>>;

    /// Decode output ids with special tokens removed.
    fn decode(&self, ids: &[u32]) -> Result<String>;

    /// N-gram size the checkpoint forbids repeating; 0 when unset.
    fn no_repeat_ngram_size(&self) -> usize {
        0
    }
}

/// Pipeline stage reported while a request is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStage {
    Tokenizing,
    Generating,
    #[serde(rename = "Post-processing")]
    PostProcessing,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResult {
    pub summary: String,
    pub input_tokens: usize,
    /// Generated tokens, decoder start token included
    pub output_tokens: usize,
    pub generation_time_ms: u64,
}

/// Whitespace-separated word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub struct Summariser {
    model: Arc<dyn SummaryModel>,
}

impl Summariser {
    pub fn new(model: Arc<dyn SummaryModel>) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &Arc<dyn SummaryModel> {
        &self.model
    }

    /// Summarise `text`. `progress` receives each stage with a completion
    /// fraction in `[0, 1]`.
    pub fn summarise(
        &self,
        text: &str,
        max_length: usize,
        min_length: usize,
        progress: &mut dyn FnMut(JobStage, f32),
    ) -> Result<SummaryResult> {
        let params = GenerationParams::summary(max_length, min_length)
            .with_no_repeat_ngram_size(self.model.no_repeat_ngram_size());
        params.validate()?;

        let started = Instant::now();

        progress(JobStage::Tokenizing, 0.0);
        let input_ids = self.model.encode(text)?;
        if input_ids.is_empty() {
            return Err(Error::TokenizationError(
                "Input produced no tokens".to_string(),
            ));
        }
        debug!("Encoded input into {} tokens", input_ids.len());

        progress(JobStage::Generating, 0.0);
        let output_ids = {
            let mut on_step = |len: usize| {
                progress(
                    JobStage::Generating,
                    (len as f32 / max_length as f32).min(1.0),
                )
            };
            self.model.generate(&input_ids, &params, &mut on_step)?
        };

        progress(JobStage::PostProcessing, 0.0);
        let summary = self.model.decode(&output_ids)?.trim().to_string();

        let generation_time_ms = started.elapsed().as_millis() as u64;
        progress(JobStage::Complete, 1.0);

        info!(
            "Summarised {} input tokens into {} output tokens in {} ms",
            input_ids.len(),
            output_ids.len(),
            generation_time_ms
        );

        Ok(SummaryResult {
            summary,
            input_tokens: input_ids.len(),
            output_tokens: output_ids.len(),
            generation_time_ms,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Word-level stand-in for a seq2seq model: echoes the first words of the input.
    pub struct EchoModel {
        pub name: String,
        pub seen_params: Mutex<Vec<GenerationParams>>,
        pub ngram_size: usize,
    }

    impl Default for EchoModel {
        fn default() -> Self {
            Self {
                name: "echo".to_string(),
                seen_params: Mutex::new(Vec::new()),
                ngram_size: 3,
            }
        }
    }

    impl SummaryModel for EchoModel {
        fn name(&self) -> &str {
            &self.name
        }

        fn device(&self) -> DeviceKind {
            DeviceKind::Cpu
        }

        fn encode(&self, text: &str) -> Result<Vec<u32>> {
            Ok(text.split_whitespace().map(|w| w.len() as u32).collect())
        }

        fn generate(
            &self,
            input_ids: &[u32],
            params: &GenerationParams,
            on_step: &mut dyn FnMut(usize),
        ) -> Result<Vec<u32>> {
            self.seen_params.lock().unwrap().push(params.clone());
            let len = input_ids.len().min(params.max_length);
            for step in 1..=len {
                on_step(step);
            }
            Ok(input_ids[..len].to_vec())
        }

        fn decode(&self, ids: &[u32]) -> Result<String> {
            let words: Vec<String> = ids.iter().map(|n| "x".repeat(*n as usize)).collect();
            Ok(format!("  {}\n", words.join(" ")))
        }

        fn no_repeat_ngram_size(&self) -> usize {
            self.ngram_size
        }
    }
}
