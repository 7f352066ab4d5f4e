//! Generation parameters and token ids that steer decoding

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_NUM_BEAMS: usize = 4;
pub const DEFAULT_LENGTH_PENALTY: f32 = 2.0;

/// Constraints for one beam-search run.
///
/// Lengths count decoder tokens, including the decoder start token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_length: usize,
    pub min_length: usize,
    #[serde(default = "default_num_beams")]
    pub num_beams: usize,
    #[serde(default = "default_length_penalty")]
    pub length_penalty: f32,
    #[serde(default = "default_early_stopping")]
    pub early_stopping: bool,
    /// Forbid repeating any n-gram of this size; 0 disables the check
    #[serde(default)]
    pub no_repeat_ngram_size: usize,
}

fn default_num_beams() -> usize {
    DEFAULT_NUM_BEAMS
}

fn default_length_penalty() -> f32 {
    DEFAULT_LENGTH_PENALTY
}

fn default_early_stopping() -> bool {
    true
}

impl GenerationParams {
    /// Beam width 4, length penalty 2.0 and early stopping within the given bounds.
    pub fn summary(max_length: usize, min_length: usize) -> Self {
        Self {
            max_length,
            min_length,
            num_beams: DEFAULT_NUM_BEAMS,
            length_penalty: DEFAULT_LENGTH_PENALTY,
            early_stopping: true,
            no_repeat_ngram_size: 0,
        }
    }

    pub fn with_no_repeat_ngram_size(mut self, size: usize) -> Self {
        self.no_repeat_ngram_size = size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_beams == 0 {
            return Err(Error::InvalidInput("num_beams must be at least 1".to_string()));
        }
        // The decoder start token occupies the first position
        if self.max_length < 2 {
            return Err(Error::InvalidInput(format!(
                "max_length must be at least 2, got {}",
                self.max_length
            )));
        }
        if !self.length_penalty.is_finite() {
            return Err(Error::InvalidInput(
                "length_penalty must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

/// Token ids the decoder relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokenIds {
    pub decoder_start: u32,
    pub eos: u32,
    pub pad: u32,
    /// Token forced as the first generated token
    pub forced_bos: Option<u32>,
    /// Token forced at the last position allowed by `max_length`
    pub forced_eos: Option<u32>,
}
