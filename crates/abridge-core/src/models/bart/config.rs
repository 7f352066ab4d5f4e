//! BART checkpoint configuration (`config.json` + `generation_config.json`)

use std::fs;
use std::path::Path;

use candle_nn::Activation;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::generation::SpecialTokenIds;

/// Architecture and generation settings; missing keys default to bart-large-cnn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BartConfig {
    #[serde(default = "default_vocab_size")]
    pub vocab_size: usize,
    #[serde(default = "default_d_model")]
    pub d_model: usize,
    #[serde(default = "default_layers")]
    pub encoder_layers: usize,
    #[serde(default = "default_layers")]
    pub decoder_layers: usize,
    #[serde(default = "default_heads")]
    pub encoder_attention_heads: usize,
    #[serde(default = "default_heads")]
    pub decoder_attention_heads: usize,
    #[serde(default = "default_ffn_dim")]
    pub encoder_ffn_dim: usize,
    #[serde(default = "default_ffn_dim")]
    pub decoder_ffn_dim: usize,
    #[serde(default = "default_activation")]
    pub activation_function: Activation,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub scale_embedding: bool,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,

    #[serde(default = "default_pad_token_id")]
    pub pad_token_id: u32,
    #[serde(default = "default_bos_token_id")]
    pub bos_token_id: u32,
    #[serde(default = "default_eos_token_id")]
    pub eos_token_id: u32,
    #[serde(default = "default_eos_token_id")]
    pub decoder_start_token_id: u32,
    #[serde(default)]
    pub forced_bos_token_id: Option<u32>,
    #[serde(default)]
    pub forced_eos_token_id: Option<u32>,
    #[serde(default)]
    pub no_repeat_ngram_size: usize,
}

/// Subset of `generation_config.json` that overrides `config.json`.
#[derive(Debug, Default, Deserialize)]
struct GenerationConfigFile {
    #[serde(default)]
    decoder_start_token_id: Option<u32>,
    #[serde(default)]
    forced_bos_token_id: Option<u32>,
    #[serde(default)]
    forced_eos_token_id: Option<u32>,
    #[serde(default)]
    no_repeat_ngram_size: Option<usize>,
}

fn default_vocab_size() -> usize {
    50264
}
fn default_d_model() -> usize {
    1024
}
fn default_layers() -> usize {
    12
}
fn default_heads() -> usize {
    16
}
fn default_ffn_dim() -> usize {
    4096
}
fn default_activation() -> Activation {
    Activation::Gelu
}
fn default_max_position_embeddings() -> usize {
    1024
}
fn default_layer_norm_eps() -> f64 {
    1e-5
}
fn default_pad_token_id() -> u32 {
    1
}
fn default_bos_token_id() -> u32 {
    0
}
fn default_eos_token_id() -> u32 {
    2
}

impl Default for BartConfig {
    fn default() -> Self {
        Self {
            vocab_size: default_vocab_size(),
            d_model: default_d_model(),
            encoder_layers: default_layers(),
            decoder_layers: default_layers(),
            encoder_attention_heads: default_heads(),
            decoder_attention_heads: default_heads(),
            encoder_ffn_dim: default_ffn_dim(),
            decoder_ffn_dim: default_ffn_dim(),
            activation_function: default_activation(),
            max_position_embeddings: default_max_position_embeddings(),
            scale_embedding: false,
            layer_norm_eps: default_layer_norm_eps(),
            pad_token_id: default_pad_token_id(),
            bos_token_id: default_bos_token_id(),
            eos_token_id: default_eos_token_id(),
            decoder_start_token_id: default_eos_token_id(),
            forced_bos_token_id: None,
            forced_eos_token_id: None,
            no_repeat_ngram_size: 0,
        }
    }
}

impl BartConfig {
    /// Learned position tables carry two extra leading rows.
    pub const POSITION_OFFSET: usize = 2;

    pub fn from_json(config_str: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Read `config.json`, then apply `generation_config.json` when given.
    pub fn load(config_path: &Path, generation_config_path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_json(&fs::read_to_string(config_path)?)?;

        if let Some(path) = generation_config_path {
            let overrides: GenerationConfigFile =
                serde_json::from_str(&fs::read_to_string(path)?)?;
            debug!("Applying generation overrides from {:?}", path);
            config.apply_generation_overrides(overrides);
        }

        Ok(config)
    }

    fn apply_generation_overrides(&mut self, overrides: GenerationConfigFile) {
        if let Some(id) = overrides.decoder_start_token_id {
            self.decoder_start_token_id = id;
        }
        if overrides.forced_bos_token_id.is_some() {
            self.forced_bos_token_id = overrides.forced_bos_token_id;
        }
        if overrides.forced_eos_token_id.is_some() {
            self.forced_eos_token_id = overrides.forced_eos_token_id;
        }
        if let Some(size) = overrides.no_repeat_ngram_size {
            self.no_repeat_ngram_size = size;
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, heads) in [
            ("encoder", self.encoder_attention_heads),
            ("decoder", self.decoder_attention_heads),
        ] {
            if heads == 0 || self.d_model % heads != 0 {
                return Err(Error::ConfigError(format!(
                    "d_model {} is not divisible by {} attention heads ({})",
                    self.d_model, name, heads
                )));
            }
        }
        if self.vocab_size == 0 {
            return Err(Error::ConfigError("vocab_size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn embed_scale(&self) -> f64 {
        if self.scale_embedding {
            (self.d_model as f64).sqrt()
        } else {
            1.0
        }
    }

    pub fn special_tokens(&self) -> SpecialTokenIds {
        SpecialTokenIds {
            decoder_start: self.decoder_start_token_id,
            eos: self.eos_token_id,
            pad: self.pad_token_id,
            forced_bos: self.forced_bos_token_id,
            forced_eos: self.forced_eos_token_id,
        }
    }
}
