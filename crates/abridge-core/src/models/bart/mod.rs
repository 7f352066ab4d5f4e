//! Native BART summarisation model (`facebook/bart-large-cnn`).

pub mod config;
mod model;

use candle_core::DType;
use candle_nn::VarBuilder;
use tracing::info;

use crate::error::{Error, Result};
use crate::generation::{BeamSearch, DecodeStep, GenerationParams};
use crate::model::{ModelFiles, MODEL_ID};
use crate::models::device::{DeviceKind, DeviceProfile};
use crate::summariser::SummaryModel;
use crate::tokenizer::Tokenizer;

pub use config::BartConfig;
pub use model::{BartModel, DecoderCache};

pub struct BartSummaryModel {
    config: BartConfig,
    model: BartModel,
    tokenizer: Tokenizer,
    device: DeviceKind,
    max_input_tokens: usize,
}

impl BartSummaryModel {
    /// Load config, tokenizer and weights from a checkpoint directory.
    pub fn load(
        files: &ModelFiles,
        device: &DeviceProfile,
        dtype: DType,
        max_input_tokens: usize,
    ) -> Result<Self> {
        let generation_config = files.generation_config_path();
        let config = BartConfig::load(&files.config_path(), generation_config.as_deref())?;
        let tokenizer = Tokenizer::from_path(&files.dir)?;

        info!(
            "Loading BART weights from {:?} on {} as {:?}",
            files.weights_path(),
            device.kind,
            dtype
        );
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[files.weights_path()], dtype, &device.device)
        }?;
        let model = BartModel::load(&config, vb)?;

        Ok(Self {
            max_input_tokens: max_input_tokens.min(config.max_position_embeddings),
            config,
            model,
            tokenizer,
            device: device.kind,
        })
    }

    pub fn config(&self) -> &BartConfig {
        &self.config
    }
}

impl SummaryModel for BartSummaryModel {
    fn name(&self) -> &str {
        MODEL_ID
    }

    fn device(&self) -> DeviceKind {
        self.device
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let ids = self.tokenizer.encode(text)?;
        wrap_input(
            ids,
            self.max_input_tokens,
            self.config.bos_token_id,
            self.config.eos_token_id,
        )
    }

    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
        on_step: &mut dyn FnMut(usize),
    ) -> Result<Vec<u32>> {
        let encoded = self.model.encode(input_ids)?;
        let cache = self.model.start_decoding(&encoded, params.num_beams)?;
        let mut session = DecodeSession {
            model: &self.model,
            cache,
        };

        let tokens = self.config.special_tokens();
        let output = BeamSearch::new(params, &tokens).run(&mut session, on_step)?;
        Ok(output.tokens)
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let content: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|id| {
                *id != self.config.bos_token_id
                    && *id != self.config.eos_token_id
                    && *id != self.config.pad_token_id
            })
            .collect();
        self.tokenizer.decode(&content)
    }

    fn no_repeat_ngram_size(&self) -> usize {
        self.config.no_repeat_ngram_size
    }
}

/// Truncate to `max_tokens - 2` content ids and wrap them in `<s>` ... `</s>`.
fn wrap_input(mut ids: Vec<u32>, max_tokens: usize, bos: u32, eos: u32) -> Result<Vec<u32>> {
    if max_tokens < 3 {
        return Err(Error::InvalidInput(format!(
            "max_input_tokens must be at least 3, got {max_tokens}"
        )));
    }
    ids.truncate(max_tokens - 2);

    let mut wrapped = Vec::with_capacity(ids.len() + 2);
    wrapped.push(bos);
    wrapped.extend(ids);
    wrapped.push(eos);
    Ok(wrapped)
}

struct DecodeSession<'a> {
    model: &'a BartModel,
    cache: DecoderCache,
}

impl DecodeStep for DecodeSession<'_> {
    fn next_logits(&mut self, last_tokens: &[u32]) -> Result<Vec<Vec<f32>>> {
        self.model.decode_step(last_tokens, &mut self.cache)
    }

    fn reorder(&mut self, origins: &[usize]) -> Result<()> {
        self.cache.reorder(origins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::SpecialTokenIds;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_wrap_input_truncates_to_budget() {
        let ids: Vec<u32> = (10..2000).collect();
        let wrapped = wrap_input(ids, 1024, 0, 2).unwrap();
        assert_eq!(wrapped.len(), 1024);
        assert_eq!(wrapped[0], 0);
        assert_eq!(wrapped[1], 10);
        assert_eq!(*wrapped.last().unwrap(), 2);
    }

    #[test]
    fn test_wrap_input_short_text_untouched() {
        let wrapped = wrap_input(vec![7, 8], 1024, 0, 2).unwrap();
        assert_eq!(wrapped, vec![0, 7, 8, 2]);
        assert!(wrap_input(vec![7], 2, 0, 2).is_err());
    }

    #[test]
    fn test_beam_search_runs_on_random_weights() {
        let config = BartConfig {
            vocab_size: 24,
            d_model: 8,
            encoder_layers: 1,
            decoder_layers: 1,
            encoder_attention_heads: 2,
            decoder_attention_heads: 2,
            encoder_ffn_dim: 16,
            decoder_ffn_dim: 16,
            max_position_embeddings: 32,
            ..BartConfig::default()
        };
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = BartModel::load(&config, vb).unwrap();

        let params = GenerationParams::summary(8, 3).with_no_repeat_ngram_size(2);
        let tokens = SpecialTokenIds {
            forced_bos: Some(0),
            forced_eos: Some(2),
            ..config.special_tokens()
        };

        let encoded = model.encode(&[0, 5, 6, 7, 2]).unwrap();
        let mut session = DecodeSession {
            model: &model,
            cache: model.start_decoding(&encoded, params.num_beams).unwrap(),
        };
        let output = BeamSearch::new(&params, &tokens)
            .run(&mut session, &mut |_| {})
            .unwrap();

        assert_eq!(output.tokens[0], config.decoder_start_token_id);
        assert_eq!(output.tokens[1], 0);
        assert!(output.tokens.len() < params.max_length);
        assert!(output.tokens.len() >= params.min_length - 1);
    }
}
