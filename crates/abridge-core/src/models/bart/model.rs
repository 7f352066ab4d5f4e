//! BART encoder-decoder for native inference.
//!
//! Post-layer-norm transformer with learned positions (offset by two rows),
//! `layernorm_embedding` on both stacks, and an LM head tied to the shared
//! token embedding plus `final_logits_bias`.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{embedding, layer_norm, linear, Activation, Embedding, LayerNorm, Linear, VarBuilder};
use tracing::debug;

use super::config::BartConfig;
use crate::error::{Error, Result};

struct BartAttention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    out_proj: Linear,
    num_heads: usize,
    head_dim: usize,
    scaling: f64,
}

impl BartAttention {
    fn load(embed_dim: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let head_dim = embed_dim / num_heads;
        Ok(Self {
            q_proj: linear(embed_dim, embed_dim, vb.pp("q_proj"))?,
            k_proj: linear(embed_dim, embed_dim, vb.pp("k_proj"))?,
            v_proj: linear(embed_dim, embed_dim, vb.pp("v_proj"))?,
            out_proj: linear(embed_dim, embed_dim, vb.pp("out_proj"))?,
            num_heads,
            head_dim,
            scaling: (head_dim as f64).powf(-0.5),
        })
    }

    /// [b, seq, d] -> [b, heads, seq, head_dim]
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (bsz, seq_len, _) = x.dims3()?;
        Ok(x
            .reshape((bsz, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn project_kv(&self, x: &Tensor) -> Result<(Tensor, Tensor)> {
        let k = self.split_heads(&self.k_proj.forward(x)?)?;
        let v = self.split_heads(&self.v_proj.forward(x)?)?;
        Ok((k, v))
    }

    fn attend(&self, x: &Tensor, k: &Tensor, v: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (bsz, tgt_len, _) = x.dims3()?;
        let q = self.split_heads(&(self.q_proj.forward(x)? * self.scaling)?)?;

        let weights = q.matmul(&k.t()?.contiguous()?)?;
        let weights = match mask {
            Some(mask) => weights.broadcast_add(mask)?,
            None => weights,
        };
        let weights = candle_nn::ops::softmax_last_dim(&weights)?;

        let out = weights
            .matmul(v)?
            .transpose(1, 2)?
            .reshape((bsz, tgt_len, self.num_heads * self.head_dim))?;
        Ok(self.out_proj.forward(&out)?)
    }
}

struct FeedForward {
    fc1: Linear,
    fc2: Linear,
    activation: Activation,
}

impl FeedForward {
    fn load(d_model: usize, ffn_dim: usize, activation: Activation, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(d_model, ffn_dim, vb.pp("fc1"))?,
            fc2: linear(ffn_dim, d_model, vb.pp("fc2"))?,
            activation,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.activation.forward(&self.fc1.forward(x)?)?;
        Ok(self.fc2.forward(&h)?)
    }
}

struct EncoderLayer {
    self_attn: BartAttention,
    self_attn_layer_norm: LayerNorm,
    ffn: FeedForward,
    final_layer_norm: LayerNorm,
}

impl EncoderLayer {
    fn load(cfg: &BartConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: BartAttention::load(
                cfg.d_model,
                cfg.encoder_attention_heads,
                vb.pp("self_attn"),
            )?,
            self_attn_layer_norm: layer_norm(
                cfg.d_model,
                cfg.layer_norm_eps,
                vb.pp("self_attn_layer_norm"),
            )?,
            ffn: FeedForward::load(cfg.d_model, cfg.encoder_ffn_dim, cfg.activation_function, &vb)?,
            final_layer_norm: layer_norm(cfg.d_model, cfg.layer_norm_eps, vb.pp("final_layer_norm"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (k, v) = self.self_attn.project_kv(x)?;
        let attn = self.self_attn.attend(x, &k, &v, None)?;
        let h = self.self_attn_layer_norm.forward(&(x + attn)?)?;

        let ff = self.ffn.forward(&h)?;
        Ok(self.final_layer_norm.forward(&(h + ff)?)?)
    }
}

struct DecoderLayer {
    self_attn: BartAttention,
    self_attn_layer_norm: LayerNorm,
    encoder_attn: BartAttention,
    encoder_attn_layer_norm: LayerNorm,
    ffn: FeedForward,
    final_layer_norm: LayerNorm,
}

impl DecoderLayer {
    fn load(cfg: &BartConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: BartAttention::load(
                cfg.d_model,
                cfg.decoder_attention_heads,
                vb.pp("self_attn"),
            )?,
            self_attn_layer_norm: layer_norm(
                cfg.d_model,
                cfg.layer_norm_eps,
                vb.pp("self_attn_layer_norm"),
            )?,
            encoder_attn: BartAttention::load(
                cfg.d_model,
                cfg.decoder_attention_heads,
                vb.pp("encoder_attn"),
            )?,
            encoder_attn_layer_norm: layer_norm(
                cfg.d_model,
                cfg.layer_norm_eps,
                vb.pp("encoder_attn_layer_norm"),
            )?,
            ffn: FeedForward::load(cfg.d_model, cfg.decoder_ffn_dim, cfg.activation_function, &vb)?,
            final_layer_norm: layer_norm(cfg.d_model, cfg.layer_norm_eps, vb.pp("final_layer_norm"))?,
        })
    }

    fn forward(
        &self,
        x: &Tensor,
        self_kv: &mut Option<(Tensor, Tensor)>,
        cross_kv: &(Tensor, Tensor),
        mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (k, v) = self.self_attn.project_kv(x)?;
        let (k, v) = match self_kv.take() {
            Some((prev_k, prev_v)) => (
                Tensor::cat(&[&prev_k, &k], 2)?,
                Tensor::cat(&[&prev_v, &v], 2)?,
            ),
            None => (k, v),
        };
        let attn = self.self_attn.attend(x, &k, &v, mask)?;
        *self_kv = Some((k, v));
        let h = self.self_attn_layer_norm.forward(&(x + attn)?)?;

        let cross = self.encoder_attn.attend(&h, &cross_kv.0, &cross_kv.1, None)?;
        let h = self.encoder_attn_layer_norm.forward(&(h + cross)?)?;

        let ff = self.ffn.forward(&h)?;
        Ok(self.final_layer_norm.forward(&(h + ff)?)?)
    }
}

/// Token + learned position embeddings followed by `layernorm_embedding`.
struct Embeddings {
    embed_positions: Embedding,
    layernorm_embedding: LayerNorm,
    embed_scale: f64,
    max_positions: usize,
}

impl Embeddings {
    fn load(cfg: &BartConfig, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            embed_positions: embedding(
                cfg.max_position_embeddings + BartConfig::POSITION_OFFSET,
                cfg.d_model,
                vb.pp("embed_positions"),
            )?,
            layernorm_embedding: layer_norm(
                cfg.d_model,
                cfg.layer_norm_eps,
                vb.pp("layernorm_embedding"),
            )?,
            embed_scale: cfg.embed_scale(),
            max_positions: cfg.max_position_embeddings,
        })
    }

    fn forward(&self, input_ids: &Tensor, embed_tokens: &Embedding, past_len: usize) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if past_len + seq_len > self.max_positions {
            return Err(Error::InvalidInput(format!(
                "Sequence of {} tokens exceeds {} positions",
                past_len + seq_len,
                self.max_positions
            )));
        }

        let mut tokens = embed_tokens.forward(input_ids)?;
        if self.embed_scale != 1.0 {
            tokens = (tokens * self.embed_scale)?;
        }

        let start = (past_len + BartConfig::POSITION_OFFSET) as u32;
        let positions = Tensor::arange(start, start + seq_len as u32, input_ids.device())?;
        let positions = self.embed_positions.forward(&positions)?;

        Ok(self
            .layernorm_embedding
            .forward(&tokens.broadcast_add(&positions)?)?)
    }
}

/// Per-generation decoder state: self-attention K/V per layer plus the
/// cross-attention K/V computed once from the encoder output.
pub struct DecoderCache {
    self_kv: Vec<Option<(Tensor, Tensor)>>,
    cross_kv: Vec<(Tensor, Tensor)>,
    seq_len: usize,
    device: Device,
}

impl DecoderCache {
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn batch_size(&self) -> Result<usize> {
        match self.cross_kv.first() {
            Some((k, _)) => Ok(k.dim(0)?),
            None => Err(Error::InferenceError("Decoder cache has no layers".to_string())),
        }
    }

    /// Row `i` of every self-attention cache becomes old row `origins[i]`.
    pub fn reorder(&mut self, origins: &[usize]) -> Result<()> {
        if origins.iter().enumerate().all(|(i, origin)| i == *origin) {
            return Ok(());
        }
        let index: Vec<u32> = origins.iter().map(|&origin| origin as u32).collect();
        let index = Tensor::from_vec(index, origins.len(), &self.device)?;

        for slot in self.self_kv.iter_mut() {
            if let Some((k, v)) = slot.take() {
                *slot = Some((k.index_select(&index, 0)?, v.index_select(&index, 0)?));
            }
        }
        Ok(())
    }
}

pub struct BartModel {
    shared: Embedding,
    encoder_embeddings: Embeddings,
    encoder_layers: Vec<EncoderLayer>,
    decoder_embeddings: Embeddings,
    decoder_layers: Vec<DecoderLayer>,
    lm_head: Linear,
    final_logits_bias: Tensor,
    device: Device,
    dtype: DType,
}

impl BartModel {
    /// Load from a `BartForConditionalGeneration` checkpoint rooted at `vb`.
    pub fn load(cfg: &BartConfig, vb: VarBuilder) -> Result<Self> {
        cfg.validate()?;
        let device = vb.device().clone();
        let dtype = vb.dtype();

        // Tied checkpoints store the table once; older exports keep it on the encoder.
        let shared_path = if vb.contains_tensor("model.shared.weight") {
            "model.shared"
        } else {
            "model.encoder.embed_tokens"
        };
        let shared = embedding(cfg.vocab_size, cfg.d_model, vb.pp(shared_path))?;

        let encoder_vb = vb.pp("model.encoder");
        let encoder_embeddings = Embeddings::load(cfg, &encoder_vb)?;
        let encoder_layers = (0..cfg.encoder_layers)
            .map(|i| EncoderLayer::load(cfg, encoder_vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;

        let decoder_vb = vb.pp("model.decoder");
        let decoder_embeddings = Embeddings::load(cfg, &decoder_vb)?;
        let decoder_layers = (0..cfg.decoder_layers)
            .map(|i| DecoderLayer::load(cfg, decoder_vb.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;

        let lm_head = Linear::new(shared.embeddings().clone(), None);
        let final_logits_bias = if vb.contains_tensor("final_logits_bias") {
            vb.get((1, cfg.vocab_size), "final_logits_bias")?
        } else {
            debug!("Checkpoint has no final_logits_bias, using zeros");
            Tensor::zeros((1, cfg.vocab_size), dtype, &device)?
        };

        Ok(Self {
            shared,
            encoder_embeddings,
            encoder_layers,
            decoder_embeddings,
            decoder_layers,
            lm_head,
            final_logits_bias,
            device,
            dtype,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Encode one input sequence. Returns hidden states `[1, seq, d_model]`.
    pub fn encode(&self, input_ids: &[u32]) -> Result<Tensor> {
        if input_ids.is_empty() {
            return Err(Error::InvalidInput("Cannot encode an empty sequence".to_string()));
        }
        let ids = Tensor::from_vec(input_ids.to_vec(), (1, input_ids.len()), &self.device)?;
        let mut hidden = self.encoder_embeddings.forward(&ids, &self.shared, 0)?;
        for layer in &self.encoder_layers {
            hidden = layer.forward(&hidden)?;
        }
        Ok(hidden)
    }

    /// Prepare a decoder cache for `batch_size` copies of one encoded input.
    pub fn start_decoding(&self, encoder_states: &Tensor, batch_size: usize) -> Result<DecoderCache> {
        let expanded = if batch_size > 1 {
            encoder_states.repeat((batch_size, 1, 1))?
        } else {
            encoder_states.clone()
        };

        let cross_kv = self
            .decoder_layers
            .iter()
            .map(|layer| layer.encoder_attn.project_kv(&expanded))
            .collect::<Result<Vec<_>>>()?;

        Ok(DecoderCache {
            self_kv: vec![None; self.decoder_layers.len()],
            cross_kv,
            seq_len: 0,
            device: self.device.clone(),
        })
    }

    /// Run the decoder over `input_ids` `[batch, tgt]`, extending the cache.
    /// Returns logits `[batch, tgt, vocab]`.
    pub fn decode(&self, input_ids: &Tensor, cache: &mut DecoderCache) -> Result<Tensor> {
        let (_, tgt_len) = input_ids.dims2()?;
        let past_len = cache.seq_len;
        let mut hidden = self
            .decoder_embeddings
            .forward(input_ids, &self.shared, past_len)?;

        let mask = causal_mask(tgt_len, past_len, hidden.dtype(), &self.device)?;
        for (idx, layer) in self.decoder_layers.iter().enumerate() {
            hidden = layer.forward(
                &hidden,
                &mut cache.self_kv[idx],
                &cache.cross_kv[idx],
                mask.as_ref(),
            )?;
        }
        cache.seq_len += tgt_len;

        let logits = self.lm_head.forward(&hidden)?;
        Ok(logits.broadcast_add(&self.final_logits_bias)?)
    }

    /// Feed one token per batch row and return next-token logits as f32 rows.
    pub fn decode_step(&self, tokens: &[u32], cache: &mut DecoderCache) -> Result<Vec<Vec<f32>>> {
        let ids = Tensor::from_vec(tokens.to_vec(), (tokens.len(), 1), &self.device)?;
        let logits = self.decode(&ids, cache)?;
        let logits = logits.squeeze(1)?.to_dtype(DType::F32)?;
        Ok(logits.to_vec2::<f32>()?)
    }
}

/// Additive mask hiding future positions; `None` when decoding a single token.
fn causal_mask(tgt_len: usize, past_len: usize, dtype: DType, device: &Device) -> Result<Option<Tensor>> {
    if tgt_len <= 1 {
        return Ok(None);
    }
    let total = past_len + tgt_len;
    let mask: Vec<f32> = (0..tgt_len)
        .flat_map(|i| {
            (0..total).map(move |j| {
                if j > past_len + i {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
        })
        .collect();
    let mask = Tensor::from_vec(mask, (1, 1, tgt_len, total), device)?.to_dtype(dtype)?;
    Ok(Some(mask))
}
