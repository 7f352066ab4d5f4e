//! Byte-level BPE tokenization backed by HuggingFace `tokenizers`

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tokenizers::decoders::DecoderWrapper;
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::AddedToken;
use tokenizers::Tokenizer as HfTokenizer;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Control tokens registered as special so that decoding can drop them.
const DEFAULT_SPECIAL_TOKENS: [&str; 5] = ["<s>", "<pad>", "</s>", "<unk>", "<mask>"];

pub struct Tokenizer {
    inner: HfTokenizer,
}

impl Tokenizer {
    pub fn from_path(model_dir: &Path) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        if tokenizer_path.exists() {
            return Self::from_tokenizer_json(&tokenizer_path);
        }

        let vocab_path = model_dir.join("vocab.json");
        let merges_path = model_dir.join("merges.txt");

        if vocab_path.exists() && merges_path.exists() {
            return Self::from_vocab_merges(model_dir, &vocab_path, &merges_path);
        }

        Err(Error::TokenizationError(format!(
            "No tokenizer found in {:?}",
            model_dir
        )))
    }

    fn from_tokenizer_json(path: &Path) -> Result<Self> {
        let inner =
            HfTokenizer::from_file(path).map_err(|e| Error::TokenizationError(e.to_string()))?;
        debug!("Loaded tokenizer from {:?}", path);
        Ok(Self { inner })
    }

    fn from_vocab_merges(model_dir: &Path, vocab_path: &Path, merges_path: &Path) -> Result<Self> {
        info!("Loading BPE tokenizer from vocab.json + merges.txt");
        let vocab_str = vocab_path
            .to_str()
            .ok_or_else(|| Error::TokenizationError("Invalid vocab path".to_string()))?;
        let merges_str = merges_path
            .to_str()
            .ok_or_else(|| Error::TokenizationError("Invalid merges path".to_string()))?;

        let bpe = BPE::from_file(vocab_str, merges_str)
            .build()
            .map_err(|e| Error::TokenizationError(format!("BPE build failed: {}", e)))?;

        let mut inner = HfTokenizer::new(bpe);

        let add_prefix_space = load_tokenizer_config(model_dir)?
            .and_then(|cfg| cfg.add_prefix_space)
            .unwrap_or(false);
        let byte_level = ByteLevel::new(add_prefix_space, true, true);
        inner.with_pre_tokenizer(byte_level.clone());
        inner.with_decoder(DecoderWrapper::ByteLevel(byte_level));

        // The control tokens already live in vocab.json; registering them keeps their ids.
        let specials: Vec<AddedToken> = DEFAULT_SPECIAL_TOKENS
            .iter()
            .filter(|token| inner.token_to_id(token).is_some())
            .map(|token| AddedToken::from(token.to_string(), true))
            .collect();
        inner.add_special_tokens(&specials);

        debug!("Loaded byte-level BPE tokenizer");
        Ok(Self { inner })
    }

    /// Encode text without adding any special tokens.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| Error::TokenizationError(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode ids, skipping every token the tokenizer knows as special.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| Error::TokenizationError(e.to_string()))
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.inner.token_to_id(token)
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

#[derive(Debug, Deserialize)]
struct TokenizerConfigFile {
    #[serde(default)]
    add_prefix_space: Option<bool>,
}

fn load_tokenizer_config(model_dir: &Path) -> Result<Option<TokenizerConfigFile>> {
    let config_path = model_dir.join("tokenizer_config.json");
    if !config_path.exists() {
        return Ok(None);
    }
    let config_str = fs::read_to_string(config_path)?;
    let config: TokenizerConfigFile = serde_json::from_str(&config_str)?;
    Ok(Some(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Writes a tiny byte-level vocabulary: specials, single letters, and one merge.
    fn write_toy_vocab(dir: &Path) {
        let vocab = serde_json::json!({
            "<s>": 0, "<pad>": 1, "</s>": 2, "<unk>": 3,
            "h": 4, "e": 5, "l": 6, "o": 7, "Ġ": 8, "w": 9, "r": 10, "d": 11,
            "he": 12, "<mask>": 13
        });
        fs::write(dir.join("vocab.json"), vocab.to_string()).unwrap();
        let mut merges = fs::File::create(dir.join("merges.txt")).unwrap();
        writeln!(merges, "#version: 0.2").unwrap();
        writeln!(merges, "h e").unwrap();
    }

    #[test]
    fn test_missing_tokenizer_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = Tokenizer::from_path(dir.path()).err().unwrap();
        assert!(matches!(err, Error::TokenizationError(_)));
    }

    #[test]
    fn test_vocab_merges_roundtrip_drops_specials() {
        let dir = tempfile::tempdir().unwrap();
        write_toy_vocab(dir.path());
        let tokenizer = Tokenizer::from_path(dir.path()).unwrap();

        let ids = tokenizer.encode("hello").unwrap();
        assert_eq!(ids[0], 12);

        let mut wrapped = vec![0];
        wrapped.extend(&ids);
        wrapped.push(2);
        assert_eq!(tokenizer.decode(&wrapped).unwrap(), "hello");
        assert_eq!(tokenizer.token_to_id("</s>"), Some(2));
    }
}
