//! Score adjustments applied to every beam before candidates are ranked.

use std::collections::HashSet;

use super::params::{GenerationParams, SpecialTokenIds};

/// Numerically stable log-softmax over one row of logits.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let sum: f32 = logits.iter().map(|&x| (x - max).exp()).sum();
    let log_sum = max + sum.ln();
    logits.iter().map(|&x| x - log_sum).collect()
}

/// Tokens that would complete an n-gram already present in `sequence`.
pub fn banned_ngram_tokens(sequence: &[u32], n: usize) -> HashSet<u32> {
    let mut banned = HashSet::new();
    if n == 0 || sequence.len() + 1 < n {
        return banned;
    }
    if n == 1 {
        banned.extend(sequence.iter().copied());
        return banned;
    }

    let prefix = &sequence[sequence.len() + 1 - n..];
    for window in sequence.windows(n) {
        if &window[..n - 1] == prefix {
            banned.insert(window[n - 1]);
        }
    }
    banned
}

/// Applies min-length, no-repeat n-gram and forced BOS/EOS rules in that order.
pub struct LogitsProcessor<'a> {
    params: &'a GenerationParams,
    tokens: &'a SpecialTokenIds,
}

impl<'a> LogitsProcessor<'a> {
    pub fn new(params: &'a GenerationParams, tokens: &'a SpecialTokenIds) -> Self {
        Self { params, tokens }
    }

    /// `sequence` is the beam so far, decoder start token included.
    pub fn apply(&self, sequence: &[u32], scores: &mut [f32]) {
        let cur_len = sequence.len();

        if cur_len < self.params.min_length {
            set_score(scores, self.tokens.eos, f32::NEG_INFINITY);
        }

        if self.params.no_repeat_ngram_size > 0 {
            for token in banned_ngram_tokens(sequence, self.params.no_repeat_ngram_size) {
                set_score(scores, token, f32::NEG_INFINITY);
            }
        }

        if cur_len == 1 {
            if let Some(bos) = self.tokens.forced_bos {
                force_token(scores, bos);
            }
        }

        if cur_len + 1 == self.params.max_length {
            if let Some(eos) = self.tokens.forced_eos {
                force_token(scores, eos);
            }
        }
    }
}

fn set_score(scores: &mut [f32], token: u32, value: f32) {
    if let Some(slot) = scores.get_mut(token as usize) {
        *slot = value;
    }
}

fn force_token(scores: &mut [f32], token: u32) {
    if (token as usize) >= scores.len() {
        return;
    }
    scores.fill(f32::NEG_INFINITY);
    scores[token as usize] = 0.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> SpecialTokenIds {
        SpecialTokenIds {
            decoder_start: 2,
            eos: 2,
            pad: 1,
            forced_bos: Some(0),
            forced_eos: Some(2),
        }
    }

    #[test]
    fn test_log_softmax_normalises() {
        let out = log_softmax(&[1.0, 2.0, 3.0]);
        let total: f32 = out.iter().map(|x| x.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(out[2] > out[1] && out[1] > out[0]);
    }

    #[test]
    fn test_log_softmax_all_masked() {
        let out = log_softmax(&[f32::NEG_INFINITY; 3]);
        assert!(out.iter().all(|x| *x == f32::NEG_INFINITY));
    }

    #[test]
    fn test_banned_ngram_tokens() {
        // trigram "5 6 7" seen; sequence now ends with "5 6"
        let seq = [2, 5, 6, 7, 9, 5, 6];
        let banned = banned_ngram_tokens(&seq, 3);
        assert_eq!(banned, HashSet::from([7]));

        assert!(banned_ngram_tokens(&[2, 5], 3).is_empty());
        assert_eq!(banned_ngram_tokens(&[4, 4, 8], 1), HashSet::from([4, 8]));
    }

    #[test]
    fn test_min_length_suppresses_eos() {
        let params = GenerationParams::summary(30, 10);
        let tokens = tokens();
        let processor = LogitsProcessor::new(&params, &tokens);

        let mut scores = vec![0.0; 8];
        processor.apply(&[2, 0, 5], &mut scores);
        assert_eq!(scores[2], f32::NEG_INFINITY);
        assert_eq!(scores[5], 0.0);
    }

    #[test]
    fn test_forced_bos_on_first_step() {
        let params = GenerationParams::summary(30, 10);
        let tokens = tokens();
        let processor = LogitsProcessor::new(&params, &tokens);

        let mut scores = vec![-1.0; 8];
        processor.apply(&[2], &mut scores);
        assert_eq!(scores[0], 0.0);
        assert!(scores[1..].iter().all(|s| *s == f32::NEG_INFINITY));
    }

    #[test]
    fn test_forced_eos_overrides_min_length() {
        let params = GenerationParams::summary(4, 10);
        let tokens = tokens();
        let processor = LogitsProcessor::new(&params, &tokens);

        let mut scores = vec![-1.0; 8];
        processor.apply(&[2, 0, 5], &mut scores);
        assert_eq!(scores[2], 0.0);
        assert_eq!(scores[5], f32::NEG_INFINITY);
    }
}
