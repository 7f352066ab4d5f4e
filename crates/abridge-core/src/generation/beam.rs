//! Beam search over an incremental decoder.
//!
//! The search keeps `num_beams` live sequences. At each step every live beam
//! contributes its processed log-probabilities, the best `2 * num_beams`
//! continuations are ranked, EOS continuations become finished hypotheses and
//! the rest refill the live beams. Finished hypotheses are scored with
//! `sum_logprobs / generated_len ^ length_penalty`.

use std::cmp::Ordering;

use tracing::debug;

use super::params::{GenerationParams, SpecialTokenIds};
use super::processors::{log_softmax, LogitsProcessor};
use crate::error::{Error, Result};

/// Score given to the initially duplicated beams so only beam 0 expands first.
const INACTIVE_BEAM_SCORE: f32 = -1e9;

/// Incremental decoder driven by [`BeamSearch`].
pub trait DecodeStep {
    /// Feed one token per live beam and return next-token logits for each beam.
    fn next_logits(&mut self, last_tokens: &[u32]) -> Result<Vec<Vec<f32>>>;

    /// Rearrange cached state so that beam `i` continues from old beam `origins[i]`.
    fn reorder(&mut self, origins: &[usize]) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Hypothesis {
    tokens: Vec<u32>,
    score: f32,
}

/// Finished hypotheses, capped at `num_beams`.
#[derive(Debug)]
struct BeamHypotheses {
    num_beams: usize,
    length_penalty: f32,
    early_stopping: bool,
    hyps: Vec<Hypothesis>,
    worst_score: f32,
}

impl BeamHypotheses {
    fn new(num_beams: usize, length_penalty: f32, early_stopping: bool) -> Self {
        Self {
            num_beams,
            length_penalty,
            early_stopping,
            hyps: Vec::with_capacity(num_beams + 1),
            worst_score: f32::INFINITY,
        }
    }

    fn len(&self) -> usize {
        self.hyps.len()
    }

    fn add(&mut self, tokens: Vec<u32>, sum_logprobs: f32, generated_len: usize) {
        let score = sum_logprobs / (generated_len.max(1) as f32).powf(self.length_penalty);
        if self.len() < self.num_beams || score > self.worst_score {
            self.hyps.push(Hypothesis { tokens, score });
            if self.len() > self.num_beams {
                if let Some((worst_idx, _)) = self
                    .hyps
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.score.total_cmp(&b.1.score))
                {
                    self.hyps.remove(worst_idx);
                }
                self.worst_score = self
                    .hyps
                    .iter()
                    .map(|h| h.score)
                    .fold(f32::INFINITY, f32::min);
            } else {
                self.worst_score = self.worst_score.min(score);
            }
        }
    }

    /// Whether no live beam can still beat the stored hypotheses.
    fn is_done(&self, best_running_sum: f32, cur_len: usize) -> bool {
        if self.len() < self.num_beams {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        let best_possible = best_running_sum / (cur_len.max(1) as f32).powf(self.length_penalty);
        self.worst_score >= best_possible
    }

    fn best(self) -> Option<Hypothesis> {
        self.hyps
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    beam: usize,
    token: u32,
}

/// Keeps the `k` highest-scoring candidates in descending order.
struct TopK {
    k: usize,
    items: Vec<Candidate>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            items: Vec::with_capacity(k + 1),
        }
    }

    fn push(&mut self, candidate: Candidate) {
        if self.items.len() == self.k {
            match self.items.last() {
                Some(last) if candidate.score.total_cmp(&last.score) != Ordering::Greater => {
                    return
                }
                _ => {}
            }
        }
        let pos = self
            .items
            .partition_point(|item| item.score.total_cmp(&candidate.score) != Ordering::Less);
        self.items.insert(pos, candidate);
        self.items.truncate(self.k);
    }

    fn into_sorted(self) -> Vec<Candidate> {
        self.items
    }
}

/// Output of a finished search.
#[derive(Debug, Clone)]
pub struct BeamOutput {
    /// Best sequence, decoder start token included, trailing EOS excluded
    pub tokens: Vec<u32>,
    pub score: f32,
    /// Decoder steps executed
    pub steps: usize,
}

pub struct BeamSearch<'a> {
    params: &'a GenerationParams,
    tokens: &'a SpecialTokenIds,
}

impl<'a> BeamSearch<'a> {
    pub fn new(params: &'a GenerationParams, tokens: &'a SpecialTokenIds) -> Self {
        Self { params, tokens }
    }

    /// Run the search. `on_step` receives the current sequence length after each step.
    pub fn run<S: DecodeStep + ?Sized>(
        &self,
        decoder: &mut S,
        on_step: &mut dyn FnMut(usize),
    ) -> Result<BeamOutput> {
        self.params.validate()?;

        let num_beams = self.params.num_beams;
        let processor = LogitsProcessor::new(self.params, self.tokens);

        let mut sequences: Vec<Vec<u32>> = vec![vec![self.tokens.decoder_start]; num_beams];
        let mut beam_scores = vec![INACTIVE_BEAM_SCORE; num_beams];
        beam_scores[0] = 0.0;

        let mut finished = BeamHypotheses::new(
            num_beams,
            self.params.length_penalty,
            self.params.early_stopping,
        );
        let mut done = false;
        let mut steps = 0;

        while sequences[0].len() < self.params.max_length {
            let cur_len = sequences[0].len();
            let last_tokens: Vec<u32> = sequences
                .iter()
                .map(|seq| seq.last().copied().unwrap_or(self.tokens.decoder_start))
                .collect();

            let logits = decoder.next_logits(&last_tokens)?;
            if logits.len() != num_beams {
                return Err(Error::InferenceError(format!(
                    "Decoder returned {} rows for {} beams",
                    logits.len(),
                    num_beams
                )));
            }
            steps += 1;

            let mut top = TopK::new(2 * num_beams);
            for (beam, row) in logits.iter().enumerate() {
                let mut scores = log_softmax(row);
                processor.apply(&sequences[beam], &mut scores);
                for (token, score) in scores.into_iter().enumerate() {
                    top.push(Candidate {
                        score: score + beam_scores[beam],
                        beam,
                        token: token as u32,
                    });
                }
            }

            let mut next: Vec<Candidate> = Vec::with_capacity(num_beams);
            for (rank, candidate) in top.into_sorted().into_iter().enumerate() {
                if candidate.token == self.tokens.eos {
                    if rank >= num_beams {
                        continue;
                    }
                    // generated length counts the EOS but not the decoder start token
                    finished.add(sequences[candidate.beam].clone(), candidate.score, cur_len);
                } else {
                    next.push(candidate);
                }
                if next.len() == num_beams {
                    break;
                }
            }

            if next.len() < num_beams {
                return Err(Error::InferenceError(format!(
                    "Beam search produced {} live beams, expected {}",
                    next.len(),
                    num_beams
                )));
            }

            let best_running = next[0].score;
            let origins: Vec<usize> = next.iter().map(|c| c.beam).collect();
            sequences = next
                .iter()
                .map(|c| {
                    let mut seq = sequences[c.beam].clone();
                    seq.push(c.token);
                    seq
                })
                .collect();
            beam_scores = next.iter().map(|c| c.score).collect();

            decoder.reorder(&origins)?;
            on_step(cur_len + 1);

            if finished.is_done(best_running, cur_len + 1) {
                done = true;
                break;
            }
        }

        if !done {
            for (seq, score) in sequences.into_iter().zip(beam_scores) {
                let generated_len = seq.len().saturating_sub(1);
                finished.add(seq, score, generated_len);
            }
        }

        debug!(
            "Beam search finished after {} steps ({} hypotheses)",
            steps,
            finished.len()
        );

        let best = finished
            .best()
            .ok_or_else(|| Error::InferenceError("Beam search produced no hypothesis".into()))?;

        Ok(BeamOutput {
            tokens: best.tokens,
            score: best.score,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOCAB: usize = 8;
    const START: u32 = 2;
    const EOS: u32 = 2;
    const BOS: u32 = 0;

    fn special() -> SpecialTokenIds {
        SpecialTokenIds {
            decoder_start: START,
            eos: EOS,
            pad: 1,
            forced_bos: Some(BOS),
            forced_eos: Some(EOS),
        }
    }

    /// Decoder whose logits depend only on the previous token.
    struct TableDecoder {
        table: Box<dyn Fn(u32) -> Vec<f32>>,
        calls: usize,
        reorders: Vec<Vec<usize>>,
    }

    impl TableDecoder {
        fn new(table: impl Fn(u32) -> Vec<f32> + 'static) -> Self {
            Self {
                table: Box::new(table),
                calls: 0,
                reorders: Vec::new(),
            }
        }
    }

    impl DecodeStep for TableDecoder {
        fn next_logits(&mut self, last_tokens: &[u32]) -> Result<Vec<Vec<f32>>> {
            self.calls += 1;
            Ok(last_tokens.iter().map(|t| (self.table)(*t)).collect())
        }

        fn reorder(&mut self, origins: &[usize]) -> Result<()> {
            self.reorders.push(origins.to_vec());
            Ok(())
        }
    }

    fn peaked(token: u32) -> Vec<f32> {
        let mut row = vec![0.0; VOCAB];
        row[token as usize] = 10.0;
        row
    }

    #[test]
    fn test_top_k_keeps_best_in_order() {
        let mut top = TopK::new(3);
        for (i, score) in [0.5, 3.0, -1.0, 2.0, 9.0].iter().enumerate() {
            top.push(Candidate {
                score: *score,
                beam: 0,
                token: i as u32,
            });
        }
        let scores: Vec<f32> = top.into_sorted().iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![9.0, 3.0, 2.0]);
    }

    #[test]
    fn test_hypotheses_keep_best_scores() {
        let mut hyps = BeamHypotheses::new(2, 1.0, true);
        hyps.add(vec![1], -4.0, 2);
        hyps.add(vec![2], -1.0, 1);
        hyps.add(vec![3], -3.0, 1);
        assert_eq!(hyps.len(), 2);
        assert_eq!(hyps.worst_score, -2.0);
        assert_eq!(hyps.best().unwrap().tokens, vec![2]);
    }

    #[test]
    fn test_length_penalty_favours_longer_hypotheses() {
        let mut hyps = BeamHypotheses::new(2, 2.0, true);
        // same total log-prob, longer sequence is divided by a larger length
        hyps.add(vec![START, 5], -4.0, 2);
        hyps.add(vec![START, 5, 6, 7], -4.0, 4);
        assert_eq!(hyps.best().unwrap().tokens.len(), 4);
    }

    #[test]
    fn test_first_token_is_forced_bos_and_stops_on_eos() {
        // after BOS prefer 5, after 5 prefer 6, after 6 prefer EOS
        let mut decoder = TableDecoder::new(|prev| match prev {
            START => peaked(4),
            BOS => peaked(5),
            5 => peaked(6),
            _ => peaked(EOS),
        });
        let params = GenerationParams::summary(20, 0);
        let tokens = special();
        let mut lengths = Vec::new();
        let output = BeamSearch::new(&params, &tokens)
            .run(&mut decoder, &mut |len| lengths.push(len))
            .unwrap();

        assert_eq!(output.tokens[..4], [START, BOS, 5, 6]);
        assert!(output.tokens.len() < 20);
        assert_eq!(lengths[0], 2);
        assert_eq!(decoder.calls, output.steps);
        assert!(decoder.reorders.iter().all(|o| o.len() == 4));
    }

    #[test]
    fn test_min_length_delays_eos() {
        let mut decoder = TableDecoder::new(|prev| match prev {
            START => peaked(BOS),
            _ => peaked(EOS),
        });
        let params = GenerationParams::summary(30, 6);
        let tokens = special();
        let output = BeamSearch::new(&params, &tokens)
            .run(&mut decoder, &mut |_| {})
            .unwrap();

        assert!(output.tokens.len() >= 6, "got {:?}", output.tokens);
    }

    #[test]
    fn test_max_length_bounds_output() {
        // a decoder that never wants to stop
        let mut decoder = TableDecoder::new(|prev| peaked((prev % 3) + 4));
        let params = GenerationParams::summary(8, 0);
        let tokens = special();
        let output = BeamSearch::new(&params, &tokens)
            .run(&mut decoder, &mut |_| {})
            .unwrap();

        assert!(output.tokens.len() <= 8);
        assert!(decoder.calls <= 7);
    }

    #[test]
    fn test_no_repeat_ngram_blocks_loops() {
        // greedy choice would loop 4 5 4 5 ...
        let mut decoder = TableDecoder::new(|prev| match prev {
            START => peaked(BOS),
            4 => peaked(5),
            _ => peaked(4),
        });
        let params = GenerationParams::summary(12, 0).with_no_repeat_ngram_size(2);
        let tokens = special();
        let output = BeamSearch::new(&params, &tokens)
            .run(&mut decoder, &mut |_| {})
            .unwrap();

        let generated = &output.tokens[1..];
        for window in generated.windows(2) {
            let repeats = generated.windows(2).filter(|w| *w == window).count();
            assert_eq!(repeats, 1, "bigram {:?} repeated in {:?}", window, generated);
        }
    }

    #[test]
    fn test_row_count_mismatch_is_error() {
        struct Broken;
        impl DecodeStep for Broken {
            fn next_logits(&mut self, _last: &[u32]) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![0.0; VOCAB]])
            }
            fn reorder(&mut self, _origins: &[usize]) -> Result<()> {
                Ok(())
            }
        }

        let params = GenerationParams::summary(10, 0);
        let tokens = special();
        let err = BeamSearch::new(&params, &tokens)
            .run(&mut Broken, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, Error::InferenceError(_)));
    }
}
