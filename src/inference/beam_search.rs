use anyhow::{bail, Result};
use candle_core::{DType, Tensor, D};
use candle_nn::ops::log_softmax;
use candle_transformers::utils::apply_repeat_penalty;
use tracing::trace;

use crate::inference::model_config::GenerationConfig;

/// The two halves of an encoder-decoder model as seen by the decoding loop.
pub trait Seq2SeqModel {
    /// Runs the encoder once over the prompt tokens.
    fn encode(&mut self, input_ids: &[u32]) -> Result<Tensor>;

    /// Next-token logits for every hypothesis, shape `(hypotheses, vocab)`.
    /// All hypotheses have the same length.
    fn next_token_logits(
        &mut self,
        encoder_output: &Tensor,
        hypotheses: &[Vec<u32>],
    ) -> Result<Tensor>;

    fn decoder_start_token(&self) -> u32;

    fn eos_token(&self) -> u32;
}

#[derive(Debug, Clone)]
struct Hypothesis {
    /// Starts with the decoder start token
    tokens: Vec<u32>,
    /// Sum of the log probabilities of the generated tokens
    score: f64,
}

#[derive(Debug)]
struct Candidate {
    beam: usize,
    token: u32,
    score: f64,
}

struct FinishedHypotheses {
    capacity: usize,
    length_penalty: f64,
    beams: Vec<(f64, Vec<u32>)>,
}

impl FinishedHypotheses {
    fn new(capacity: usize, length_penalty: f64) -> Self {
        Self {
            capacity,
            length_penalty,
            beams: Vec::with_capacity(capacity + 1),
        }
    }

    fn normalize(&self, sum_logprobs: f64, len: usize) -> f64 {
        sum_logprobs / (len.max(1) as f64).powf(self.length_penalty)
    }

    fn worst_score(&self) -> f64 {
        self.beams
            .iter()
            .map(|(score, _)| *score)
            .min_by(f64::total_cmp)
            .unwrap_or(f64::NEG_INFINITY)
    }

    fn add(&mut self, hypothesis: &Hypothesis) {
        let score = self.normalize(hypothesis.score, hypothesis.tokens.len());
        if self.is_full() && score <= self.worst_score() {
            return;
        }
        self.beams.push((score, hypothesis.tokens[1..].to_vec()));
        if self.beams.len() > self.capacity {
            if let Some(worst) = self
                .beams
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.0.total_cmp(&b.0))
                .map(|(index, _)| index)
            {
                self.beams.remove(worst);
            }
        }
    }

    fn is_full(&self) -> bool {
        self.beams.len() >= self.capacity
    }

    /// Whether no live hypothesis can still beat the worst finished one.
    fn is_done(&self, early_stopping: bool, best_live: Option<&Hypothesis>) -> bool {
        if !self.is_full() {
            return false;
        }
        if early_stopping {
            return true;
        }
        match best_live {
            Some(live) => self.worst_score() >= self.normalize(live.score, live.tokens.len()),
            None => true,
        }
    }

    fn into_best(self) -> Vec<u32> {
        self.beams
            .into_iter()
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, tokens)| tokens)
            .unwrap_or_default()
    }
}

/// Tokens that would complete an n-gram already present in `tokens`.
pub(crate) fn banned_ngram_tokens(tokens: &[u32], ngram_size: usize) -> Vec<u32> {
    if ngram_size == 0 || tokens.len() + 1 < ngram_size {
        return vec![];
    }
    let prefix = &tokens[tokens.len() + 1 - ngram_size..];
    tokens
        .windows(ngram_size)
        .filter(|ngram| ngram[..ngram_size - 1] == *prefix)
        .map(|ngram| ngram[ngram_size - 1])
        .collect()
}

/// Deterministic beam search decoding, no sampling involved.
pub struct BeamSearch {
    config: GenerationConfig,
}

impl BeamSearch {
    pub fn new(config: GenerationConfig) -> Self {
        Self { config }
    }

    /// Returns the generated tokens without the decoder start and EOS tokens.
    /// The result never holds more than `max_new_tokens` tokens.
    pub fn generate<M>(&self, model: &mut M, input_ids: &[u32]) -> Result<Vec<u32>>
    where
        M: Seq2SeqModel + ?Sized,
    {
        if input_ids.is_empty() {
            bail!("Prompt is empty");
        }
        let num_beams = self.config.num_beams.max(1);
        let eos_token = model.eos_token();
        let encoder_output = model.encode(input_ids)?;

        let mut live = vec![Hypothesis {
            tokens: vec![model.decoder_start_token()],
            score: 0.0,
        }];
        let mut finished = FinishedHypotheses::new(num_beams, self.config.length_penalty);
        let mut done = false;

        for step in 0..self.config.max_new_tokens {
            let sequences: Vec<Vec<u32>> = live.iter().map(|h| h.tokens.clone()).collect();
            let logits = model.next_token_logits(&encoder_output, &sequences)?;
            let candidates = self.candidates(&logits, &live, 2 * num_beams)?;

            let mut next = Vec::with_capacity(num_beams);
            for (rank, candidate) in candidates.into_iter().enumerate() {
                let parent = &live[candidate.beam];
                if candidate.token == eos_token {
                    // An EOS outside the top num_beams cannot win
                    if rank < num_beams {
                        finished.add(&Hypothesis {
                            tokens: parent.tokens.clone(),
                            score: candidate.score,
                        });
                    }
                } else {
                    let mut tokens = parent.tokens.clone();
                    tokens.push(candidate.token);
                    next.push(Hypothesis {
                        tokens,
                        score: candidate.score,
                    });
                }
                if next.len() == num_beams {
                    break;
                }
            }
            live = next;

            if live.is_empty() || finished.is_done(self.config.early_stopping, live.first()) {
                trace!("Beam search finished after {} steps", step + 1);
                done = true;
                break;
            }
        }

        if !done {
            for hypothesis in &live {
                finished.add(hypothesis);
            }
        }

        Ok(finished.into_best())
    }

    /// Scores every continuation of every live hypothesis and keeps the best `limit`.
    fn candidates(
        &self,
        logits: &Tensor,
        live: &[Hypothesis],
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let logits = logits.to_dtype(DType::F32)?;
        let logits = if self.config.temperature > 0.0
            && (self.config.temperature - 1.0).abs() > f64::EPSILON
        {
            (logits / self.config.temperature)?
        } else {
            logits
        };
        let log_probs = log_softmax(&logits, D::Minus1)?;

        let mut candidates = Vec::with_capacity(limit * live.len());
        for (beam, hypothesis) in live.iter().enumerate() {
            let row = log_probs.get(beam)?;
            let row = if (self.config.repetition_penalty - 1.).abs() < f32::EPSILON {
                row
            } else {
                apply_repeat_penalty(&row, self.config.repetition_penalty, &hypothesis.tokens)?
            };
            let mut row: Vec<f32> = row.to_vec1()?;
            for token in banned_ngram_tokens(&hypothesis.tokens, self.config.no_repeat_ngram_size)
            {
                if let Some(score) = row.get_mut(token as usize) {
                    *score = f32::NEG_INFINITY;
                }
            }

            let mut ranked: Vec<(u32, f32)> = row
                .into_iter()
                .enumerate()
                .filter(|(_, score)| score.is_finite())
                .map(|(token, score)| (token as u32, score))
                .collect();
            if ranked.len() > limit {
                ranked.select_nth_unstable_by(limit - 1, |a, b| b.1.total_cmp(&a.1));
                ranked.truncate(limit);
            }
            candidates.extend(ranked.into_iter().map(|(token, score)| Candidate {
                beam,
                token,
                score: hypothesis.score + f64::from(score),
            }));
        }

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.beam.cmp(&b.beam))
                .then(a.token.cmp(&b.token))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use candle_core::Device;
    use pretty_assertions::assert_eq;

    use super::*;

    const START: u32 = 0;
    const EOS: u32 = 1;

    /// Scores the next token from the hypothesis alone.
    struct ScriptedModel<F: Fn(&[u32]) -> Vec<f32>> {
        vocab_size: usize,
        script: F,
        steps: usize,
    }

    impl<F: Fn(&[u32]) -> Vec<f32>> ScriptedModel<F> {
        fn new(vocab_size: usize, script: F) -> Self {
            Self {
                vocab_size,
                script,
                steps: 0,
            }
        }
    }

    impl<F: Fn(&[u32]) -> Vec<f32>> Seq2SeqModel for ScriptedModel<F> {
        fn encode(&mut self, input_ids: &[u32]) -> Result<Tensor> {
            Ok(Tensor::zeros((1, input_ids.len(), 4), DType::F32, &Device::Cpu)?)
        }

        fn next_token_logits(
            &mut self,
            _encoder_output: &Tensor,
            hypotheses: &[Vec<u32>],
        ) -> Result<Tensor> {
            self.steps += 1;
            let flat: Vec<f32> = hypotheses
                .iter()
                .flat_map(|tokens| (self.script)(tokens))
                .collect();
            Ok(Tensor::from_vec(
                flat,
                (hypotheses.len(), self.vocab_size),
                &Device::Cpu,
            )?)
        }

        fn decoder_start_token(&self) -> u32 {
            START
        }

        fn eos_token(&self) -> u32 {
            EOS
        }
    }

    fn config(num_beams: usize, max_new_tokens: usize) -> GenerationConfig {
        GenerationConfig {
            num_beams,
            max_new_tokens,
            ..Default::default()
        }
    }

    #[test]
    fn banned_tokens_complete_existing_ngrams() {
        assert_eq!(banned_ngram_tokens(&[5, 6, 7, 5, 6], 3), vec![7]);
        assert_eq!(banned_ngram_tokens(&[1, 2, 3, 1, 2, 3], 4), vec![1]);
        assert_eq!(banned_ngram_tokens(&[4, 4, 4], 1), vec![4, 4, 4]);
        assert!(banned_ngram_tokens(&[1, 2], 4).is_empty());
        assert!(banned_ngram_tokens(&[1, 2, 1, 2], 0).is_empty());
    }

    #[test]
    fn output_is_capped_at_max_new_tokens() {
        // EOS is never attractive, so only the cap ends generation
        let mut model = ScriptedModel::new(16, |tokens: &[u32]| {
            let last = *tokens.last().unwrap();
            (0..16u32)
                .map(|t| match t {
                    EOS => -1e4,
                    t if t == (last + 1) % 16 => 5.0,
                    t => -(t as f32) * 0.1,
                })
                .collect()
        });

        let tokens = BeamSearch::new(config(4, 12))
            .generate(&mut model, &[3, 4, 5])
            .unwrap();

        assert_eq!(tokens.len(), 12);
        assert!(!tokens.contains(&EOS));
        assert_eq!(model.steps, 12);
    }

    #[test]
    fn stops_once_every_beam_reached_eos() {
        let mut model = ScriptedModel::new(8, |tokens: &[u32]| {
            let favourite = if tokens.len() >= 4 {
                EOS
            } else {
                tokens.len() as u32 + 1
            };
            (0..8u32)
                .map(|t| match t {
                    t if t == favourite => 10.0,
                    EOS => -1e4,
                    _ => 0.0,
                })
                .collect()
        });

        let tokens = BeamSearch::new(config(3, 50))
            .generate(&mut model, &[7])
            .unwrap();

        assert_eq!(tokens, vec![2, 3, 4]);
        assert!(model.steps <= 5, "ran {} steps", model.steps);
    }

    #[test]
    fn never_repeats_an_ngram() {
        let mut model = ScriptedModel::new(10, |_: &[u32]| {
            (0..10u32)
                .map(|t| match t {
                    EOS => -1e4,
                    2 => 5.0,
                    t => -(t as f32),
                })
                .collect()
        });
        let config = GenerationConfig {
            no_repeat_ngram_size: 2,
            repetition_penalty: 1.0,
            ..config(2, 20)
        };

        let tokens = BeamSearch::new(config).generate(&mut model, &[9]).unwrap();

        let mut seen = HashSet::new();
        for bigram in tokens.windows(2) {
            assert!(seen.insert(bigram.to_vec()), "{bigram:?} repeated in {tokens:?}");
        }
    }

    #[test]
    fn decoding_is_deterministic() {
        let script = |tokens: &[u32]| -> Vec<f32> {
            let seed = tokens.iter().map(|t| *t as f32).sum::<f32>();
            (0..12u32)
                .map(|t| ((seed + 1.0) * (t as f32 + 3.0)).sin())
                .collect()
        };

        let search = BeamSearch::new(config(5, 15));
        let first = search
            .generate(&mut ScriptedModel::new(12, script), &[1, 2, 3])
            .unwrap();
        let second = search
            .generate(&mut ScriptedModel::new(12, script), &[1, 2, 3])
            .unwrap();

        assert_eq!(first, second);
        assert!(first.len() <= 15);
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let mut model = ScriptedModel::new(4, |_: &[u32]| vec![0.0; 4]);
        assert!(BeamSearch::new(GenerationConfig::default())
            .generate(&mut model, &[])
            .is_err());
        assert_eq!(model.steps, 0);
    }
}
