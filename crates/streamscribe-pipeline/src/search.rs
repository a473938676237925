//! CTC prefix-beam search
//!
//! Advances a beam of prefixes (sequences of non-blank tokens) from
//! per-frame log-probabilities. Each prefix carries two path scores,
//! one for paths ending in blank and one for paths ending in its last
//! token, merged in the log domain. Prefixes also carry the
//! context-biasing state and the frame index of every emission for
//! timestamp reconstruction.

use std::cmp::Ordering;
use std::collections::HashMap;

use streamscribe_core::{Error, Result};

use crate::context::ContextGraph;
use crate::symbol::BLANK_ID;

/// Log-domain addition.
fn log_add(a: f32, b: f32) -> f32 {
    if a == f32::NEG_INFINITY {
        return b;
    }
    if b == f32::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}

#[derive(Debug, Clone)]
struct PrefixScore {
    /// Log prob of paths ending in blank.
    blank: f32,
    /// Log prob of paths ending in the prefix's last token.
    non_blank: f32,
    context_state: usize,
    context_score: f32,
    /// Frame index of each emitted token.
    times: Vec<usize>,
    /// Best single-path score seen for `times`; better paths replace the
    /// emission times on merge.
    times_prob: f32,
}

impl PrefixScore {
    fn score(&self) -> f32 {
        log_add(self.blank, self.non_blank)
    }

    fn total(&self) -> f32 {
        self.score() + self.context_score
    }
}

/// One decoded hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct BeamHypothesis {
    /// Collapsed (non-blank, non-repeated) token sequence.
    pub tokens: Vec<i32>,
    /// CTC log probability plus accumulated context bonus.
    pub score: f32,
    /// Emission frame index (subsampled time base) per token.
    pub times: Vec<usize>,
}

/// Incremental CTC prefix-beam searcher.
pub struct CtcPrefixBeamSearch {
    beam_size: usize,
    context: Option<ContextGraph>,
    hyps: Vec<(Vec<i32>, PrefixScore)>,
    time_step: usize,
}

impl CtcPrefixBeamSearch {
    pub fn new(beam_size: usize, context: Option<ContextGraph>) -> Self {
        let mut search = Self {
            beam_size: beam_size.max(1),
            context,
            hyps: Vec::new(),
            time_step: 0,
        };
        search.reset();
        search
    }

    /// Rewind to the empty hypothesis.
    pub fn reset(&mut self) {
        self.time_step = 0;
        self.hyps = vec![(
            Vec::new(),
            PrefixScore {
                blank: 0.0,
                non_blank: f32::NEG_INFINITY,
                context_state: 0,
                context_score: 0.0,
                times: Vec::new(),
                times_prob: f32::NEG_INFINITY,
            },
        )];
    }

    /// Advance the beam with one frame of per-token log-probabilities.
    pub fn search(&mut self, log_probs: &[f32]) -> Result<()> {
        if log_probs.is_empty() {
            return Err(Error::internal("empty log-probability frame"));
        }

        // prune to the top beam_size tokens for this frame
        let mut order: Vec<usize> = (0..log_probs.len()).collect();
        order.sort_unstable_by(|&a, &b| log_probs[b].total_cmp(&log_probs[a]));
        order.truncate(self.beam_size);

        let t = self.time_step;
        let mut next: HashMap<Vec<i32>, PrefixScore> = HashMap::new();

        for (prefix, prefix_score) in &self.hyps {
            for &candidate in &order {
                let prob = log_probs[candidate];
                let token = candidate as i32;

                if token == BLANK_ID {
                    // prefix unchanged, path now ends in blank
                    let entry = Self::same_prefix_entry(&mut next, prefix, prefix_score);
                    entry.blank = log_add(entry.blank, prefix_score.score() + prob);
                    Self::merge_times(entry, &prefix_score.times, prefix_score.score() + prob);
                } else if prefix.last() == Some(&token) {
                    // repetition collapses into the same prefix
                    let entry = Self::same_prefix_entry(&mut next, prefix, prefix_score);
                    entry.non_blank = log_add(entry.non_blank, prefix_score.non_blank + prob);
                    Self::merge_times(entry, &prefix_score.times, prefix_score.non_blank + prob);

                    // the token can also be re-emitted after a blank
                    if prefix_score.blank != f32::NEG_INFINITY {
                        let path = prefix_score.blank + prob;
                        let entry = self.extended_entry(&mut next, prefix, prefix_score, token);
                        entry.non_blank = log_add(entry.non_blank, path);
                        let mut times = prefix_score.times.clone();
                        times.push(t);
                        Self::merge_times(entry, &times, path);
                    }
                } else {
                    let path = prefix_score.score() + prob;
                    let entry = self.extended_entry(&mut next, prefix, prefix_score, token);
                    entry.non_blank = log_add(entry.non_blank, path);
                    let mut times = prefix_score.times.clone();
                    times.push(t);
                    Self::merge_times(entry, &times, path);
                }
            }
        }

        let mut hyps: Vec<(Vec<i32>, PrefixScore)> = next.into_iter().collect();
        hyps.sort_unstable_by(|a, b| match b.1.total().total_cmp(&a.1.total()) {
            Ordering::Equal => a.0.cmp(&b.0),
            ordering => ordering,
        });
        hyps.truncate(self.beam_size);

        if hyps.is_empty() {
            return Err(Error::internal("beam underflow"));
        }

        self.hyps = hyps;
        self.time_step += 1;
        Ok(())
    }

    /// Advance over several frames.
    pub fn search_batch(&mut self, frames: &[Vec<f32>]) -> Result<()> {
        for frame in frames {
            self.search(frame)?;
        }
        Ok(())
    }

    /// Frames consumed since the last reset.
    pub fn frames_decoded(&self) -> usize {
        self.time_step
    }

    /// Top-k hypotheses, best first.
    pub fn nbest(&self, k: usize) -> Vec<BeamHypothesis> {
        self.hyps
            .iter()
            .take(k)
            .map(|(prefix, score)| BeamHypothesis {
                tokens: prefix.clone(),
                score: score.total(),
                times: score.times.clone(),
            })
            .collect()
    }

    /// Entry for an unchanged prefix, created with the prefix's own
    /// context bookkeeping when seen first.
    fn same_prefix_entry<'m>(
        next: &'m mut HashMap<Vec<i32>, PrefixScore>,
        prefix: &[i32],
        source: &PrefixScore,
    ) -> &'m mut PrefixScore {
        next.entry(prefix.to_vec()).or_insert_with(|| PrefixScore {
            blank: f32::NEG_INFINITY,
            non_blank: f32::NEG_INFINITY,
            context_state: source.context_state,
            context_score: source.context_score,
            times: source.times.clone(),
            times_prob: f32::NEG_INFINITY,
        })
    }

    /// Entry for `prefix + token`, stepping the context graph when the
    /// extension is seen first. The context state is a function of the
    /// token sequence, so whichever parent creates it wins consistently.
    fn extended_entry<'m>(
        &self,
        next: &'m mut HashMap<Vec<i32>, PrefixScore>,
        prefix: &[i32],
        source: &PrefixScore,
        token: i32,
    ) -> &'m mut PrefixScore {
        let mut extended = prefix.to_vec();
        extended.push(token);
        next.entry(extended).or_insert_with(|| {
            let (context_state, delta) = match &self.context {
                Some(graph) => graph.step(source.context_state, token),
                None => (0, 0.0),
            };
            PrefixScore {
                blank: f32::NEG_INFINITY,
                non_blank: f32::NEG_INFINITY,
                context_state,
                context_score: source.context_score + delta,
                times: Vec::new(),
                times_prob: f32::NEG_INFINITY,
            }
        })
    }

    fn merge_times(entry: &mut PrefixScore, times: &[usize], path_score: f32) {
        if path_score > entry.times_prob {
            entry.times_prob = path_score;
            entry.times = times.to_vec();
        }
    }
}
