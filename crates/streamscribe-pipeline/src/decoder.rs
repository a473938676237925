//! Streaming decode orchestration
//!
//! Pulls encoder-sized chunks from the feature pipeline, pushes them
//! through the model adapter, and feeds the CTC log-probabilities into
//! the prefix-beam searcher, one chunk per `decode` call, until the
//! stream runs dry. At stream end `rescoring` re-ranks the beam with the
//! attention decoder and the final result is assembled, with word timing
//! when requested.

use std::sync::Arc;

use streamscribe_config::DecodeConfig;
use streamscribe_core::{DecodeResult, NbestEntry, Result, ResultKind, WordPiece};

use crate::context::ContextGraph;
use crate::features::{ChunkRead, FeaturePipeline};
use crate::model::AsrModel;
use crate::search::{BeamHypothesis, CtcPrefixBeamSearch};
use crate::symbol::SymbolTable;

/// Outcome of one decode step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// More audio is needed before another chunk can be decoded.
    WaitFeats,
    /// One chunk was decoded.
    EndBatch,
    /// A pause long enough to cut the utterance. Detected state only;
    /// the decode loop does not emit it.
    Endpoint,
    /// The stream is exhausted.
    EndFeats,
}

/// Drives feature chunks through the model into the searcher.
pub struct StreamingDecoder {
    model: Box<dyn AsrModel>,
    search: CtcPrefixBeamSearch,
    symbols: Arc<SymbolTable>,
    config: DecodeConfig,
    frame_shift_ms: u32,
    /// Beam re-ranked by the attention pass, present after `rescoring`.
    rescored: Option<Vec<BeamHypothesis>>,
}

impl StreamingDecoder {
    pub fn new(
        model: Box<dyn AsrModel>,
        symbols: Arc<SymbolTable>,
        context: Option<ContextGraph>,
        config: DecodeConfig,
        frame_shift_ms: u32,
    ) -> Self {
        let search = CtcPrefixBeamSearch::new(config.beam_size, context);
        Self {
            model,
            search,
            symbols,
            config,
            frame_shift_ms,
            rescored: None,
        }
    }

    /// Pull up to one chunk from the feature pipeline and decode it.
    pub fn decode(&mut self, features: &mut FeaturePipeline) -> Result<DecodeState> {
        let chunk_frames = self.model.meta().frames_per_chunk();
        match features.read_chunk(chunk_frames) {
            ChunkRead::WaitMore => Ok(DecodeState::WaitFeats),
            ChunkRead::EndOfStream(tail) if tail.is_empty() => Ok(DecodeState::EndFeats),
            ChunkRead::EndOfStream(tail) => {
                self.advance(&tail)?;
                Ok(DecodeState::EndBatch)
            }
            ChunkRead::Chunk(frames) => {
                self.advance(&frames)?;
                Ok(DecodeState::EndBatch)
            }
        }
    }

    fn advance(&mut self, frames: &[Vec<f32>]) -> Result<()> {
        let log_probs = self.model.forward_encoder_chunk(frames)?;
        tracing::debug!(
            feature_frames = frames.len(),
            encoder_frames = log_probs.len(),
            "decoding chunk"
        );
        self.search.search_batch(&log_probs)
    }

    /// Re-rank the beam with the attention decoder. The combined score is
    /// the attention score plus `ctc_weight` times the searcher's score.
    pub fn rescoring(&mut self) -> Result<()> {
        let hyps = self.search.nbest(self.config.beam_size);
        if hyps.is_empty() {
            return Ok(());
        }
        let token_seqs: Vec<Vec<i32>> = hyps.iter().map(|h| h.tokens.clone()).collect();
        let attention = self
            .model
            .attention_rescore(&token_seqs, self.config.reverse_weight)?;

        let mut rescored: Vec<(f32, BeamHypothesis)> = hyps
            .into_iter()
            .zip(attention)
            .map(|(hyp, attention_score)| {
                (attention_score + self.config.ctc_weight * hyp.score, hyp)
            })
            .collect();
        rescored.sort_by(|a, b| b.0.total_cmp(&a.0));

        self.rescored = Some(
            rescored
                .into_iter()
                .map(|(score, mut hyp)| {
                    hyp.score = score;
                    hyp
                })
                .collect(),
        );
        Ok(())
    }

    /// Assemble the result document from the current beam. Partial
    /// results carry only the top hypothesis; final results carry up to
    /// `nbest` entries and, when enabled, word timing.
    pub fn build_result(&self, kind: ResultKind) -> DecodeResult {
        let count = match kind {
            ResultKind::Partial => 1,
            ResultKind::Final => self.config.nbest.max(1),
        };
        let hyps = match (&self.rescored, kind) {
            (Some(rescored), ResultKind::Final) => {
                rescored.iter().take(count).cloned().collect::<Vec<_>>()
            }
            _ => self.search.nbest(count),
        };

        let with_timing = kind == ResultKind::Final && self.config.enable_timestamps;
        let nbest = hyps
            .iter()
            .map(|hyp| NbestEntry {
                sentence: self.symbols.join(&hyp.tokens),
                word_pieces: with_timing.then(|| self.word_pieces(hyp)),
            })
            .collect();
        DecodeResult::new(kind, nbest)
    }

    /// Word timing. Consecutive tokens group into one word until the
    /// next `▁`-marked token; a word starts at the emission frame of its
    /// first token and ends where the next word starts (or at stream
    /// end).
    fn word_pieces(&self, hyp: &BeamHypothesis) -> Vec<WordPiece> {
        let ms_per_frame =
            (self.model.meta().subsampling_rate as u64) * (self.frame_shift_ms as u64);
        let stream_end = self.search.frames_decoded() as u64 * ms_per_frame;

        let mut words: Vec<(Vec<i32>, u64)> = Vec::new();
        for (&token, &frame) in hyp.tokens.iter().zip(&hyp.times) {
            if words.is_empty() || self.symbols.starts_word(token) {
                words.push((vec![token], frame as u64 * ms_per_frame));
            } else if let Some((tokens, _)) = words.last_mut() {
                tokens.push(token);
            }
        }

        (0..words.len())
            .map(|i| {
                let (tokens, start) = &words[i];
                let end = words
                    .get(i + 1)
                    .map(|&(_, next_start)| next_start)
                    .unwrap_or(stream_end);
                WordPiece::new(self.symbols.join(tokens), *start, end)
            })
            .collect()
    }

    /// Rewind for a new stream, keeping the model session and the
    /// compiled context graph.
    pub fn reset(&mut self) {
        self.search.reset();
        self.model.reset();
        self.rescored = None;
    }

    /// The model session backing this decoder.
    pub fn model(&self) -> &dyn AsrModel {
        self.model.as_ref()
    }

    /// Give the model session back, consuming the decoder.
    pub fn into_model(self) -> Box<dyn AsrModel> {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamscribe_config::FeatureConfig;

    use crate::model::mock::MockAsrModel;

    fn symbols() -> Arc<SymbolTable> {
        Arc::new(SymbolTable::from_tokens(
            ["<blank>", "\u{2581}ri", "ver", "\u{2581}di", "<sos/eos>"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ))
    }

    fn decoder_with(model: MockAsrModel, config: DecodeConfig) -> StreamingDecoder {
        StreamingDecoder::new(Box::new(model), symbols(), None, config, 10)
    }

    fn audio(ms: usize) -> Vec<f32> {
        (0..ms * 16).map(|i| (i as f32 * 0.02).sin() * 900.0).collect()
    }

    #[test]
    fn test_short_utterance_chunk_accounting() {
        // 1.28 s -> 126 frames -> one full 64-frame chunk plus a tail
        let mut features = FeaturePipeline::new(&FeatureConfig::default());
        features.accept_pcm(&audio(1280));
        features.set_input_finished();

        let mut decoder = decoder_with(MockAsrModel::new(5), DecodeConfig::default());
        assert_eq!(decoder.decode(&mut features).unwrap(), DecodeState::EndBatch);
        assert_eq!(decoder.decode(&mut features).unwrap(), DecodeState::EndBatch);
        assert_eq!(decoder.decode(&mut features).unwrap(), DecodeState::EndFeats);
        assert_eq!(decoder.decode(&mut features).unwrap(), DecodeState::EndFeats);
    }

    #[test]
    fn test_wait_feats_until_audio_arrives() {
        let mut features = FeaturePipeline::new(&FeatureConfig::default());
        features.accept_pcm(&audio(100));

        let mut decoder = decoder_with(MockAsrModel::new(5), DecodeConfig::default());
        assert_eq!(decoder.decode(&mut features).unwrap(), DecodeState::WaitFeats);

        features.accept_pcm(&audio(1200));
        assert_eq!(decoder.decode(&mut features).unwrap(), DecodeState::EndBatch);
    }

    #[test]
    fn test_final_result_with_timestamps() {
        // "river diver": ▁ri ver ▁di ver emitted on frames 0..=3
        let mut script = Vec::new();
        for token in [1usize, 2, 3, 2] {
            let mut row = vec![-9.0f32; 5];
            row[token] = -0.01;
            script.push(row);
        }
        let model = MockAsrModel::new(5).with_script(script);

        let mut features = FeaturePipeline::new(&FeatureConfig::default());
        features.accept_pcm(&audio(1280));
        features.set_input_finished();

        let config = DecodeConfig {
            enable_timestamps: true,
            ..DecodeConfig::default()
        };
        let mut decoder = decoder_with(model, config);
        while decoder.decode(&mut features).unwrap() != DecodeState::EndFeats {}
        decoder.rescoring().unwrap();

        let result = decoder.build_result(ResultKind::Final);
        assert!(result.is_final());
        assert_eq!(result.sentence(), "river diver");

        // continuation tokens merge into their word: one piece per word
        let pieces = result.nbest[0].word_pieces.as_ref().unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].word, "river");
        assert_eq!(pieces[1].word, "diver");
        // subsampling 4 x 10 ms shift: ▁di is emitted on frame 2
        assert_eq!(pieces[0].start, 0);
        assert_eq!(pieces[0].end, 80);
        assert_eq!(pieces[1].start, 80);
        for pair in pieces.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    #[test]
    fn test_rescoring_reorders_beam() {
        // CTC slightly prefers "diver"; the attention pass flips it
        let mut row_first = vec![-9.0f32; 5];
        row_first[3] = -0.6; // ▁di
        row_first[1] = -0.8; // ▁ri
        let mut row_ver = vec![-9.0f32; 5];
        row_ver[2] = -0.01;

        fn favor_river(hyp: &[i32]) -> f32 {
            if hyp.first() == Some(&1) {
                2.0
            } else {
                -2.0
            }
        }

        let model = MockAsrModel::new(5)
            .with_script(vec![row_first, row_ver])
            .with_rescore(favor_river);

        let mut features = FeaturePipeline::new(&FeatureConfig::default());
        features.accept_pcm(&audio(1280));
        features.set_input_finished();

        let config = DecodeConfig {
            nbest: 2,
            ..DecodeConfig::default()
        };
        let mut decoder = decoder_with(model, config);
        while decoder.decode(&mut features).unwrap() != DecodeState::EndFeats {}

        let partial = decoder.build_result(ResultKind::Partial);
        assert_eq!(partial.sentence(), "diver");

        decoder.rescoring().unwrap();
        let result = decoder.build_result(ResultKind::Final);
        assert_eq!(result.sentence(), "river");
        assert_eq!(result.nbest.len(), 2);
    }

    #[test]
    fn test_reset_gives_a_fresh_stream() {
        let mut features = FeaturePipeline::new(&FeatureConfig::default());
        features.accept_pcm(&audio(1280));
        features.set_input_finished();

        let mut decoder = decoder_with(MockAsrModel::new(5), DecodeConfig::default());
        while decoder.decode(&mut features).unwrap() != DecodeState::EndFeats {}
        decoder.rescoring().unwrap();

        features.reset();
        decoder.reset();

        features.accept_pcm(&audio(1280));
        features.set_input_finished();
        assert_eq!(decoder.decode(&mut features).unwrap(), DecodeState::EndBatch);
        let result = decoder.build_result(ResultKind::Partial);
        assert_eq!(result.kind, ResultKind::Partial);
    }
}
