//! Recognizer façade
//!
//! The caller-facing surface of the pipeline: push little-endian 16-bit
//! PCM in, read partial/final result documents out. One recognizer
//! handles one stream at a time; `fork` creates independent recognizers
//! over the same shared model resource.
//!
//! Configuration freezes at the first `decode` call of a stream (the
//! searcher and the context graph are built lazily there) and thaws at
//! `reset`, so setters called mid-stream take effect on the next stream.

use std::path::Path;
use std::sync::Arc;

use streamscribe_config::RecognizerConfig;
use streamscribe_core::{audio, DecodeResult, Error, Result, ResultKind};

use crate::context::ContextGraph;
use crate::decoder::{DecodeState, StreamingDecoder};
use crate::features::FeaturePipeline;
use crate::model::{AsrModel, ModelResource, OnnxAsrModel};
use crate::symbol::SymbolTable;

/// Streaming speech recognizer.
pub struct Recognizer {
    config: RecognizerConfig,
    symbols: Arc<SymbolTable>,
    features: FeaturePipeline,
    /// Holds the model session until the first decode hands it to the
    /// decoder; `reset` moves it back.
    model: Option<Box<dyn AsrModel>>,
    decoder: Option<StreamingDecoder>,
    context_phrases: Vec<String>,
    result: Option<DecodeResult>,
    poisoned: bool,
}

impl Recognizer {
    /// Load the model directory (`encoder.onnx`, `ctc.onnx`,
    /// `decoder.onnx`, `units.txt`) with the default configuration.
    pub fn new(model_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(model_dir, RecognizerConfig::default())
    }

    pub fn with_config(model_dir: impl AsRef<Path>, config: RecognizerConfig) -> Result<Self> {
        let dir = model_dir.as_ref();
        let resource = Arc::new(ModelResource::load(dir, &config.model)?);
        let symbols = Arc::new(SymbolTable::read(dir.join("units.txt"))?);
        let model: Box<dyn AsrModel> = Box::new(OnnxAsrModel::new(resource));
        Ok(Self::assemble(model, symbols, config))
    }

    /// Build a recognizer over any inference backend.
    pub fn with_model(
        model: Box<dyn AsrModel>,
        symbols: Arc<SymbolTable>,
        config: RecognizerConfig,
    ) -> Self {
        Self::assemble(model, symbols, config)
    }

    fn assemble(
        model: Box<dyn AsrModel>,
        symbols: Arc<SymbolTable>,
        config: RecognizerConfig,
    ) -> Self {
        let features = FeaturePipeline::new(&config.features);
        Self {
            config,
            symbols,
            features,
            model: Some(model),
            decoder: None,
            context_phrases: Vec::new(),
            result: None,
            poisoned: false,
        }
    }

    /// Number of hypotheses in final results. Effective from the next
    /// stream once decoding has started.
    pub fn set_nbest(&mut self, nbest: usize) {
        self.config.decode.nbest = nbest.max(1);
    }

    /// Attach word-level timing to final results.
    pub fn set_enable_timestamps(&mut self, enable: bool) {
        self.config.decode.enable_timestamps = enable;
    }

    /// Register a biasing phrase.
    pub fn add_context(&mut self, phrase: impl Into<String>) {
        self.context_phrases.push(phrase.into());
    }

    /// Score added per matched token of a biasing phrase.
    pub fn set_context_score(&mut self, score: f32) {
        self.config.context.context_score = score;
    }

    /// Feed little-endian signed 16-bit PCM and drive the decode loop
    /// until it needs more audio or the stream ends. Pass `last = true`
    /// with the final bytes (an empty slice is fine).
    pub fn decode(&mut self, pcm: &[u8], last: bool) -> Result<()> {
        if self.poisoned {
            return Err(Error::invalid_input(
                "recognizer is poisoned by an inference failure; call reset() first",
            ));
        }

        let samples = audio::pcm_to_floats(pcm)?;
        self.ensure_decoder()?;

        self.features.accept_pcm(&samples);
        if last {
            self.features.set_input_finished();
        }

        let outcome = self.drive();
        if let Err(Error::Inference(_)) = &outcome {
            self.poisoned = true;
            tracing::warn!("inference failed mid-stream; recognizer poisoned until reset");
        }
        outcome
    }

    /// Build the decoder on the first decode of a stream so that context
    /// phrases registered after construction still take effect.
    fn ensure_decoder(&mut self) -> Result<()> {
        if self.decoder.is_some() {
            return Ok(());
        }
        let context = if self.context_phrases.is_empty() {
            None
        } else {
            Some(ContextGraph::build(
                &self.context_phrases,
                &self.symbols,
                &self.config.context,
            )?)
        };
        let model = self
            .model
            .take()
            .ok_or_else(|| Error::internal("model session missing"))?;
        self.decoder = Some(StreamingDecoder::new(
            model,
            self.symbols.clone(),
            context,
            self.config.decode.clone(),
            self.config.features.frame_shift_ms,
        ));
        Ok(())
    }

    fn drive(&mut self) -> Result<()> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| Error::internal("decoder not built"))?;

        loop {
            match decoder.decode(&mut self.features)? {
                DecodeState::WaitFeats => break,
                DecodeState::EndFeats => {
                    decoder.rescoring()?;
                    self.result = Some(decoder.build_result(ResultKind::Final));
                    break;
                }
                DecodeState::EndBatch | DecodeState::Endpoint => {
                    self.result = Some(decoder.build_result(ResultKind::Partial));
                }
            }
        }
        Ok(())
    }

    /// The latest successfully computed result, if any.
    pub fn result(&self) -> Option<&DecodeResult> {
        self.result.as_ref()
    }

    /// The latest result serialized as a JSON document.
    pub fn result_json(&self) -> Result<String> {
        let result = self
            .result
            .as_ref()
            .ok_or_else(|| Error::invalid_input("no result available yet"))?;
        serde_json::to_string(result).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Rewind to the pre-stream state, preserving configuration and
    /// registered context phrases. Clears poisoning.
    pub fn reset(&mut self) {
        self.features.reset();
        if let Some(decoder) = self.decoder.take() {
            let mut model = decoder.into_model();
            model.reset();
            self.model = Some(model);
        }
        self.result = None;
        self.poisoned = false;
    }

    /// An independent recognizer over the same shared model resource,
    /// with this recognizer's configuration and context phrases.
    pub fn fork(&self) -> Self {
        let model = match (&self.model, &self.decoder) {
            (Some(model), _) => model.duplicate(),
            (None, Some(decoder)) => decoder.model().duplicate(),
            (None, None) => unreachable!("recognizer always holds a session"),
        };
        let mut copy = Self::assemble(model, self.symbols.clone(), self.config.clone());
        copy.context_phrases = self.context_phrases.clone();
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamscribe_core::audio::floats_to_pcm;

    use crate::model::mock::MockAsrModel;

    fn symbols() -> Arc<SymbolTable> {
        Arc::new(SymbolTable::from_tokens(
            ["<blank>", "\u{2581}ri", "ver", "\u{2581}di", "<sos/eos>"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ))
    }

    fn recognizer_with(model: MockAsrModel) -> Recognizer {
        Recognizer::with_model(Box::new(model), symbols(), RecognizerConfig::default())
    }

    fn pcm(ms: usize) -> Vec<u8> {
        let samples: Vec<f32> = (0..ms * 16)
            .map(|i| (i as f32 * 0.02).sin() * 900.0)
            .collect();
        floats_to_pcm(&samples)
    }

    #[test]
    fn test_odd_byte_count_is_invalid_input() {
        let mut recognizer = recognizer_with(MockAsrModel::new(5));
        let err = recognizer.decode(&[0u8, 1, 2], false).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        // recoverable: an even buffer decodes fine after reset
        recognizer.reset();
        recognizer.decode(&pcm(1280), true).unwrap();
        assert!(recognizer.result().unwrap().is_final());
    }

    #[test]
    fn test_silence_yields_empty_final_sentence() {
        let mut recognizer = recognizer_with(MockAsrModel::new(5));
        let silence = vec![0u8; 2 * 32000]; // 2 s of zero PCM
        recognizer.decode(&silence, true).unwrap();

        let result = recognizer.result().unwrap();
        assert!(result.is_final());
        assert!(!result.nbest.is_empty());
        assert_eq!(result.sentence(), "");
    }

    #[test]
    fn test_streaming_partial_then_final() {
        let mut recognizer = recognizer_with(MockAsrModel::new(5));

        recognizer.decode(&pcm(800), false).unwrap();
        let partial = recognizer.result().unwrap().clone();
        assert_eq!(partial.kind, ResultKind::Partial);

        recognizer.decode(&pcm(800), true).unwrap();
        let final_result = recognizer.result().unwrap();
        assert!(final_result.is_final());
    }

    #[test]
    fn test_result_json_shape() {
        let mut recognizer = recognizer_with(MockAsrModel::new(5));
        recognizer.decode(&pcm(1280), true).unwrap();
        let json = recognizer.result_json().unwrap();
        assert!(json.starts_with(r#"{"type":"final_result","nbest":"#));
    }

    #[test]
    fn test_mid_stream_reset_matches_fresh_recognizer() {
        let mut recognizer = recognizer_with(MockAsrModel::new(5));
        recognizer.decode(&pcm(800), false).unwrap();
        recognizer.reset();
        assert!(recognizer.result().is_none());
        recognizer.decode(&pcm(800), true).unwrap();

        let mut fresh = recognizer_with(MockAsrModel::new(5));
        fresh.decode(&pcm(800), true).unwrap();

        assert_eq!(
            recognizer.result_json().unwrap(),
            fresh.result_json().unwrap()
        );
    }

    #[test]
    fn test_fork_decodes_independently() {
        let mut recognizer = recognizer_with(MockAsrModel::new(5));
        recognizer.decode(&pcm(800), false).unwrap();

        let mut forked = recognizer.fork();
        forked.decode(&pcm(1280), true).unwrap();
        assert!(forked.result().unwrap().is_final());

        // the original stream is unaffected
        assert_eq!(recognizer.result().unwrap().kind, ResultKind::Partial);
    }

    #[test]
    fn test_context_bias_flips_top_hypothesis() {
        let mut row_first = vec![-9.0f32; 5];
        row_first[3] = -0.6; // ▁di
        row_first[1] = -0.8; // ▁ri
        let mut row_ver = vec![-9.0f32; 5];
        row_ver[2] = -0.01;
        let script = vec![row_first, row_ver];

        let mut plain = recognizer_with(MockAsrModel::new(5).with_script(script.clone()));
        plain.decode(&pcm(1280), true).unwrap();
        assert_eq!(plain.result().unwrap().sentence(), "diver");

        let mut biased = recognizer_with(MockAsrModel::new(5).with_script(script));
        biased.add_context("river");
        biased.set_context_score(5.0);
        biased.decode(&pcm(1280), true).unwrap();
        assert_eq!(biased.result().unwrap().sentence(), "river");
    }

    #[test]
    fn test_zero_context_score_is_identity() {
        let mut plain = recognizer_with(MockAsrModel::new(5));
        plain.decode(&pcm(1280), true).unwrap();

        let mut biased = recognizer_with(MockAsrModel::new(5));
        biased.add_context("river");
        biased.set_context_score(0.0);
        biased.decode(&pcm(1280), true).unwrap();

        assert_eq!(
            plain.result_json().unwrap(),
            biased.result_json().unwrap()
        );
    }

    #[test]
    fn test_unknown_context_phrase_fails_construction() {
        let mut recognizer = recognizer_with(MockAsrModel::new(5));
        recognizer.add_context("xyzzy");
        let err = recognizer.decode(&pcm(100), false).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
