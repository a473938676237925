//! Scripted inference backend
//!
//! Stands in for the ONNX graphs in tests and engine-less builds: emits
//! one pre-programmed log-probability row per `subsampling_rate` input
//! frames and scores rescoring hypotheses with a caller-supplied pure
//! function. Deterministic by construction, so decode runs are exactly
//! reproducible.

use streamscribe_core::Result;

use super::{AsrModel, ModelMeta};

/// Metadata matching a typical small streaming model.
pub fn default_meta() -> ModelMeta {
    ModelMeta {
        output_size: 256,
        num_blocks: 12,
        head: 4,
        cnn_module_kernel: 8,
        subsampling_rate: 4,
        right_context: 6,
        sos: 0,
        eos: 0,
        is_bidirectional_decoder: true,
        chunk_size: 16,
        num_left_chunks: 4,
    }
}

/// Alias kept for test readability.
pub fn test_meta(vocab_size: usize) -> ModelMeta {
    let mut meta = default_meta();
    meta.sos = vocab_size as i64 - 1;
    meta.eos = vocab_size as i64 - 1;
    meta
}

/// Deterministic scripted model.
#[derive(Clone)]
pub struct MockAsrModel {
    meta: ModelMeta,
    vocab_size: usize,
    /// One row per encoder output frame, consumed in order; blank-heavy
    /// rows follow once the script runs out.
    script: Vec<Vec<f32>>,
    cursor: usize,
    rescore: Option<fn(&[i32]) -> f32>,
    offset: i64,
}

impl MockAsrModel {
    pub fn new(vocab_size: usize) -> Self {
        let meta = test_meta(vocab_size);
        let offset = meta.required_cache_size() as i64;
        Self {
            meta,
            vocab_size,
            script: Vec::new(),
            cursor: 0,
            rescore: None,
            offset,
        }
    }

    /// Program the per-frame CTC output. Each row must cover the whole
    /// vocabulary.
    pub fn with_script(mut self, script: Vec<Vec<f32>>) -> Self {
        debug_assert!(script.iter().all(|row| row.len() == self.vocab_size));
        self.script = script;
        self
    }

    /// Program the rescoring pass as a pure function of the hypothesis.
    pub fn with_rescore(mut self, rescore: fn(&[i32]) -> f32) -> Self {
        self.rescore = Some(rescore);
        self
    }

    /// Subsampled frames consumed so far.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    fn blank_row(&self) -> Vec<f32> {
        let mut row = vec![-9.2f32; self.vocab_size];
        row[0] = -0.01;
        row
    }
}

impl AsrModel for MockAsrModel {
    fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.offset = self.meta.required_cache_size() as i64;
    }

    fn forward_encoder_chunk(&mut self, frames: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        let rows = frames.len() / self.meta.subsampling_rate;
        let mut out = Vec::with_capacity(rows);
        for _ in 0..rows {
            let row = self
                .script
                .get(self.cursor)
                .cloned()
                .unwrap_or_else(|| self.blank_row());
            self.cursor += 1;
            out.push(row);
        }
        self.offset += rows as i64;
        Ok(out)
    }

    fn attention_rescore(&mut self, hyps: &[Vec<i32>], _reverse_weight: f32) -> Result<Vec<f32>> {
        Ok(hyps
            .iter()
            .map(|hyp| self.rescore.map(|f| f(hyp)).unwrap_or(0.0))
            .collect())
    }

    fn duplicate(&self) -> Box<dyn AsrModel> {
        let mut copy = self.clone();
        copy.reset();
        Box::new(copy)
    }
}
