//! Model adapter
//!
//! Owns the inference sessions and the streaming caches, and exposes the
//! two calls the decode loop needs: chunked encoding into CTC
//! log-probabilities, and attention rescoring of finished hypotheses.
//! The decode loop only sees the [`AsrModel`] trait, so graphs exported
//! for other runtimes (or the scripted [`mock::MockAsrModel`]) plug in
//! behind the same seam.

pub mod mock;
mod onnx;

pub use onnx::{ModelResource, OnnxAsrModel};

use streamscribe_core::Result;

/// Immutable properties embedded in the encoder graph's metadata.
#[derive(Debug, Clone)]
pub struct ModelMeta {
    /// Encoder output dimension
    pub output_size: usize,
    /// Number of encoder blocks
    pub num_blocks: usize,
    /// Attention heads per block
    pub head: usize,
    /// Depthwise convolution kernel size
    pub cnn_module_kernel: usize,
    /// Feature frames per encoder output frame
    pub subsampling_rate: usize,
    /// Trailing feature frames re-fed to the next chunk for causal
    /// convolution lookahead
    pub right_context: usize,
    /// Start-of-sentence token id
    pub sos: i64,
    /// End-of-sentence token id
    pub eos: i64,
    /// The rescoring decoder also runs right-to-left
    pub is_bidirectional_decoder: bool,
    /// Encoder chunk length in subsampled frames
    pub chunk_size: usize,
    /// History chunks visible to attention; <= 0 means unlimited
    pub num_left_chunks: i64,
}

impl ModelMeta {
    /// Attention cache length in subsampled frames (0 when history is
    /// unlimited and the cache grows instead).
    pub fn required_cache_size(&self) -> usize {
        if self.num_left_chunks > 0 {
            self.chunk_size * self.num_left_chunks as usize
        } else {
            0
        }
    }

    /// Feature frames consumed per encoder chunk.
    pub fn frames_per_chunk(&self) -> usize {
        self.chunk_size * self.subsampling_rate
    }
}

/// Inference backend behind the streaming decoder.
///
/// One instance holds the mutable per-stream state; the heavyweight
/// read-only parts (graphs, metadata) are shared between instances, so
/// `duplicate` is cheap and yields a session reset for a new stream.
pub trait AsrModel: Send {
    fn meta(&self) -> &ModelMeta;

    /// Zero the streaming caches for a new stream.
    fn reset(&mut self);

    /// Encode one chunk of fbank frames and return per-frame CTC
    /// log-probabilities over the vocabulary.
    fn forward_encoder_chunk(&mut self, frames: &[Vec<f32>]) -> Result<Vec<Vec<f32>>>;

    /// Score hypotheses against the accumulated encoder output with the
    /// attention decoder. `reverse_weight` blends in the right-to-left
    /// pass on bidirectional models.
    fn attention_rescore(&mut self, hyps: &[Vec<i32>], reverse_weight: f32) -> Result<Vec<f32>>;

    /// Fresh session over the same shared resource.
    fn duplicate(&self) -> Box<dyn AsrModel>;
}
