//! Recognizer configuration

use serde::{Deserialize, Serialize};

/// Top-level recognizer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Feature extraction configuration
    #[serde(default)]
    pub features: FeatureConfig,

    /// Decode loop configuration
    #[serde(default)]
    pub decode: DecodeConfig,

    /// Context biasing configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Inference engine configuration
    #[serde(default)]
    pub model: ModelConfig,
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Input sample rate (must be 16000)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of mel frequency bins
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,

    /// Analysis window length in milliseconds
    #[serde(default = "default_frame_length_ms")]
    pub frame_length_ms: u32,

    /// Window advance in milliseconds
    #[serde(default = "default_frame_shift_ms")]
    pub frame_shift_ms: u32,
}

fn default_sample_rate() -> u32 {
    16000
}
fn default_num_bins() -> usize {
    80
}
fn default_frame_length_ms() -> u32 {
    25
}
fn default_frame_shift_ms() -> u32 {
    10
}

impl FeatureConfig {
    /// Window length in samples
    pub fn frame_length(&self) -> usize {
        (self.sample_rate as usize * self.frame_length_ms as usize) / 1000
    }

    /// Window advance in samples
    pub fn frame_shift(&self) -> usize {
        (self.sample_rate as usize * self.frame_shift_ms as usize) / 1000
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            num_bins: default_num_bins(),
            frame_length_ms: default_frame_length_ms(),
            frame_shift_ms: default_frame_shift_ms(),
        }
    }
}

/// Decode loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Beam width of the CTC prefix-beam search
    #[serde(default = "default_beam_size")]
    pub beam_size: usize,

    /// Number of hypotheses reported in final results
    #[serde(default = "default_nbest")]
    pub nbest: usize,

    /// Attach word-level timing to final results
    #[serde(default)]
    pub enable_timestamps: bool,

    /// Weight of the CTC score when combined with the attention score
    /// during rescoring
    #[serde(default = "default_ctc_weight")]
    pub ctc_weight: f32,

    /// Weight of the right-to-left decoder pass (0.0 disables it)
    #[serde(default)]
    pub reverse_weight: f32,
}

fn default_beam_size() -> usize {
    10
}
fn default_nbest() -> usize {
    1
}
fn default_ctc_weight() -> f32 {
    0.5
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            beam_size: default_beam_size(),
            nbest: default_nbest(),
            enable_timestamps: false,
            ctc_weight: default_ctc_weight(),
            reverse_weight: 0.0,
        }
    }
}

/// Context biasing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Score added per matched token of a biasing phrase
    #[serde(default = "default_context_score")]
    pub context_score: f32,
}

fn default_context_score() -> f32 {
    3.0
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_score: default_context_score(),
        }
    }
}

/// Inference engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Intra-op and inter-op thread count for the engine's thread pools
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
}

fn default_num_threads() -> usize {
    1
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_threads: default_num_threads(),
        }
    }
}
