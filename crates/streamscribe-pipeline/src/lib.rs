//! Streaming speech recognition pipeline
//!
//! The pipeline turns a live stream of 16 kHz mono PCM into incremental
//! hypotheses and a final rescored transcript:
//! - Feature pipeline: PCM → log-mel fbank frames, buffered per chunk
//! - Model adapter: chunked encoder + CTC head + attention rescorer with
//!   streaming caches, executed through ONNX Runtime
//! - Context graph: weighted prefix automaton over biasing phrases
//! - CTC prefix-beam search over per-frame log-probabilities
//! - Streaming decoder and recognizer façade driving the loop
//!
//! Everything runs on the caller's thread; one recognizer handles one
//! stream at a time. Concurrent streams use [`Recognizer::fork`].

pub mod context;
pub mod decoder;
pub mod features;
pub mod model;
pub mod recognizer;
pub mod search;
pub mod symbol;

pub use context::ContextGraph;
pub use decoder::{DecodeState, StreamingDecoder};
pub use features::{ChunkRead, FeaturePipeline};
pub use model::{AsrModel, ModelMeta, ModelResource, OnnxAsrModel};
pub use recognizer::Recognizer;
pub use search::{BeamHypothesis, CtcPrefixBeamSearch};
pub use symbol::SymbolTable;
