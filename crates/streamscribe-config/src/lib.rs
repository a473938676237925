//! Configuration for the streamscribe recognizer
//!
//! All settings deserialize from JSON/TOML with per-field defaults, so a
//! partial document (or none at all) yields a working configuration.

mod recognizer;

pub use recognizer::{
    ContextConfig, DecodeConfig, FeatureConfig, ModelConfig, RecognizerConfig,
};
