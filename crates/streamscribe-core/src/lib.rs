//! Core types for the streamscribe recognizer
//!
//! This crate provides foundational types used across the other crates:
//! - Error types
//! - Decode result records and their JSON shape
//! - PCM sample conversion

pub mod audio;
pub mod error;
pub mod result;

pub use error::{Error, Result};
pub use result::{DecodeResult, NbestEntry, ResultKind, WordPiece};
