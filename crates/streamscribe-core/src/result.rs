//! Decode result records
//!
//! The recognizer reports results as an ordered n-best list. Partial
//! results are emitted while the stream is live; the final result is
//! emitted once after attention rescoring and carries word-level timing
//! when timestamps are enabled.

use serde::{Deserialize, Serialize};

/// Whether a result is an in-stream partial or the post-rescoring final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    #[serde(rename = "partial_result")]
    Partial,
    #[serde(rename = "final_result")]
    Final,
}

/// One recognized word piece with its time span in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordPiece {
    pub word: String,
    pub start: u64,
    pub end: u64,
}

impl WordPiece {
    pub fn new(word: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            word: word.into(),
            start,
            end,
        }
    }
}

/// One n-best entry. `word_pieces` is present only on final results with
/// timestamps enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NbestEntry {
    pub sentence: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_pieces: Option<Vec<WordPiece>>,
}

/// Result document returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeResult {
    #[serde(rename = "type")]
    pub kind: ResultKind,
    pub nbest: Vec<NbestEntry>,
}

impl DecodeResult {
    pub fn new(kind: ResultKind, nbest: Vec<NbestEntry>) -> Self {
        Self { kind, nbest }
    }

    pub fn is_final(&self) -> bool {
        self.kind == ResultKind::Final
    }

    /// Top-ranked sentence, empty when nothing was recognized.
    pub fn sentence(&self) -> &str {
        self.nbest.first().map(|e| e.sentence.as_str()).unwrap_or("")
    }
}
