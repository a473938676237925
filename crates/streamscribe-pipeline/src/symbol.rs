//! Symbol table for the decoder's output vocabulary
//!
//! Loaded from a text file with one `token id` entry per line, separated
//! by whitespace. Id 0 is reserved for the CTC blank. Subword tokens
//! follow the sentencepiece convention: a leading `▁` marks a word
//! boundary.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use streamscribe_core::{Error, Result};

/// Token id reserved for the CTC blank.
pub const BLANK_ID: i32 = 0;

const WORD_BOUNDARY: char = '\u{2581}';

/// Token ↔ id mapping shared by the searcher, the context graph, and
/// result assembly.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    tokens: Vec<String>,
    token_to_id: HashMap<String, i32>,
}

impl SymbolTable {
    /// Read a symbol table from a `token id` text file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read symbol table {}: {}", path.display(), e))
        })?;

        let mut entries: Vec<(String, usize)> = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let token = match parts.next() {
                Some(token) => token.to_string(),
                None => continue,
            };
            let id = parts
                .next()
                .and_then(|id| id.parse::<usize>().ok())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "malformed symbol table line {}: {:?}",
                        line_no + 1,
                        line
                    ))
                })?;
            entries.push((token, id));
        }

        if entries.is_empty() {
            return Err(Error::config("symbol table is empty"));
        }

        let max_id = entries.iter().map(|(_, id)| *id).max().unwrap_or(0);
        let mut tokens = vec![String::new(); max_id + 1];
        for (token, id) in entries {
            tokens[id] = token;
        }

        Ok(Self::from_tokens(tokens))
    }

    /// Build a symbol table from an ordered token list (index = id).
    pub fn from_tokens(tokens: Vec<String>) -> Self {
        let token_to_id = tokens
            .iter()
            .enumerate()
            .filter(|(_, token)| !token.is_empty())
            .map(|(id, token)| (token.clone(), id as i32))
            .collect();

        Self {
            tokens,
            token_to_id,
        }
    }

    /// Get token by id
    pub fn token(&self, id: i32) -> Option<&str> {
        self.tokens.get(id as usize).map(|s| s.as_str())
    }

    /// Get id by token
    pub fn id(&self, token: &str) -> Option<i32> {
        self.token_to_id.get(token).copied()
    }

    /// Vocabulary size (highest id + 1)
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokenize a phrase into symbol ids by greedy longest match.
    ///
    /// Whitespace-separated words are matched in their word-initial form
    /// first (`▁word…`), falling back to the bare form. A span that
    /// matches no token is a configuration error.
    pub fn tokenize(&self, phrase: &str) -> Result<Vec<i32>> {
        let mut ids = Vec::new();
        for word in phrase.split_whitespace() {
            let spelled = format!("{}{}", WORD_BOUNDARY, word);
            let mut rest = spelled.as_str();
            while !rest.is_empty() {
                let (id, consumed) = self.longest_match(rest).ok_or_else(|| {
                    Error::Config(format!(
                        "context phrase {:?} has no token covering {:?}",
                        phrase, rest
                    ))
                })?;
                ids.push(id);
                rest = &rest[consumed..];
            }
        }
        Ok(ids)
    }

    /// Longest token matching a prefix of `text`, trying the bare form
    /// when nothing word-initial matches.
    fn longest_match(&self, text: &str) -> Option<(i32, usize)> {
        let mut boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, c)| i + c.len_utf8())
            .collect();
        boundaries.reverse();

        for &end in &boundaries {
            if let Some(id) = self.id(&text[..end]) {
                return Some((id, end));
            }
        }
        // strip the boundary marker and retry
        if let Some(stripped) = text.strip_prefix(WORD_BOUNDARY) {
            return self
                .longest_match(stripped)
                .map(|(id, consumed)| (id, consumed + WORD_BOUNDARY.len_utf8()));
        }
        None
    }

    /// Join token ids into a sentence, mapping `▁` to word boundaries.
    pub fn join(&self, ids: &[i32]) -> String {
        let mut sentence = String::new();
        for &id in ids {
            if let Some(token) = self.token(id) {
                sentence.push_str(token);
            }
        }
        sentence
            .replace(WORD_BOUNDARY, " ")
            .trim()
            .to_string()
    }

    /// Whether this token begins a new word (carries the leading `▁`).
    pub fn starts_word(&self, id: i32) -> bool {
        self.token(id)
            .map_or(false, |token| token.starts_with(WORD_BOUNDARY))
    }

    /// Display form of a single token for word-piece output.
    pub fn piece(&self, id: i32) -> String {
        self.token(id)
            .unwrap_or("")
            .replace(WORD_BOUNDARY, " ")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table() -> SymbolTable {
        SymbolTable::from_tokens(
            ["<blank>", "<unk>", "\u{2581}ri", "ver", "\u{2581}di", "\u{2581}a", "<sos/eos>"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    #[test]
    fn test_read_token_id_lines() {
        let file = tempfile_path("units");
        {
            let mut f = fs::File::create(&file).unwrap();
            writeln!(f, "<blank> 0").unwrap();
            writeln!(f, "<unk> 1").unwrap();
            writeln!(f, "\u{2581}ri 2").unwrap();
            writeln!(f).unwrap();
            writeln!(f, "ver 3").unwrap();
        }
        let table = SymbolTable::read(&file).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.token(0), Some("<blank>"));
        assert_eq!(table.id("ver"), Some(3));
        fs::remove_file(file).ok();
    }

    #[test]
    fn test_read_rejects_malformed_line() {
        let file = tempfile_path("units_bad");
        fs::write(&file, "<blank> 0\nno_id_here\n").unwrap();
        let err = SymbolTable::read(&file).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        fs::remove_file(file).ok();
    }

    #[test]
    fn test_tokenize_greedy() {
        let table = table();
        assert_eq!(table.tokenize("river").unwrap(), vec![2, 3]);
        assert_eq!(table.tokenize("diver").unwrap(), vec![4, 3]);
        assert_eq!(table.tokenize("a river").unwrap(), vec![5, 2, 3]);
    }

    #[test]
    fn test_tokenize_unknown_span() {
        let table = table();
        let err = table.tokenize("xyzzy").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_join_and_piece() {
        let table = table();
        assert_eq!(table.join(&[2, 3]), "river");
        assert_eq!(table.join(&[5, 2, 3]), "a river");
        assert_eq!(table.piece(2), "ri");
        assert_eq!(table.join(&[]), "");
    }

    #[test]
    fn test_starts_word() {
        let table = table();
        assert!(table.starts_word(2)); // ▁ri
        assert!(!table.starts_word(3)); // ver
        assert!(!table.starts_word(99)); // out of range
    }

    fn tempfile_path(stem: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("streamscribe_{}_{}.txt", stem, std::process::id()))
    }
}
