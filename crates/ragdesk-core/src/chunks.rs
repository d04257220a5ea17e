//! Splits document text into overlapping chunks for embedding and search.
//!
//! Separators are tried coarsest first (paragraph, line, word, character). Pieces that
//! still do not fit are split again with the next separator; small pieces are merged
//! back together up to `chunk_size`, repeating the tail of one chunk at the head of the
//! next for `chunk_overlap` characters. Sizes are counted in characters, not bytes.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::documents::Document;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Paragraph break, line break, space, then single characters.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// A chunk of text from a document, with source reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source: PathBuf,
    /// Index of this chunk within its document (0, 1, 2, …).
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks. Must be below `chunk_size`.
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkError> {
        let config = Self {
            chunk_size,
            chunk_overlap,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::InvalidOverlap {
                overlap: self.chunk_overlap,
                size: self.chunk_size,
            });
        }
        Ok(())
    }
}

/// Chunk a single document's text.
pub fn chunk_document(document: &Document, config: &ChunkConfig) -> Result<Vec<Chunk>, ChunkError> {
    config.validate()?;
    let splitter = Splitter { config };
    let chunks = splitter
        .split(&document.text, &config.separators)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            text,
            source: document.source.clone(),
            index,
        })
        .collect();
    Ok(chunks)
}

/// Chunk all documents. Returns chunks from all documents in order.
pub fn chunk_documents(documents: &[Document], config: &ChunkConfig) -> Result<Vec<Chunk>, ChunkError> {
    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(chunk_document(document, config)?);
    }
    Ok(chunks)
}

struct Splitter<'a> {
    config: &'a ChunkConfig,
}

impl Splitter<'_> {
    fn split(&self, text: &str, separators: &[String]) -> Vec<String> {
        // Pick the first separator present in the text; "" always matches.
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep.as_str();
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut out = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();
        for piece in split_on(text, separator) {
            if char_len(piece) < self.config.chunk_size {
                fitting.push(piece);
                continue;
            }
            if !fitting.is_empty() {
                out.extend(self.merge(&fitting, separator));
                fitting.clear();
            }
            if finer.is_empty() {
                out.extend(hard_split(piece, self.config.chunk_size));
            } else {
                out.extend(self.split(piece, finer));
            }
        }
        if !fitting.is_empty() {
            out.extend(self.merge(&fitting, separator));
        }
        out
    }

    /// Greedily packs pieces into chunks, keeping up to `chunk_overlap` characters of
    /// trailing pieces as the start of the following chunk.
    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let sep_len = char_len(separator);

        let mut out = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            let joiner = if current.is_empty() { 0 } else { sep_len };
            if total + len + joiner > size && !current.is_empty() {
                push_joined(&mut out, &current, separator);
                // Drop leading pieces until only the overlap remains and the next piece fits.
                while total > overlap || (total > 0 && total + len + sep_len > size) {
                    let Some(front) = current.pop_front() else {
                        break;
                    };
                    total -= char_len(front) + if current.is_empty() { 0 } else { sep_len };
                }
            }
            total += len + if current.is_empty() { 0 } else { sep_len };
            current.push_back(piece);
        }
        push_joined(&mut out, &current, separator);
        out
    }
}

fn push_joined(out: &mut Vec<String>, pieces: &VecDeque<&str>, separator: &str) {
    let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn split_on<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }
    text.split(separator).filter(|s| !s.is_empty()).collect()
}

/// Last resort when no finer separator is configured: cut on character boundaries.
fn hard_split(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk overlap ({overlap}) must be smaller than chunk size ({size})")]
    InvalidOverlap { overlap: usize, size: usize },
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn doc(text: &str) -> Document {
        Document {
            text: text.to_string(),
            source: PathBuf::from("test.txt"),
        }
    }

    #[test]
    fn chunk_short_document() {
        let c = chunk_document(&doc("One paragraph."), &ChunkConfig::default()).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].text, "One paragraph.");
        assert_eq!(c[0].index, 0);
        assert_eq!(c[0].source, PathBuf::from("test.txt"));
    }

    #[test]
    fn paragraphs_merge_until_full() {
        let config = ChunkConfig::new(10, 0).unwrap();
        let c = chunk_document(&doc("P1\n\nP2\n\nP3\n\nP4"), &config).unwrap();
        let texts: Vec<_> = c.iter().map(|ch| ch.text.as_str()).collect();
        assert_eq!(texts, vec!["P1\n\nP2\n\nP3", "P4"]);
    }

    #[test]
    fn words_overlap_between_chunks() {
        let config = ChunkConfig::new(11, 5).unwrap();
        let c = chunk_document(&doc("aaa bbb ccc ddd eee"), &config).unwrap();
        let texts: Vec<_> = c.iter().map(|ch| ch.text.as_str()).collect();
        assert_eq!(texts, vec!["aaa bbb ccc", "ccc ddd eee"]);
        assert_eq!(c[1].index, 1);
    }

    #[test]
    fn long_word_falls_back_to_characters() {
        let config = ChunkConfig::new(200, 20).unwrap();
        let c = chunk_document(&doc(&"a".repeat(600)), &config).unwrap();
        assert!(c.len() >= 3);
        assert!(c.iter().all(|ch| ch.text.chars().count() <= 200));
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let config = ChunkConfig::new(5, 1).unwrap();
        let text = "héllo wörld ünïcödé ß漢字かな";
        let c = chunk_document(&doc(text), &config).unwrap();
        assert!(!c.is_empty());
        assert!(c.iter().all(|ch| ch.text.chars().count() <= 5));
    }

    #[test]
    fn whitespace_only_document_has_no_chunks() {
        let c = chunk_document(&doc("  \n\n \n "), &ChunkConfig::default()).unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_size() {
        assert_eq!(
            ChunkConfig::new(100, 100),
            Err(ChunkError::InvalidOverlap { overlap: 100, size: 100 })
        );
        assert_eq!(ChunkConfig::new(0, 0), Err(ChunkError::ZeroChunkSize));

        let bad = ChunkConfig {
            chunk_size: 10,
            chunk_overlap: 50,
            ..ChunkConfig::default()
        };
        assert!(chunk_document(&doc("anything"), &bad).is_err());
    }

    #[test]
    fn chunk_documents_keeps_document_order() {
        let docs = vec![
            Document {
                text: "first".into(),
                source: PathBuf::from("a.txt"),
            },
            Document {
                text: "second".into(),
                source: PathBuf::from("b.txt"),
            },
        ];
        let c = chunk_documents(&docs, &ChunkConfig::default()).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].source, PathBuf::from("a.txt"));
        assert_eq!(c[1].text, "second");
        assert_eq!(c[1].index, 0);
    }
}
