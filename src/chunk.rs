//! Recursive boundary-aware text chunker.
//!
//! Splits documents into [`Chunk`]s of at most `size_chunk` characters,
//! preferring the largest natural boundary available: paragraph, line,
//! sentence, word, and finally single characters.
//!
//! A document whose text already fits is passed through untouched as a
//! single chunk. Corpora made of small records (one CSV row per document)
//! are therefore never re-cut; the splitter only engages on oversized
//! inputs.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from [`SEPARATORS`] that occurs in the text.
//! 2. Split on it. Pieces that fit are queued; an oversized piece flushes the
//!    queue and is split recursively with the remaining, finer separators.
//! 3. Queued pieces are merged greedily, re-joined with their separator,
//!    into chunks of at most `size_chunk` characters.
//! 4. When a chunk is emitted, the shortest tail of its pieces that still
//!    covers `overlap` characters is carried into the next chunk, as long as
//!    the next piece still fits beside it.
//!
//! Lengths are counted in Unicode scalar values, never bytes.

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

use crate::error::RagError;
use crate::models::{Chunk, Document};

/// Boundaries tried in order, coarsest first. The empty separator splits
/// into characters.
pub const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Split every document into chunks.
///
/// Chunk order follows document order; within a document, chunks follow
/// the text. Fails with [`RagError::EmptySplit`] if `size_chunk` is zero or
/// if a non-empty document set yields no chunk at all.
pub fn split_documents(docs: &[Document], size_chunk: usize, overlap: usize) -> Result<Vec<Chunk>> {
    if size_chunk == 0 {
        return Err(RagError::EmptySplit { size_chunk }.into());
    }

    let mut chunks = Vec::new();
    for doc in docs {
        for (i, text) in split_text(&doc.text, size_chunk, overlap)
            .into_iter()
            .enumerate()
        {
            chunks.push(make_chunk(doc, i as u32, text));
        }
    }

    if chunks.is_empty() && !docs.is_empty() {
        return Err(RagError::EmptySplit { size_chunk }.into());
    }

    Ok(chunks)
}

/// Split a single text into pieces of at most `size_chunk` characters.
///
/// Text that already fits is returned as-is. Whitespace-only text yields no
/// pieces.
pub fn split_text(text: &str, size_chunk: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() || size_chunk == 0 {
        return Vec::new();
    }
    if char_len(text) <= size_chunk {
        return vec![text.to_string()];
    }
    let overlap = overlap.min(size_chunk.saturating_sub(1));
    recursive_split(text, SEPARATORS, size_chunk, overlap)
}

fn recursive_split(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let (sep, finer) = pick_separator(text, separators);

    let pieces: Vec<&str> = if sep.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(sep).filter(|p| !p.is_empty()).collect()
    };

    let mut out = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in pieces {
        if char_len(piece) <= size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, sep, size, overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            out.push(piece.to_string());
        } else {
            out.extend(recursive_split(piece, finer, size, overlap));
        }
    }

    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, sep, size, overlap));
    }

    out
}

fn pick_separator<'a>(text: &str, separators: &'a [&'a str]) -> (&'a str, &'a [&'a str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Greedily merge pieces (each at most `size` long) into chunks.
fn merge_pieces(pieces: &[&str], sep: &str, size: usize, overlap: usize) -> Vec<String> {
    let sep_len = char_len(sep);
    let mut out = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        let joined_len = |total: usize, window_len: usize| {
            total + len + if window_len > 0 { sep_len } else { 0 }
        };

        if joined_len(total, window.len()) > size && !window.is_empty() {
            push_joined(&mut out, &window, sep);

            // Keep the shortest tail that still covers `overlap`, then shed
            // more if the incoming piece would not fit beside it.
            while let Some(&(_, front_len)) = window.front() {
                let without_front = total - front_len - if window.len() > 1 { sep_len } else { 0 };
                let tail_covers_overlap = window.len() > 1 && without_front >= overlap;
                let too_big = joined_len(total, window.len()) > size;
                if tail_covers_overlap || too_big || overlap == 0 {
                    window.pop_front();
                    total = if window.is_empty() { 0 } else { without_front };
                } else {
                    break;
                }
            }
        }

        total = joined_len(total, window.len());
        window.push_back((piece, len));
    }

    if !window.is_empty() {
        push_joined(&mut out, &window, sep);
    }

    out
}

fn push_joined(out: &mut Vec<String>, window: &VecDeque<(&str, usize)>, sep: &str) {
    let joined = window
        .iter()
        .map(|(p, _)| *p)
        .collect::<Vec<_>>()
        .join(sep);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Build a [`Chunk`] carrying the document's provenance and a SHA-256
/// content hash.
fn make_chunk(doc: &Document, index: u32, text: String) -> Chunk {
    Chunk {
        hash: content_hash(&text),
        text,
        meta: doc.meta.clone(),
        chunk_index: index,
    }
}

/// Hex SHA-256 of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceKind, SourceMeta};
    use std::path::PathBuf;

    fn doc(text: &str) -> Document {
        Document {
            text: text.to_string(),
            meta: SourceMeta {
                source: PathBuf::from("quests.txt"),
                kind: SourceKind::TextFile,
            },
        }
    }

    fn long_text() -> String {
        (0..40)
            .map(|i| format!("Quest step number {} asks the hero to travel further north.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn small_text_passes_through_unmodified() {
        let text = "  title: Heal the elder\nreward: potion  ";
        let chunks = split_documents(&[doc(text)], 2000, 500).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn every_chunk_respects_size() {
        let text = long_text();
        for size in [20, 57, 100, 333] {
            let overlap = size / 4;
            let pieces = split_text(&text, size, overlap);
            assert!(pieces.len() > 1, "size {} should split", size);
            for p in &pieces {
                assert!(
                    p.chars().count() <= size,
                    "chunk of {} chars exceeds {}",
                    p.chars().count(),
                    size
                );
            }
        }
    }

    #[test]
    fn consecutive_chunks_overlap() {
        let text = long_text();
        let pieces = split_text(&text, 200, 50);
        assert!(pieces.len() > 2);
        for pair in pieces.windows(2) {
            let prev_tail: String = {
                let words: Vec<&str> = pair[0].split(' ').collect();
                words[words.len() - 1].to_string()
            };
            assert!(
                pair[1].contains(&prev_tail),
                "next chunk should repeat the tail of the previous one"
            );
        }
    }

    #[test]
    fn overlap_reaches_configured_length() {
        let text = long_text();
        let overlap = 40;
        let pieces = split_text(&text, 200, overlap);
        for pair in pieces.windows(2) {
            let shared = pair[0]
                .char_indices()
                .map(|(i, _)| &pair[0][i..])
                .find(|suffix| pair[1].starts_with(suffix))
                .map(|suffix| suffix.chars().count())
                .unwrap_or(0);
            assert!(shared >= overlap, "shared {} < overlap {}", shared, overlap);
        }
    }

    #[test]
    fn paragraphs_preferred_over_words() {
        let para = "word ".repeat(15);
        let text = format!("{}\n\n{}\n\n{}", para.trim(), para.trim(), para.trim());
        let pieces = split_text(&text, 80, 0);
        assert_eq!(pieces.len(), 3);
        for p in &pieces {
            assert!(!p.contains("\n\n"));
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(95);
        let pieces = split_text(&text, 10, 2);
        assert!(pieces.iter().all(|p| p.chars().count() <= 10));
        assert!(pieces.len() >= 10);
    }

    #[test]
    fn multibyte_text_is_counted_in_chars() {
        let text = "épée ".repeat(100);
        let pieces = split_text(&text, 30, 5);
        for p in &pieces {
            assert!(p.chars().count() <= 30);
        }
    }

    #[test]
    fn whitespace_document_yields_empty_split_error() {
        let err = split_documents(&[doc("   \n\n  ")], 100, 10).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmptySplit { .. })
        ));
    }

    #[test]
    fn zero_size_is_rejected() {
        let err = split_documents(&[doc("hello world")], 0, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::EmptySplit { size_chunk: 0 })
        ));
    }

    #[test]
    fn chunks_inherit_metadata_and_indices() {
        let chunks = split_documents(&[doc(&long_text())], 120, 20).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32);
            assert_eq!(c.meta.source, PathBuf::from("quests.txt"));
            assert_eq!(c.hash, content_hash(&c.text));
        }
    }

    #[test]
    fn deterministic() {
        let text = long_text();
        assert_eq!(split_text(&text, 90, 15), split_text(&text, 90, 15));
    }
}
