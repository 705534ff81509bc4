//! Overlapping fixed-window text chunker.
//!
//! Splits page text into [`Chunk`]s of at most `chunk_size` characters,
//! where each chunk after the first starts exactly `chunk_overlap`
//! characters before the previous chunk ended.
//!
//! # Algorithm
//!
//! 1. Work in characters (not bytes) so multi-byte text never splits
//!    inside a code point.
//! 2. Take a window of `chunk_size` characters from the current start.
//! 3. If the window does not reach the end of the text, pull its end back
//!    to a natural boundary found in the last fifth of the window:
//!    paragraph break (`\n\n`) > line break (`\n`) > other whitespace.
//! 4. The next window starts at `end - chunk_overlap`.
//!
//! The boundary search never moves the end closer than `chunk_overlap + 1`
//! characters to the start, so every step makes progress.
//!
//! # Guarantees
//!
//! - No chunk is empty; empty input yields no chunks.
//! - No chunk is longer than `chunk_size` characters.
//! - Dropping the first `chunk_overlap` characters of every chunk but the
//!   first and concatenating reproduces the input exactly.
//!
//! # Example
//!
//! ```rust
//! use pagewise_core::chunk::Chunker;
//!
//! let chunker = Chunker::new(1000, 100).unwrap();
//! let chunks = chunker.split("Paracetamol is used to treat fever and pain.");
//! assert_eq!(chunks.len(), 1);
//! ```

use anyhow::{bail, Result};

use crate::models::{Chunk, ChunkMetadata, Page};

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default number of characters shared by consecutive chunks.
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Fails if `chunk_size` is zero or `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split a page into chunks tagged with its page number and source.
    pub fn chunk_page(&self, page: &Page) -> Vec<Chunk> {
        self.split(&page.content)
            .into_iter()
            .map(|text| Chunk {
                text,
                metadata: ChunkMetadata {
                    page_number: page.page_number,
                    source: page.source.clone(),
                },
            })
            .collect()
    }

    /// Split raw text into ordered, overlapping windows.
    pub fn split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let total = chars.len();
        if total == 0 {
            return Vec::new();
        }

        // Byte offset of every char boundary, plus the end of the text.
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());

        let mut pieces = Vec::new();
        let mut start = 0;

        loop {
            let target = (start + self.chunk_size).min(total);
            let end = if target == total {
                total
            } else {
                self.find_break_point(&chars, start, target)
            };

            let piece = &text[offsets[start]..offsets[end]];
            if !piece.is_empty() {
                pieces.push(piece.to_string());
            }

            if end >= total {
                break;
            }
            start = end - self.chunk_overlap;
        }

        pieces
    }

    /// Pick an end position in `(start + overlap, target]`, preferring the
    /// latest paragraph break, then line break, then whitespace.
    fn find_break_point(&self, chars: &[char], start: usize, target: usize) -> usize {
        let lower = start + self.chunk_overlap + 1;
        let search_start = target.saturating_sub(self.chunk_size / 5).max(lower);
        if search_start > target {
            return target;
        }

        let mut paragraph = None;
        let mut newline = None;
        let mut space = None;

        // `end` is exclusive: the separator is the char just before it.
        for end in search_start..=target {
            let prev = chars[end - 1];
            if prev == '\n' {
                if end >= 2 && chars[end - 2] == '\n' {
                    paragraph = Some(end);
                }
                newline = Some(end);
            } else if prev.is_whitespace() {
                space = Some(end);
            }
        }

        paragraph.or(newline).or(space).unwrap_or(target)
    }
}
