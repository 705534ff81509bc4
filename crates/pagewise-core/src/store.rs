//! Ordered chunk text and metadata, aligned by position with the vector index.

use std::collections::BTreeSet;

use crate::models::Chunk;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkStore {
    entries: Vec<Chunk>,
}

impl ChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Chunk>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Chunk> {
        self.entries.get(position)
    }

    pub fn entries(&self) -> &[Chunk] {
        &self.entries
    }

    pub(crate) fn extend(&mut self, chunks: Vec<Chunk>) {
        self.entries.extend(chunks);
    }

    /// Distinct document identifiers, sorted.
    pub fn sources(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .map(|c| c.metadata.source.as_str())
            .collect()
    }
}
