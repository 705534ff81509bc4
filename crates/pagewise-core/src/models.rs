//! Core data models shared between ingestion and retrieval.
//!
//! These types are the units that flow through the pipeline:
//! [`Page`] → [`Chunk`] → (vector + [`ChunkMetadata`]) → [`RetrievalHit`].

use serde::{Deserialize, Serialize};

/// One page of extracted document text.
///
/// Produced by the PDF extractor. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub page_number: u32,
    pub content: String,
    /// Document identifier, usually the uploaded file name.
    pub source: String,
}

impl Page {
    pub fn new(page_number: u32, content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            page_number,
            content: content.into(),
            source: source.into(),
        }
    }
}

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub page_number: u32,
    pub source: String,
}

/// A bounded span of page text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A single retrieved chunk with its squared Euclidean distance to the query.
///
/// Lower distance means more relevant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub position: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub distance: f32,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub chunks_added: usize,
    pub documents_processed: usize,
}
