//! The vector index and chunk store as one position-aligned unit.
//!
//! [`IndexSnapshot`] is the only way to grow either structure, and it only
//! accepts chunks and vectors together, so `index.len() == store.len()`
//! holds by construction. Pairs loaded from disk go through
//! [`IndexSnapshot::from_parts`], which rejects a length mismatch as
//! [`IndexError::CorruptIndex`].

use crate::error::IndexError;
use crate::index::VectorIndex;
use crate::models::{Chunk, RetrievalHit};
use crate::store::ChunkStore;

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    index: VectorIndex,
    store: ChunkStore,
}

impl IndexSnapshot {
    /// An empty snapshot for vectors of `dims` dimensions.
    pub fn new(dims: usize) -> Self {
        Self {
            index: VectorIndex::new(dims),
            store: ChunkStore::new(),
        }
    }

    /// Pair a reloaded index and store, verifying alignment.
    pub fn from_parts(index: VectorIndex, store: ChunkStore) -> Result<Self, IndexError> {
        if index.len() != store.len() {
            return Err(IndexError::CorruptIndex {
                vectors: index.len(),
                chunks: store.len(),
            });
        }
        Ok(Self { index, store })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn document_count(&self) -> usize {
        self.store.sources().len()
    }

    /// Append chunks with their embeddings, one vector per chunk, in order.
    ///
    /// Returns the number of entries added. On error nothing is appended.
    pub fn append(&mut self, chunks: Vec<Chunk>, vectors: &[Vec<f32>]) -> Result<usize, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::LengthMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }
        let added = self.index.add(vectors)?;
        self.store.extend(chunks);
        Ok(added.len())
    }

    /// Find the `k` chunks nearest to `query`, ascending by distance.
    ///
    /// Positions that have no chunk entry are skipped.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievalHit>, IndexError> {
        let hits = self.index.search(query, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(position, distance)| {
                self.store.get(position).map(|chunk| RetrievalHit {
                    position,
                    text: chunk.text.clone(),
                    metadata: chunk.metadata.clone(),
                    distance,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn chunk(text: &str, page: u32, source: &str) -> Chunk {
        Chunk {
            text: text.to_string(),
            metadata: ChunkMetadata {
                page_number: page,
                source: source.to_string(),
            },
        }
    }

    #[test]
    fn test_append_keeps_alignment() {
        let mut snap = IndexSnapshot::new(2);
        let added = snap
            .append(
                vec![chunk("a", 1, "x.pdf"), chunk("b", 2, "x.pdf")],
                &[vec![0.0, 0.0], vec![1.0, 1.0]],
            )
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(snap.index().len(), snap.store().len());
        assert_eq!(snap.document_count(), 1);
    }

    #[test]
    fn test_append_length_mismatch_is_rejected() {
        let mut snap = IndexSnapshot::new(2);
        let err = snap
            .append(vec![chunk("a", 1, "x.pdf")], &[vec![0.0, 0.0], vec![1.0, 1.0]])
            .unwrap_err();
        assert!(matches!(err, IndexError::LengthMismatch { .. }));
        assert!(snap.is_empty());
    }

    #[test]
    fn test_append_bad_dims_appends_nothing() {
        let mut snap = IndexSnapshot::new(2);
        assert!(snap.append(vec![chunk("a", 1, "x.pdf")], &[vec![0.0]]).is_err());
        assert_eq!(snap.index().len(), 0);
        assert_eq!(snap.store().len(), 0);
    }

    #[test]
    fn test_from_parts_detects_corruption() {
        let mut index = VectorIndex::new(1);
        index.add(&[vec![1.0], vec![2.0]]).unwrap();
        let store = ChunkStore::from_entries(vec![chunk("only", 1, "x.pdf")]);
        let err = IndexSnapshot::from_parts(index, store).unwrap_err();
        assert_eq!(
            err,
            IndexError::CorruptIndex {
                vectors: 2,
                chunks: 1
            }
        );
    }

    #[test]
    fn test_search_resolves_metadata() {
        let mut snap = IndexSnapshot::new(1);
        snap.append(
            vec![chunk("far", 9, "b.pdf"), chunk("near", 3, "a.pdf")],
            &[vec![10.0], vec![1.0]],
        )
        .unwrap();
        let hits = snap.search(&[0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "near");
        assert_eq!(hits[0].metadata.page_number, 3);
        assert_eq!(hits[0].position, 1);
    }

    #[test]
    fn test_search_empty_snapshot() {
        let snap = IndexSnapshot::new(4);
        assert!(snap.search(&[0.0; 4], 3).unwrap().is_empty());
    }
}
