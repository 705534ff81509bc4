//! Flat (exact) vector index under squared Euclidean distance.
//!
//! Vectors are stored row-major in a single `Vec<f32>`; position `i`
//! occupies `data[i * dims..(i + 1) * dims]`. Search is brute force over
//! every row, which is exact and fast enough for per-document corpora
//! of a few hundred thousand chunks.

use std::ops::Range;

use crate::embedding::squared_euclidean;
use crate::error::IndexError;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dims: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    /// Rebuild an index from its row-major representation.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if `data` is not a whole
    /// number of `dims`-length rows.
    pub fn from_flat(dims: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dims == 0 || data.len() % dims != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dims,
                actual: data.len(),
            });
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row-major view of all stored vectors.
    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// Append vectors in order and return the positions they were assigned.
    ///
    /// All vectors are validated before any is written, so a failed call
    /// leaves the index unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Range<usize>, IndexError> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }
        let first = self.len();
        self.data.reserve(vectors.len() * self.dims);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(first..first + vectors.len())
    }

    /// Return up to `k` `(position, distance)` pairs nearest to `query`,
    /// ascending by distance. Ties keep insertion order.
    ///
    /// Searching an empty index returns an empty result.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(pos, row)| (pos, squared_euclidean(query, row)))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorIndex {
        let mut index = VectorIndex::new(2);
        index
            .add(&[vec![0.0, 0.0], vec![5.0, 5.0], vec![1.0, 0.0], vec![0.0, 3.0]])
            .unwrap();
        index
    }

    #[test]
    fn test_add_assigns_next_positions() {
        let mut index = sample();
        let range = index.add(&[vec![9.0, 9.0], vec![8.0, 8.0]]).unwrap();
        assert_eq!(range, 4..6);
        assert_eq!(index.len(), 6);
        assert_eq!(index.get(5), Some(&[8.0, 8.0][..]));
    }

    #[test]
    fn test_search_ascending() {
        let index = sample();
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(positions, vec![0, 2, 3]);
        assert_eq!(hits[0].1, 0.0);
        assert_eq!(hits[1].1, 1.0);
        assert_eq!(hits[2].1, 9.0);
    }

    #[test]
    fn test_search_k_larger_than_len() {
        let hits = sample().search(&[0.0, 0.0], 50).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_search_empty_index() {
        let index = VectorIndex::new(8);
        assert!(index.search(&[0.0; 8], 5).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new(1);
        index.add(&[vec![1.0], vec![-1.0], vec![1.0]]).unwrap();
        let hits = index.search(&[0.0], 3).unwrap();
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_add_wrong_dims_leaves_index_unchanged() {
        let mut index = sample();
        let err = index.add(&[vec![1.0, 1.0], vec![1.0]]).unwrap_err();
        assert_eq!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_query_wrong_dims() {
        assert!(sample().search(&[1.0, 2.0, 3.0], 1).is_err());
    }

    #[test]
    fn test_from_flat_roundtrip() {
        let index = sample();
        let rebuilt = VectorIndex::from_flat(2, index.as_flat().to_vec()).unwrap();
        assert_eq!(rebuilt, index);
        assert!(VectorIndex::from_flat(2, vec![1.0, 2.0, 3.0]).is_err());
    }
}
