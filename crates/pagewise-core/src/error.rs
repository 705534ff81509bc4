//! Errors raised by the in-memory index structures.

use thiserror::Error;

/// Consistency failures in the vector index or its aligned chunk store.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// The vector index and chunk store disagree on length. The pair must be
    /// rebuilt; answering from it would attach the wrong citations.
    #[error("corrupt index: {vectors} vectors but {chunks} chunk entries")]
    CorruptIndex { vectors: usize, chunks: usize },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cannot append {chunks} chunks with {vectors} vectors")]
    LengthMismatch { chunks: usize, vectors: usize },
}
