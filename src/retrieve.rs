//! Query-time retrieval against the published snapshot.

use std::sync::Arc;

use thiserror::Error;

use pagewise_core::error::IndexError;
use pagewise_core::models::RetrievalHit;

use crate::embedding::{embed_query, Embedder};
use crate::state::{IndexState, SnapshotHandle};

#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The stored index failed verification and must be rebuilt.
    #[error("index is unusable and must be rebuilt: {0}")]
    IndexUnusable(String),

    #[error("query embedding failed: {0}")]
    Embedding(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    handle: Arc<SnapshotHandle>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, handle: Arc<SnapshotHandle>) -> Self {
        Self { embedder, handle }
    }

    /// The `top_k` chunks nearest to `query`, nearest first.
    ///
    /// A missing or empty index yields an empty result without embedding
    /// the query.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalHit>, RetrieveError> {
        let snapshot = match self.handle.state() {
            IndexState::Missing => return Ok(Vec::new()),
            IndexState::Corrupt(reason) => return Err(RetrieveError::IndexUnusable(reason)),
            IndexState::Ready { snapshot, .. } => snapshot,
        };
        if snapshot.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.clone(), query)
            .await
            .map_err(|e| RetrieveError::Embedding(format!("{:#}", e)))?;

        let hits = snapshot.search(&vector, top_k)?;
        tracing::debug!(top_k, returned = hits.len(), "retrieved chunks");
        Ok(hits)
    }
}
