//! Index building: pages → chunks → embeddings → persisted snapshot.
//!
//! [`IndexBuilder`] is the only writer. Each call:
//!
//! 1. chunks every page with the configured [`Chunker`],
//! 2. embeds all chunk texts in one batch on the blocking pool,
//! 3. appends them to a copy of the current snapshot (or to an empty one
//!    for a rebuild),
//! 4. saves the copy as a new generation and swaps it in atomically,
//! 5. publishes it to the shared [`SnapshotHandle`].
//!
//! Any failure before step 4 completes leaves the stored pair and the
//! published snapshot untouched. Writers are serialised by an async mutex;
//! readers never wait on it.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;

use pagewise_core::chunk::Chunker;
use pagewise_core::models::{Chunk, IngestReport, Page};
use pagewise_core::snapshot::IndexSnapshot;

use crate::embedding::{embed_blocking, Embedder};
use crate::persist::IndexStorage;
use crate::state::SnapshotHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    /// Add to whatever is already indexed.
    #[default]
    Append,
    /// Discard the existing index and build from these pages only.
    Rebuild,
}

pub struct IndexBuilder {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    storage: IndexStorage,
    handle: Arc<SnapshotHandle>,
    write_lock: Mutex<()>,
}

impl IndexBuilder {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn Embedder>,
        storage: IndexStorage,
        handle: Arc<SnapshotHandle>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            storage,
            handle,
            write_lock: Mutex::new(()),
        }
    }

    /// Chunk, embed, and persist `pages`.
    ///
    /// No pages, or pages that yield no chunks, is a zero-count success and
    /// the index is left as it was.
    pub async fn ingest(&self, pages: Vec<Page>, mode: IngestMode) -> Result<IngestReport> {
        let _guard = self.write_lock.lock().await;

        let chunks: Vec<Chunk> = pages
            .iter()
            .flat_map(|p| self.chunker.chunk_page(p))
            .collect();

        if chunks.is_empty() {
            tracing::info!(pages = pages.len(), "nothing to index, 0 chunks added");
            return Ok(IngestReport::default());
        }

        let documents_processed = chunks
            .iter()
            .map(|c| c.metadata.source.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_blocking(self.embedder.clone(), texts)
            .await
            .context("Embedding failed; index left unchanged")?;

        let mut next = match mode {
            IngestMode::Rebuild => IndexSnapshot::new(self.embedder.dims()),
            IngestMode::Append => self.load_base().await?,
        };
        if next.dims() != self.embedder.dims() {
            bail!(
                "stored index has {} dimensions but the embedder produces {}; rebuild the index",
                next.dims(),
                self.embedder.dims()
            );
        }

        let chunks_added = next.append(chunks, &vectors)?;

        let storage = self.storage.clone();
        let model = self.embedder.model_name().to_string();
        let (next, manifest) = tokio::task::spawn_blocking(move || {
            storage.save(&next, &model).map(|manifest| (next, manifest))
        })
        .await?
        .context("Failed to persist index")?;

        tracing::info!(
            chunks_added,
            documents_processed,
            total_chunks = next.len(),
            generation = %manifest.generation,
            mode = ?mode,
            "index updated"
        );

        self.handle.publish(Arc::new(next), manifest.generation);

        Ok(IngestReport {
            chunks_added,
            documents_processed,
        })
    }

    /// The stored snapshot an append starts from, read fresh from disk.
    async fn load_base(&self) -> Result<IndexSnapshot> {
        let storage = self.storage.clone();
        let model = self.embedder.model_name().to_string();
        let loaded = tokio::task::spawn_blocking(move || storage.load(&model))
            .await?
            .context("Existing index is unusable; run a full rebuild")?;
        Ok(match loaded {
            Some(loaded) => loaded.snapshot,
            None => IndexSnapshot::new(self.embedder.dims()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::state::IndexState;
    use tempfile::TempDir;

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            8
        }
        fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            bail!("model crashed")
        }
    }

    fn builder(dir: &std::path::Path, embedder: Arc<dyn Embedder>) -> (IndexBuilder, Arc<SnapshotHandle>) {
        let handle = Arc::new(SnapshotHandle::default());
        let builder = IndexBuilder::new(
            Chunker::new(200, 20).unwrap(),
            embedder,
            IndexStorage::new(dir),
            handle.clone(),
        );
        (builder, handle)
    }

    fn hashing() -> Arc<dyn Embedder> {
        Arc::new(HashingEmbedder::new(32).unwrap())
    }

    fn pages() -> Vec<Page> {
        vec![
            Page::new(1, "Paracetamol is used to treat fever and mild pain.", "a.pdf"),
            Page::new(2, "Do not exceed four grams in twenty four hours.", "a.pdf"),
            Page::new(1, "Ibuprofen is an anti-inflammatory drug.", "b.pdf"),
        ]
    }

    fn ready_len(handle: &SnapshotHandle) -> usize {
        match handle.state() {
            IndexState::Ready { snapshot, .. } => snapshot.len(),
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_reports_counts_and_publishes() {
        let tmp = TempDir::new().unwrap();
        let (builder, handle) = builder(tmp.path(), hashing());
        let report = builder.ingest(pages(), IngestMode::Append).await.unwrap();
        assert_eq!(report.chunks_added, 3);
        assert_eq!(report.documents_processed, 2);
        assert_eq!(ready_len(&handle), 3);
    }

    #[tokio::test]
    async fn test_empty_input_is_zero_count_success() {
        let tmp = TempDir::new().unwrap();
        let (builder, handle) = builder(tmp.path(), hashing());
        let report = builder.ingest(Vec::new(), IngestMode::Append).await.unwrap();
        assert_eq!(report, IngestReport::default());
        assert!(matches!(handle.state(), IndexState::Missing));
        assert!(IndexStorage::new(tmp.path()).current_generation().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_then_rebuild() {
        let tmp = TempDir::new().unwrap();
        let (builder, handle) = builder(tmp.path(), hashing());
        builder.ingest(pages(), IngestMode::Append).await.unwrap();
        builder.ingest(pages(), IngestMode::Append).await.unwrap();
        assert_eq!(ready_len(&handle), 6);

        builder.ingest(pages(), IngestMode::Rebuild).await.unwrap();
        assert_eq!(ready_len(&handle), 3);
    }

    #[tokio::test]
    async fn test_embedding_failure_leaves_index_unchanged() {
        let tmp = TempDir::new().unwrap();
        let (builder, handle) = builder(tmp.path(), Arc::new(FailingEmbedder));
        assert!(builder.ingest(pages(), IngestMode::Append).await.is_err());
        assert!(matches!(handle.state(), IndexState::Missing));
        assert!(IndexStorage::new(tmp.path()).current_generation().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_ingests_are_serialised() {
        let tmp = TempDir::new().unwrap();
        let (builder, handle) = builder(tmp.path(), hashing());
        let builder = Arc::new(builder);
        let a = tokio::spawn({
            let b = builder.clone();
            async move { b.ingest(pages(), IngestMode::Append).await }
        });
        let b = tokio::spawn({
            let b = builder.clone();
            async move { b.ingest(pages(), IngestMode::Append).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(ready_len(&handle), 6);
    }
}
