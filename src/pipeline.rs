//! The end-to-end question-answering pipeline.
//!
//! [`Pipeline`] wires the builder, retriever, and synthesizer around one
//! shared embedder and one snapshot handle. It is what the CLI and HTTP
//! server hold; both `ingest` and `answer` may be called concurrently
//! through a shared reference.
//!
//! ```rust,no_run
//! use pagewise::config::Config;
//! use pagewise::pipeline::Pipeline;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pipeline = Pipeline::from_config(&Config::default()).await?;
//! let answer = pipeline.answer("What is paracetamol used for?").await?;
//! println!("{}", answer.formatted());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use pagewise_core::chunk::Chunker;
use pagewise_core::models::{IngestReport, Page, RetrievalHit};

use crate::answer::{
    Answer, AnswerOutcome, AnswerSynthesizer, SynthesisSettings, TECHNICAL_ISSUE_MESSAGE,
};
use crate::completion::{ChatCompletionsClient, CompletionClient};
use crate::config::Config;
use crate::embedding::{shared_embedder, Embedder};
use crate::extract::{extract_pages_from_path, source_name};
use crate::ingest::{IndexBuilder, IngestMode};
use crate::persist::IndexStorage;
use crate::retrieve::{RetrieveError, Retriever};
use crate::retry::RetryPolicy;
use crate::state::{IndexState, SnapshotHandle};

/// Summary of the live index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub status: &'static str,
    pub generation: Option<String>,
    pub model: String,
    pub dims: usize,
    pub chunks: usize,
    pub documents: usize,
    /// Set when the index failed verification.
    pub problem: Option<String>,
}

pub struct Pipeline {
    embedder: Arc<dyn Embedder>,
    handle: Arc<SnapshotHandle>,
    builder: IndexBuilder,
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    top_k: usize,
}

impl Pipeline {
    /// Build with the process-wide embedder and the HTTP completion client.
    ///
    /// Model initialization may load weights from disk, so it runs on the
    /// blocking pool.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedding = config.embedding.clone();
        let embedder = tokio::task::spawn_blocking(move || shared_embedder(&embedding)).await??;
        let client = Arc::new(ChatCompletionsClient::new(&config.completion)?);
        Self::with_components(config, embedder, client).await
    }

    /// Build with explicit collaborators.
    ///
    /// Opening the index reads and verifies the current generation on the
    /// blocking pool.
    pub async fn with_components(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        client: Arc<dyn CompletionClient>,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.chunking.chunk_size, config.chunking.chunk_overlap)?;
        let storage = IndexStorage::new(&config.storage.dir);
        let opening = storage.clone();
        let model = embedder.model_name().to_string();
        let handle = tokio::task::spawn_blocking(move || SnapshotHandle::open(&opening, &model))
            .await?
            .with_context(|| format!("Failed to open index at {}", storage.dir().display()))?;
        let handle = Arc::new(handle);

        let builder = IndexBuilder::new(chunker, embedder.clone(), storage, handle.clone());
        let retriever = Retriever::new(embedder.clone(), handle.clone());
        let policy = RetryPolicy::new(
            config.completion.max_attempts,
            Duration::from_secs(config.completion.retry_delay_secs),
        );
        let synthesizer =
            AnswerSynthesizer::new(client, policy, SynthesisSettings::from(&config.completion));

        Ok(Self {
            embedder,
            handle,
            builder,
            retriever,
            synthesizer,
            top_k: config.retrieval.top_k,
        })
    }

    /// Add pages to the index.
    pub async fn ingest(&self, pages: Vec<Page>) -> Result<IngestReport> {
        self.builder.ingest(pages, IngestMode::Append).await
    }

    /// Replace the index with one built from `pages` only.
    pub async fn rebuild(&self, pages: Vec<Page>) -> Result<IngestReport> {
        self.builder.ingest(pages, IngestMode::Rebuild).await
    }

    /// Extract every PDF in `paths` and ingest the result as one batch.
    ///
    /// Extraction of all files completes before anything is embedded, so a
    /// file that fails to parse leaves the index untouched.
    pub async fn ingest_pdf_files(
        &self,
        paths: &[PathBuf],
        mode: IngestMode,
    ) -> Result<(usize, IngestReport)> {
        let owned = paths.to_vec();
        let pages: Vec<Page> = tokio::task::spawn_blocking(move || {
            let mut pages = Vec::new();
            for path in &owned {
                let extracted = extract_pages_from_path(path)
                    .with_context(|| format!("Failed to extract {}", source_name(path)))?;
                tracing::debug!(file = %path.display(), pages = extracted.len(), "extracted");
                pages.extend(extracted);
            }
            Ok::<_, anyhow::Error>(pages)
        })
        .await??;

        let page_count = pages.len();
        let report = self.builder.ingest(pages, mode).await?;
        Ok((page_count, report))
    }

    /// Nearest chunks for `query`, using `top_k` or the configured default.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<RetrievalHit>, RetrieveError> {
        self.retriever
            .retrieve(query, top_k.unwrap_or(self.top_k))
            .await
    }

    /// Answer `query` from the current snapshot.
    ///
    /// Fails only when the stored index is unusable. Every other problem,
    /// including a failed query embedding, becomes a plain-text answer.
    pub async fn answer(&self, query: &str) -> Result<Answer, RetrieveError> {
        let hits = match self.retrieve(query, None).await {
            Ok(hits) => hits,
            Err(RetrieveError::IndexUnusable(reason)) => {
                return Err(RetrieveError::IndexUnusable(reason))
            }
            Err(e) => {
                tracing::error!(error = %e, "retrieval failed");
                return Ok(Answer::fallback(
                    AnswerOutcome::TechnicalIssue,
                    TECHNICAL_ISSUE_MESSAGE,
                    0,
                ));
            }
        };
        Ok(self.synthesizer.synthesize(query, &hits).await)
    }

    pub fn stats(&self) -> IndexStats {
        let model = self.embedder.model_name().to_string();
        let dims = self.embedder.dims();
        match self.handle.state() {
            IndexState::Missing => IndexStats {
                status: "empty",
                generation: None,
                model,
                dims,
                chunks: 0,
                documents: 0,
                problem: None,
            },
            IndexState::Ready {
                snapshot,
                generation,
            } => IndexStats {
                status: "ready",
                generation: Some(generation),
                model,
                dims: snapshot.dims(),
                chunks: snapshot.len(),
                documents: snapshot.document_count(),
                problem: None,
            },
            IndexState::Corrupt(reason) => IndexStats {
                status: "corrupt",
                generation: None,
                model,
                dims,
                chunks: 0,
                documents: 0,
                problem: Some(reason),
            },
        }
    }
}
