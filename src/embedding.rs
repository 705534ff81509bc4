//! Embedder construction and the process-wide shared instance.
//!
//! Two providers are supported:
//! - **`local`**: a sentence-transformer model run in-process via fastembed
//!   (downloaded once from Hugging Face, then cached; no network afterwards).
//! - **`hashing`**: [`HashingEmbedder`], deterministic and model-free.
//!
//! The model is loaded once per process by [`shared_embedder`] and handed
//! out as `Arc<dyn Embedder>`. Ingestion and query time therefore always
//! use the same model; asking for a different one later is an error rather
//! than a silent reload.

use anyhow::{anyhow, bail, Result};
use std::sync::{Arc, OnceLock};

pub use pagewise_core::embedding::{Embedder, HashingEmbedder};

use crate::config::EmbeddingConfig;

/// Local model used when `embedding.model` is not set.
pub const DEFAULT_LOCAL_MODEL: &str = "all-minilm-l6-v2";
/// Dimensionality used by the hashing provider when `embedding.dims` is not set.
pub const DEFAULT_HASHING_DIMS: usize = 384;

static SHARED: OnceLock<Arc<dyn Embedder>> = OnceLock::new();

/// Return the process-wide embedder, creating it on first call.
///
/// # Errors
///
/// Fails if the model cannot be loaded, or if an embedder for a different
/// model was already initialized in this process.
pub fn shared_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let expected = expected_model_name(config);

    let embedder = match SHARED.get() {
        Some(existing) => existing.clone(),
        None => {
            let created = create_embedder(config)?;
            SHARED.get_or_init(|| created).clone()
        }
    };

    if embedder.model_name() != expected {
        bail!(
            "embedder already initialized with model '{}', cannot switch to '{}' mid-process",
            embedder.model_name(),
            expected
        );
    }
    Ok(embedder)
}

/// Build a new embedder from configuration, bypassing the shared instance.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"hashing"` | [`HashingEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires the `local-embeddings` feature) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        )?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// The model name an embedder built from `config` will report.
pub fn expected_model_name(config: &EmbeddingConfig) -> String {
    match config.provider.as_str() {
        "hashing" => format!("hashing-{}", config.dims.unwrap_or(DEFAULT_HASHING_DIMS)),
        _ => config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string()),
    }
}

/// Embed on the blocking pool and check the shape of the result.
///
/// Returns one vector per input text, in input order. An empty input
/// returns an empty output without touching the model.
pub async fn embed_blocking(
    embedder: Arc<dyn Embedder>,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let expected = texts.len();
    let dims = embedder.dims();

    let vectors = tokio::task::spawn_blocking(move || embedder.embed(&texts)).await??;

    if vectors.len() != expected {
        bail!(
            "embedder returned {} vectors for {} texts",
            vectors.len(),
            expected
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!(
            "embedder returned a {}-dimensional vector, expected {}",
            bad.len(),
            dims
        );
    }
    Ok(vectors)
}

/// Embed a single query text.
pub async fn embed_query(embedder: Arc<dyn Embedder>, text: &str) -> Result<Vec<f32>> {
    embed_blocking(embedder, vec![text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

// ============ Local Provider (fastembed) ============

/// Sentence-transformer embedder running in-process via fastembed.
///
/// fastembed needs `&mut` access to run a batch, so the model sits behind a
/// mutex; concurrent callers queue on it.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: std::sync::Mutex<fastembed::TextEmbedding>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        let fastembed_model = config_to_fastembed_model(&model_name)?;

        tracing::info!(model = %model_name, dims, "loading local embedding model");
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: std::sync::Mutex::new(model),
        })
    }
}

#[cfg(feature = "local-embeddings")]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("embedding model lock poisoned"))?;
        model
            .embed(texts.to_vec(), Some(self.batch_size))
            .map_err(|e| anyhow!("Local embedding failed: {}", e))
    }
}

#[cfg(feature = "local-embeddings")]
fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config
        .model
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());

    let dims = config.dims.unwrap_or(match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        _ => 384,
    });

    (model_name, dims)
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
            other
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashing_config(dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "hashing".to_string(),
            dims: Some(dims),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_hashing_embedder() {
        let embedder = create_embedder(&hashing_config(32)).unwrap();
        assert_eq!(embedder.dims(), 32);
        assert_eq!(embedder.model_name(), "hashing-32");
    }

    #[test]
    fn test_expected_model_name_defaults() {
        assert_eq!(
            expected_model_name(&EmbeddingConfig::default()),
            DEFAULT_LOCAL_MODEL
        );
        assert_eq!(expected_model_name(&hashing_config(16)), "hashing-16");
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            ..Default::default()
        };
        assert!(create_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn test_embed_blocking_preserves_order() {
        let embedder = create_embedder(&hashing_config(64)).unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
        let vectors = embed_blocking(embedder, texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[0], vectors[2]);
        assert_ne!(vectors[0], vectors[1]);
    }

    #[tokio::test]
    async fn test_embed_blocking_empty_input() {
        let embedder = create_embedder(&hashing_config(8)).unwrap();
        assert!(embed_blocking(embedder, Vec::new()).await.unwrap().is_empty());
    }

    #[test]
    fn test_shared_embedder_refuses_model_switch() {
        // The shared instance is process-wide, so this single test owns it.
        let first = shared_embedder(&hashing_config(48)).unwrap();
        let again = shared_embedder(&hashing_config(48)).unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(shared_embedder(&hashing_config(96)).is_err());
    }
}
