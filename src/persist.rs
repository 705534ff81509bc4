//! Durable storage of the index snapshot with atomic generation swap.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   CURRENT              name of the live generation, e.g. "gen-3f2a…"
//!   gen-<uuid>/
//!     manifest.json      format version, model, dims, entry count, digests
//!     vectors.bin        row-major little-endian f32
//!     chunks.json        [{ text, metadata: { page_number, source } }, …]
//! ```
//!
//! # Atomicity
//!
//! A save writes a complete new generation directory that nothing points
//! at yet, then replaces `CURRENT` with a single rename. A reader resolves
//! `CURRENT` once and reads one generation, so it sees either the old pair
//! or the new pair, never a mix. The generation being replaced is kept
//! until the next save so in-flight readers can finish.
//!
//! # Integrity
//!
//! Loading verifies both SHA-256 digests, the declared entry count and
//! dimensionality, and that vectors and chunks have the same length. Any
//! failure is reported as corruption and the pair must be rebuilt.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use pagewise_core::embedding::{blob_to_vec, vec_to_blob};
use pagewise_core::error::IndexError;
use pagewise_core::index::VectorIndex;
use pagewise_core::models::Chunk;
use pagewise_core::snapshot::IndexSnapshot;
use pagewise_core::store::ChunkStore;

pub const FORMAT_VERSION: u32 = 1;

const CURRENT_FILE: &str = "CURRENT";
const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.json";
const GENERATION_PREFIX: &str = "gen-";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("index was built with model '{found}' but the configured embedder is '{expected}'; rebuild the index")]
    ModelMismatch { expected: String, found: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistError {
    /// True for failures that mean the stored pair cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PersistError::Corrupt(_) | PersistError::Index(_) | PersistError::Json(_)
        )
    }
}

/// Metadata written alongside each generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    pub format_version: u32,
    pub generation: String,
    pub model: String,
    pub dims: usize,
    pub entries: usize,
    pub vectors_sha256: String,
    pub chunks_sha256: String,
    pub created_at: DateTime<Utc>,
}

/// A snapshot read back from disk together with its manifest.
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    pub snapshot: IndexSnapshot,
    pub manifest: Manifest,
}

/// Reads and writes index generations under one directory.
#[derive(Debug, Clone)]
pub struct IndexStorage {
    dir: PathBuf,
}

impl IndexStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the live generation, or `None` if nothing was ever saved.
    pub fn current_generation(&self) -> Result<Option<String>, PersistError> {
        let path = self.dir.join(CURRENT_FILE);
        let name = match fs::read_to_string(&path) {
            Ok(s) => s.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        if !name.starts_with(GENERATION_PREFIX) || name.contains(['/', '\\']) || name.contains("..")
        {
            return Err(PersistError::Corrupt(format!(
                "CURRENT names an invalid generation: {:?}",
                name
            )));
        }
        Ok(Some(name))
    }

    /// Load the live generation.
    ///
    /// Returns `Ok(None)` when no index has been saved yet. Fails with
    /// [`PersistError::ModelMismatch`] when the index was built by a
    /// different embedding model than `expected_model`.
    pub fn load(&self, expected_model: &str) -> Result<Option<LoadedSnapshot>, PersistError> {
        let Some(generation) = self.current_generation()? else {
            return Ok(None);
        };
        let gen_dir = self.dir.join(&generation);

        let manifest: Manifest = serde_json::from_slice(&read(&gen_dir.join(MANIFEST_FILE))?)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(PersistError::Corrupt(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }
        if manifest.model != expected_model {
            return Err(PersistError::ModelMismatch {
                expected: expected_model.to_string(),
                found: manifest.model,
            });
        }

        let vector_bytes = read(&gen_dir.join(VECTORS_FILE))?;
        let chunk_bytes = read(&gen_dir.join(CHUNKS_FILE))?;
        verify_digest(VECTORS_FILE, &vector_bytes, &manifest.vectors_sha256)?;
        verify_digest(CHUNKS_FILE, &chunk_bytes, &manifest.chunks_sha256)?;

        if vector_bytes.len() % 4 != 0 {
            return Err(PersistError::Corrupt(format!(
                "{} length {} is not a multiple of 4",
                VECTORS_FILE,
                vector_bytes.len()
            )));
        }
        let index = VectorIndex::from_flat(manifest.dims, blob_to_vec(&vector_bytes))?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&chunk_bytes)?;
        let snapshot = IndexSnapshot::from_parts(index, ChunkStore::from_entries(chunks))?;

        if snapshot.len() != manifest.entries {
            return Err(PersistError::Corrupt(format!(
                "manifest declares {} entries but {} were stored",
                manifest.entries,
                snapshot.len()
            )));
        }

        Ok(Some(LoadedSnapshot { snapshot, manifest }))
    }

    /// Write `snapshot` as a new generation and make it live.
    pub fn save(&self, snapshot: &IndexSnapshot, model: &str) -> Result<Manifest, PersistError> {
        fs::create_dir_all(&self.dir).map_err(|e| io_err(&self.dir, e))?;
        let previous = self.current_generation().ok().flatten();

        let generation = format!("{}{}", GENERATION_PREFIX, Uuid::new_v4().simple());
        let gen_dir = self.dir.join(&generation);
        fs::create_dir(&gen_dir).map_err(|e| io_err(&gen_dir, e))?;

        let vector_bytes = vec_to_blob(snapshot.index().as_flat());
        let chunk_bytes = serde_json::to_vec(snapshot.store().entries())?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            generation: generation.clone(),
            model: model.to_string(),
            dims: snapshot.dims(),
            entries: snapshot.len(),
            vectors_sha256: sha256_hex(&vector_bytes),
            chunks_sha256: sha256_hex(&chunk_bytes),
            created_at: Utc::now(),
        };

        write_synced(&gen_dir.join(VECTORS_FILE), &vector_bytes)?;
        write_synced(&gen_dir.join(CHUNKS_FILE), &chunk_bytes)?;
        write_synced(
            &gen_dir.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(&manifest)?,
        )?;
        sync_dir(&gen_dir);

        // The swap: CURRENT flips from the old generation to the new one.
        let tmp = self.dir.join(format!("{}.tmp", CURRENT_FILE));
        write_synced(&tmp, generation.as_bytes())?;
        let current = self.dir.join(CURRENT_FILE);
        fs::rename(&tmp, &current).map_err(|e| io_err(&current, e))?;
        sync_dir(&self.dir);

        self.prune(&generation, previous.as_deref());
        Ok(manifest)
    }

    /// Remove generations other than the live one and the one it replaced.
    fn prune(&self, live: &str, previous: Option<&str>) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(GENERATION_PREFIX) || name == live || Some(name.as_str()) == previous
            {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(generation = %name, error = %e, "failed to remove stale index generation");
            }
        }
    }
}

/// Read a generation file. A missing file inside a generation that
/// `CURRENT` points at is corruption, not an absent index.
fn read(path: &Path) -> Result<Vec<u8>, PersistError> {
    fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => {
            PersistError::Corrupt(format!("missing {}", path.display()))
        }
        _ => io_err(path, e),
    })
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let mut file = File::create(path).map_err(|e| io_err(path, e))?;
    file.write_all(bytes).map_err(|e| io_err(path, e))?;
    file.sync_all().map_err(|e| io_err(path, e))
}

/// Flush directory entries so renames survive a crash. Not supported on
/// every platform, so failures are ignored.
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

fn verify_digest(name: &str, bytes: &[u8], expected: &str) -> Result<(), PersistError> {
    let actual = sha256_hex(bytes);
    if actual != expected {
        return Err(PersistError::Corrupt(format!(
            "{} digest mismatch (expected {}, found {})",
            name, expected, actual
        )));
    }
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn io_err(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}
