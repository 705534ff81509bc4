//! The in-memory view of the persisted index shared by readers.
//!
//! A [`SnapshotHandle`] holds one [`IndexState`]. Readers clone the state
//! (an `Arc` for a ready snapshot) and release the lock before searching,
//! so a concurrent publish never blocks or mutates what a reader holds.
//! Only the index builder publishes, immediately after a successful
//! generation swap on disk.

use std::sync::{Arc, RwLock};

use pagewise_core::snapshot::IndexSnapshot;

use crate::persist::{IndexStorage, PersistError};

#[derive(Debug, Clone)]
pub enum IndexState {
    /// Nothing has been ingested yet.
    Missing,
    Ready {
        snapshot: Arc<IndexSnapshot>,
        generation: String,
    },
    /// The stored pair failed verification. Queries are refused until a
    /// rebuild publishes a new generation.
    Corrupt(String),
}

#[derive(Debug)]
pub struct SnapshotHandle {
    state: RwLock<IndexState>,
}

impl Default for SnapshotHandle {
    fn default() -> Self {
        Self {
            state: RwLock::new(IndexState::Missing),
        }
    }
}

impl SnapshotHandle {
    /// Build a handle from whatever is on disk.
    ///
    /// Corruption and model mismatches are recorded in the state rather
    /// than returned, so a process can still start and accept a rebuild.
    /// Plain I/O failures are returned.
    pub fn open(storage: &IndexStorage, model: &str) -> Result<Self, PersistError> {
        let handle = Self::default();
        match handle.reload(storage, model) {
            Ok(()) => Ok(handle),
            Err(e) if handle.is_corrupt() => {
                tracing::error!(dir = %storage.dir().display(), error = %e, "index unusable, rebuild required");
                Ok(handle)
            }
            Err(e) => Err(e),
        }
    }

    pub fn state(&self) -> IndexState {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self.state(), IndexState::Corrupt(_))
    }

    /// Replace the live snapshot.
    pub fn publish(&self, snapshot: Arc<IndexSnapshot>, generation: String) {
        self.set(IndexState::Ready {
            snapshot,
            generation,
        });
    }

    /// Re-read the live generation from disk.
    pub fn reload(&self, storage: &IndexStorage, model: &str) -> Result<(), PersistError> {
        match storage.load(model) {
            Ok(Some(loaded)) => {
                self.publish(Arc::new(loaded.snapshot), loaded.manifest.generation);
                Ok(())
            }
            Ok(None) => {
                self.set(IndexState::Missing);
                Ok(())
            }
            Err(e) if e.is_corruption() || matches!(e, PersistError::ModelMismatch { .. }) => {
                self.set(IndexState::Corrupt(e.to_string()));
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn set(&self, next: IndexState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}
