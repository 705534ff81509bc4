//! # Pagewise Core
//!
//! Runtime-free logic for Pagewise: data models, chunking, the embedder
//! trait, the flat vector index, and the position-aligned chunk store.
//!
//! This crate contains no tokio, HTTP, or filesystem I/O. Persistence,
//! model loading, and answer synthesis live in the `pagewise` app crate.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod snapshot;
pub mod store;
