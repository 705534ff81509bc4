//! # pagewise
//!
//! Grounded question answering over PDF documents.
//!
//! PDFs are split into per-page text, chunked, embedded, and stored in a
//! vector index persisted as one atomically swapped unit. A question is
//! embedded, matched against the index, and answered by a chat-completion
//! model that sees only the retrieved passages. The answer comes back with a
//! page citation line and a standing disclaimer, or with a plain fallback
//! message when no context or no model reply is available.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌───────────────┐
//! │  PDFs    │──▶│ IndexBuilder │──▶│ gen-<uuid>/   │
//! │ extract  │   │ chunk+embed │   │ CURRENT swap  │
//! └──────────┘   └─────────────┘   └──────┬────────┘
//!                                         │ publish
//!                                         ▼
//!              ┌───────────┐        ┌────────────┐
//!  question ──▶│ Retriever │───────▶│ Synthesizer│──▶ answer + citations
//!              └───────────┘        └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`extract`] | Per-page PDF text extraction |
//! | [`embedding`] | Embedder construction and the shared instance |
//! | [`persist`] | Generation files and atomic swap |
//! | [`state`] | The published snapshot shared by readers |
//! | [`ingest`] | Index building |
//! | [`retrieve`] | Top-k retrieval |
//! | [`retry`] | Fixed-backoff retry policy |
//! | [`completion`] | Chat-completion client |
//! | [`answer`] | Prompt building, fallbacks, and citations |
//! | [`pipeline`] | End-to-end facade |
//! | [`server`] | HTTP API |
//!
//! The data model, chunker, vector index, and chunk store live in
//! [`pagewise_core`] and are re-exported here.

pub use pagewise_core::{chunk, index, models, snapshot, store};

pub mod answer;
pub mod completion;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod ingest;
pub mod persist;
pub mod pipeline;
pub mod retrieve;
pub mod retry;
pub mod server;
pub mod state;
