//! Per-page text extraction from PDF files.
//!
//! Extraction is a pure function of the file bytes: each page's text is
//! whitespace-trimmed, pages with no text are dropped, and surviving pages
//! keep their 1-based position in the document as `page_number`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;
use walkdir::WalkDir;

use pagewise_core::models::Page;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Extract the non-empty pages of an in-memory PDF.
pub fn extract_pages(bytes: &[u8], source: &str) -> Result<Vec<Page>, ExtractError> {
    let texts = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages_from_texts(texts, source))
}

/// Extract the non-empty pages of a PDF on disk; the file name becomes
/// the document identifier.
pub fn extract_pages_from_path(path: &Path) -> Result<Vec<Page>, ExtractError> {
    let bytes = std::fs::read(path).map_err(|e| ExtractError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    extract_pages(&bytes, &source_name(path))
}

/// Turn raw per-page strings into [`Page`]s, dropping blank pages.
pub fn pages_from_texts<I, S>(texts: I, source: &str) -> Vec<Page>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    texts
        .into_iter()
        .enumerate()
        .filter_map(|(i, text)| {
            let trimmed = text.as_ref().trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(Page::new(i as u32 + 1, trimmed, source))
            }
        })
        .collect()
}

/// Document identifier for a path: its file name, or the full path if it
/// has none.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Expand a list of files and directories into PDF file paths.
///
/// Directories are walked recursively; only `*.pdf` files (any case) are
/// kept. Explicitly named files are kept regardless of extension.
pub fn collect_pdf_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                let entry =
                    entry.with_context(|| format!("Failed to walk {}", input.display()))?;
                if entry.file_type().is_file() && has_pdf_extension(entry.path()) {
                    out.push(entry.into_path());
                }
            }
        } else {
            out.push(input.clone());
        }
    }
    Ok(out)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}
