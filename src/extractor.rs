//! PDF text extraction using lopdf.
//!
//! Pages are read in document order and concatenated without separators.
//! A page whose text cannot be decoded contributes an empty string rather
//! than failing the whole document, unless no page decodes at all.

use std::path::{Path, PathBuf};

use lopdf::Document;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Error reading PDF: {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("Error reading PDF: {path}: none of its {pages} pages could be decoded")]
    Undecodable { path: PathBuf, pages: usize },

    #[error("Error reading PDF: extraction task failed: {0}")]
    Task(String),
}

/// Turns a saved PDF into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ExtractError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl LopdfExtractor {
    /// Text of every page, in page order.
    pub fn extract_pages(&self, path: &Path) -> Result<Vec<String>, ExtractError> {
        let doc = Document::load(path).map_err(|source| ExtractError::Load {
            path: path.to_path_buf(),
            source,
        })?;

        let pages = doc
            .get_pages()
            .into_keys()
            .map(|page_num| (page_num, doc.extract_text(&[page_num])))
            .collect::<Vec<_>>();

        let pages = collect_pages(path, pages)?;
        debug!("Extracted {} pages from {}", pages.len(), path.display());
        Ok(pages)
    }
}

/// A failed page contributes `""`; a document where every page failed is an error.
fn collect_pages<E: std::fmt::Display>(
    path: &Path,
    results: Vec<(u32, Result<String, E>)>,
) -> Result<Vec<String>, ExtractError> {
    let total = results.len();
    let mut failed = 0;
    let pages = results
        .into_iter()
        .map(|(page_num, result)| match result {
            Ok(text) => text,
            Err(e) => {
                warn!("Could not decode text on page {page_num} of {}: {e}", path.display());
                failed += 1;
                String::new()
            }
        })
        .collect::<Vec<_>>();

    if total > 0 && failed == total {
        return Err(ExtractError::Undecodable {
            path: path.to_path_buf(),
            pages: total,
        });
    }
    Ok(pages)
}

impl TextExtractor for LopdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        Ok(self.extract_pages(path)?.concat())
    }
}
