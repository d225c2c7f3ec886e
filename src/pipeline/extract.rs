//! The extraction chain: render first, fall back to direct text.
//!
//! ```text
//! render all pages @ dpi ──ok──────────────────────────────▶ Rendered
//!        │ err
//!        ▼
//! render page-by-page @ fallback_dpi, stop at first failure
//!        │ ≥1 page                          │ 0 pages
//!        ▼                                  ▼
//! patch missing pages from          direct text → split_pages
//! page-aligned direct text          ▶ DirectText
//! ▶ PartiallyRendered
//! ```
//!
//! Rendered pages carry PNG bytes and empty text; recognition fills the text
//! in a later stage. Only an unusable document (empty, not a PDF, or no
//! rendering *and* no direct text) is an [`ExtractionError`].

use crate::error::{ExtractError, ExtractionError, RenderError, SlideIssue};
use crate::output::{Document, ExtractionMethod};
use crate::pipeline::render::{bind_pdfium, RenderedPage, Renderer};
use crate::pipeline::split::{split_aligned, split_pages, PAGE_BREAK};
use async_trait::async_trait;
use std::path::Path;
use tracing::{info, warn};

/// Direct text extraction without rendering.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Whole-document text, pages separated by [`PAGE_BREAK`] when the
    /// extractor knows the boundaries.
    async fn extract_text(&self, document: &Path) -> Result<String, ExtractError>;
}

/// pdfium-backed [`TextExtractor`]; joins per-page text with form feeds.
#[derive(Debug, Clone, Default)]
pub struct PdfiumTextExtractor {
    password: Option<String>,
}

impl PdfiumTextExtractor {
    pub fn new(password: Option<String>) -> Self {
        Self { password }
    }
}

#[async_trait]
impl TextExtractor for PdfiumTextExtractor {
    async fn extract_text(&self, document: &Path) -> Result<String, ExtractError> {
        let path = document.to_path_buf();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium().map_err(|e| ExtractError(e.to_string()))?;
            let doc = pdfium
                .load_pdf_from_file(&path, password.as_deref())
                .map_err(|e| ExtractError(format!("{:?}", e)))?;

            let mut pages = Vec::new();
            for page in doc.pages().iter() {
                let text = page
                    .text()
                    .map(|t| t.all())
                    .map_err(|e| ExtractError(format!("{:?}", e)))?;
                pages.push(text);
            }
            Ok(pages.join(&PAGE_BREAK.to_string()))
        })
        .await
        .map_err(|e| ExtractError(format!("text task panicked: {}", e)))?
    }
}

/// A page as it leaves the extraction chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub index: usize,
    pub text: String,
    /// PNG bytes when the page was rendered.
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct Extraction {
    pub pages: Vec<ExtractedPage>,
    pub method: ExtractionMethod,
    pub issues: Vec<SlideIssue>,
}

impl Extraction {
    pub fn rendered_count(&self) -> usize {
        self.pages.iter().filter(|p| p.image.is_some()).count()
    }
}

/// Reject documents no strategy could read.
pub fn validate(document: &Document) -> Result<(), ExtractionError> {
    if document.bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ExtractionError::EmptyDocument {
            name: document.name.clone(),
        });
    }
    if !document.bytes.starts_with(b"%PDF") {
        return Err(ExtractionError::NotAPdf {
            name: document.name.clone(),
            magic: document.bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

/// Render-then-text fallback chain.
pub struct ExtractionChain<'a> {
    pub renderer: &'a dyn Renderer,
    pub text_extractor: &'a dyn TextExtractor,
    pub dpi: u32,
    pub fallback_dpi: u32,
}

impl ExtractionChain<'_> {
    /// Run the chain on a document already written to `path`.
    pub async fn extract(&self, path: &Path, name: &str) -> Result<Extraction, ExtractionError> {
        let (total, rendered) = self.render_with_retry(path).await;

        if rendered.is_empty() {
            info!("{}: no pages rendered, using direct text extraction", name);
            return self.direct_text(path, name).await;
        }

        let total = total.max(rendered.iter().map(|p| p.index).max().unwrap_or(0));
        let mut by_index: Vec<Option<Vec<u8>>> = vec![None; total];
        for page in rendered {
            if let Some(slot) = page.index.checked_sub(1).and_then(|i| by_index.get_mut(i)) {
                *slot = Some(page.png);
            }
        }

        let missing = by_index.iter().filter(|p| p.is_none()).count();
        let aligned = if missing > 0 {
            match self.text_extractor.extract_text(path).await {
                Ok(raw) => split_aligned(&raw),
                Err(e) => {
                    warn!("{}: direct text for unrendered pages unavailable: {}", name, e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut issues = Vec::new();
        let pages = by_index
            .into_iter()
            .enumerate()
            .map(|(i, image)| {
                let index = i + 1;
                match image {
                    Some(png) => ExtractedPage {
                        index,
                        text: String::new(),
                        image: Some(png),
                    },
                    None => {
                        issues.push(SlideIssue::NotRendered { page: index });
                        ExtractedPage {
                            index,
                            text: aligned.get(i).cloned().unwrap_or_default(),
                            image: None,
                        }
                    }
                }
            })
            .collect::<Vec<_>>();

        let method = if missing == 0 {
            ExtractionMethod::Rendered
        } else {
            ExtractionMethod::PartiallyRendered
        };
        info!(
            "{}: {} pages, {} rendered ({:?})",
            name,
            pages.len(),
            pages.len() - missing,
            method
        );

        Ok(Extraction {
            pages,
            method,
            issues,
        })
    }

    /// Returns `(page_count, rendered_pages)`; `page_count` is 0 when unknown.
    async fn render_with_retry(&self, path: &Path) -> (usize, Vec<RenderedPage>) {
        let total = match self.renderer.page_count(path).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Renderer unavailable: {}", e);
                return (0, Vec::new());
            }
        };
        if total == 0 {
            return (0, Vec::new());
        }

        let all: Vec<usize> = (1..=total).collect();
        let first_error = match self.renderer.render(path, &all, self.dpi).await {
            Ok(pages) => return (total, pages),
            Err(e) => e,
        };
        warn!(
            "Rendering at {} DPI failed ({}); retrying page by page at {} DPI",
            self.dpi, first_error, self.fallback_dpi
        );

        let mut rendered = Vec::new();
        for index in all {
            match self.renderer.render(path, &[index], self.fallback_dpi).await {
                Ok(mut pages) => rendered.append(&mut pages),
                Err(e) => {
                    log_stop(index, &e);
                    break;
                }
            }
        }
        (total, rendered)
    }

    async fn direct_text(&self, path: &Path, name: &str) -> Result<Extraction, ExtractionError> {
        let raw = self
            .text_extractor
            .extract_text(path)
            .await
            .map_err(|e| ExtractionError::Unreadable {
                name: name.to_string(),
                detail: e.to_string(),
            })?;

        let pages = split_pages(&raw)
            .into_iter()
            .enumerate()
            .map(|(i, text)| ExtractedPage {
                index: i + 1,
                text,
                image: None,
            })
            .collect::<Vec<_>>();
        if pages.is_empty() {
            return Err(ExtractionError::Unreadable {
                name: name.to_string(),
                detail: "no rendered pages and no text layer".to_string(),
            });
        }
        info!("{}: {} pages from direct text", name, pages.len());

        Ok(Extraction {
            pages,
            method: ExtractionMethod::DirectText,
            issues: Vec::new(),
        })
    }
}

fn log_stop(index: usize, error: &RenderError) {
    warn!("Low-resolution render stopped at page {}: {}", index, error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_non_pdf() {
        let empty = Document::new("a.pdf", b"  \n".to_vec());
        assert!(matches!(
            validate(&empty),
            Err(ExtractionError::EmptyDocument { .. })
        ));

        let png = Document::new("a.pdf", b"\x89PNG....".to_vec());
        match validate(&png) {
            Err(ExtractionError::NotAPdf { magic, .. }) => assert_eq!(magic, b"\x89PNG".to_vec()),
            other => panic!("unexpected {other:?}"),
        }

        assert!(validate(&Document::new("a.pdf", b"%PDF-1.7\n".to_vec())).is_ok());
    }
}
