//! Slide rasterisation.
//!
//! [`Renderer`] is the seam the extraction chain renders through;
//! [`PdfiumRenderer`] is the production implementation. pdfium is a C++
//! library with thread-local state, so every call runs inside
//! `tokio::task::spawn_blocking` and binds its own `Pdfium` instance.
//!
//! Rendering is allowed to fail outright (no libpdfium on the host, a page
//! pdfium cannot rasterise); callers treat every [`RenderError`] as a signal
//! to fall back, never as fatal.

use crate::error::RenderError;
use crate::pipeline::encode::encode_png;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rendered slide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// 1-based page number in the document.
    pub index: usize,
    pub png: Vec<u8>,
}

/// Renders document pages to PNG.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, document: &Path) -> Result<usize, RenderError>;

    /// Render the given 1-based pages at `dpi`, in order. Fails on the first
    /// page that cannot be rendered.
    async fn render(
        &self,
        document: &Path,
        pages: &[usize],
        dpi: u32,
    ) -> Result<Vec<RenderedPage>, RenderError>;
}

/// Bind to libpdfium: `PDFIUM_LIB_PATH` (file or directory), then the
/// working directory, then the system library path.
pub fn bind_pdfium() -> Result<Pdfium, RenderError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(p) if !p.is_empty() => {
            let path = PathBuf::from(&p);
            if path.is_dir() {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            } else {
                Pdfium::bind_to_library(&path)
            }
        }
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| RenderError::Unavailable(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// pdfium-backed [`Renderer`].
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    password: Option<String>,
    max_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(password: Option<String>, max_pixels: u32) -> Self {
        Self {
            password,
            max_pixels,
        }
    }
}

#[async_trait]
impl Renderer for PdfiumRenderer {
    async fn page_count(&self, document: &Path) -> Result<usize, RenderError> {
        let path = document.to_path_buf();
        let password = self.password.clone();

        tokio::task::spawn_blocking(move || {
            let pdfium = bind_pdfium()?;
            let doc = pdfium
                .load_pdf_from_file(&path, password.as_deref())
                .map_err(|e| RenderError::Document(format!("{:?}", e)))?;
            Ok(doc.pages().len() as usize)
        })
        .await
        .map_err(|e| RenderError::Unavailable(format!("render task panicked: {}", e)))?
    }

    async fn render(
        &self,
        document: &Path,
        pages: &[usize],
        dpi: u32,
    ) -> Result<Vec<RenderedPage>, RenderError> {
        let path = document.to_path_buf();
        let password = self.password.clone();
        let max_pixels = self.max_pixels;
        let pages = pages.to_vec();

        tokio::task::spawn_blocking(move || {
            render_blocking(&path, password.as_deref(), &pages, dpi, max_pixels)
        })
        .await
        .map_err(|e| RenderError::Unavailable(format!("render task panicked: {}", e)))?
    }
}

fn render_blocking(
    path: &Path,
    password: Option<&str>,
    pages: &[usize],
    dpi: u32,
    max_pixels: u32,
) -> Result<Vec<RenderedPage>, RenderError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(path, password)
        .map_err(|e| RenderError::Document(format!("{:?}", e)))?;

    let doc_pages = document.pages();
    let total = doc_pages.len() as usize;
    info!("Rendering {} of {} pages at {} DPI", pages.len(), total, dpi);

    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(dpi as f32 / 72.0)
        .set_maximum_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(pages.len());
    for &index in pages {
        if index == 0 || index > total {
            return Err(RenderError::Page {
                page: index,
                detail: format!("out of range (document has {} pages)", total),
            });
        }

        let page = doc_pages
            .get((index - 1) as u16)
            .map_err(|e| RenderError::Page {
                page: index,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Page {
                page: index,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", index, image.width(), image.height());

        let png = encode_png(&image).map_err(|e| RenderError::Page {
            page: index,
            detail: format!("PNG encoding failed: {}", e),
        })?;
        results.push(RenderedPage { index, png });
    }

    Ok(results)
}
