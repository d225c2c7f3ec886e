//! # edgequake-deckcoach
//!
//! Turn a slide deck into presentation coaching material, then score how
//! well an audience understood it.
//!
//! For every slide the pipeline produces the slide text, an optional
//! rendered image, one audience question and a short spoken script. Later,
//! answers to those questions are scored against model-written reference
//! answers in a single report.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Extract   render pages via pdfium (150 DPI, retry page by page at 72)
//!  │               └─ nothing rendered? direct text, split on page breaks
//!  ├─ 2. OCR       vision-model transcription of each rendered slide
//!  ├─ 3. Generate  one question + one speech per slide (rate-limited)
//!  ├─ 4. Upload    slide PNGs to the blob store
//!  └─ 5. Record    { slideCount, hasImages, slideTexts, questions, speechContent }
//!
//! QA pairs ──▶ one batch evaluation call ──▶ per-pair calls if it fails ──▶ Report
//! ```
//!
//! Only an unreadable document or a failed save aborts a run. Everything
//! else (a page that will not render, an OCR failure, a provider that keeps
//! rate limiting) degrades one slide and is listed in
//! [`ProcessingResult::issues`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_deckcoach::{
//!     load_document, FsBlobStore, JsonRecordStore, Pipeline, PipelineConfig, QaPair,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::default();
//!     let pipeline = Pipeline::from_config(
//!         config,
//!         Arc::new(FsBlobStore::new("deckcoach-data/blobs")),
//!         Arc::new(JsonRecordStore::new("deckcoach-data")),
//!     )?;
//!
//!     let deck = load_document("talk.pdf", 120).await?;
//!     let result = pipeline.process_and_save(&deck).await?;
//!     println!("{}: {} slides", result.code, result.slide_count());
//!
//!     let pairs = vec![QaPair::new(
//!         result.question(1).unwrap_or("What is this talk about?"),
//!         "It explains our Q3 roadmap.",
//!     )];
//!     let report = pipeline.generate_and_save_report(&result.code, &pairs).await?;
//!     println!("pass rate {}%", report.summary.pass_rate);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `deckcoach` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-deckcoach = { version = "0.1", default-features = false }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `OPENAI_API_KEY` | OpenAI API key |
//! | `ANTHROPIC_API_KEY` | Anthropic API key |
//! | `GEMINI_API_KEY` | Google Gemini API key |
//! | `EDGEQUAKE_LLM_PROVIDER` | Override provider (with `EDGEQUAKE_MODEL`) |
//! | `EDGEQUAKE_MODEL` | Override model ID |
//! | `PDFIUM_LIB_PATH` | Path to libpdfium (file or directory) |

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod storage;

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{
    DeckCoachError, ExtractionError, InputError, PersistenceError, ProviderError, SlideIssue,
    StorageError,
};
pub use output::{
    Document, Evaluation, ExtractionMethod, Page, PipelineState, PresentationRecord,
    ProcessingResult, QaPair, Report, ReportSummary,
};
pub use pipeline::input::{is_url, load_document};
pub use pipeline::schedule::{Clock, RateLimitPolicy, RateLimitedCaller, TokioClock};
pub use process::{generate_code, Collaborators, Pipeline};
pub use progress::{EvaluationMode, NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use storage::{BlobStore, FsBlobStore, JsonRecordStore, MemoryBlobStore, RecordStore};
