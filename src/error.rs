//! Error types for the edgequake-deckcoach library.
//!
//! Two tiers of failure, matching how the pipeline treats them:
//!
//! * [`DeckCoachError`]: **Fatal**: the document cannot be read at all, the
//!   result could not be saved, or the pipeline is misconfigured. Returned as
//!   `Err` from [`crate::process::Pipeline`] operations.
//!
//! * [`SlideIssue`]: **Non-fatal**: one slide lost its image, its OCR text,
//!   a generated artifact or its upload. Recorded on
//!   [`crate::output::ProcessingResult::issues`] and the run continues.
//!
//! Each collaborator has its own error enum ([`RenderError`],
//! [`ExtractError`], [`RecognitionError`], [`ProviderError`],
//! [`StorageError`], [`PersistenceError`]); the orchestrator decides which of
//! them escalate.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors returned by the pipeline.
#[derive(Debug, Error)]
pub enum DeckCoachError {
    /// Nothing readable could be obtained from the document.
    #[error("Could not read document: {0}")]
    Extraction(#[from] ExtractionError),

    /// The pipeline result was produced but could not be stored.
    #[error("Could not save result: {0}")]
    Persistence(#[from] PersistenceError),

    /// Nothing of the requested kind is stored under the code.
    #[error("No {what} found for code '{code}'")]
    UnknownCode { what: &'static str, code: String },

    /// Input path / URL could not be turned into a document.
    #[error("Could not load input: {0}")]
    Input(#[from] InputError),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeckCoachError {
    /// Classify a failed lookup of a `what` record: a missing record is
    /// [`DeckCoachError::UnknownCode`], anything else a persistence failure.
    pub fn from_lookup(what: &'static str, err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound(code) => DeckCoachError::UnknownCode { what, code },
            other => DeckCoachError::Persistence(other),
        }
    }
}

/// Fatal extraction failure: no page and no text obtainable.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document '{name}' is empty")]
    EmptyDocument { name: String },

    #[error("'{name}' is not a PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    /// Rendering produced nothing and direct text extraction failed too.
    #[error("'{name}' is unreadable: {detail}")]
    Unreadable { name: String, detail: String },

    #[error("scratch directory unavailable: {0}")]
    Scratch(#[source] std::io::Error),
}

/// Errors resolving a CLI/library input into a [`crate::output::Document`].
#[derive(Debug, Error)]
pub enum InputError {
    #[error("file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    #[error("permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    #[error("failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },
}

/// Rasterisation failure. Always recoverable: triggers the text fallback.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("pdfium library unavailable: {0}")]
    Unavailable(String),

    #[error("renderer could not open the document: {0}")]
    Document(String),

    #[error("page {page} failed to render: {detail}")]
    Page { page: usize, detail: String },
}

/// Direct text extraction failure.
#[derive(Debug, Clone, Error)]
#[error("text extraction failed: {0}")]
pub struct ExtractError(pub String);

/// OCR failure for one page image.
#[derive(Debug, Clone, Error)]
#[error("recognition failed: {0}")]
pub struct RecognitionError(pub String);

/// Errors surfaced by a [`crate::pipeline::llm::CompletionProvider`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Upstream said "slow down"; `retry_after` is the provider's hint.
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Rate limiting persisted through every retry.
    #[error("still rate limited after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    /// Any other provider failure.
    #[error("provider error: {0}")]
    Api(String),
}

impl ProviderError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::RateLimitExhausted { .. }
        )
    }
}

/// Model output did not contain the structured payload we asked for.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("no JSON payload found in response")]
    NoPayload,

    #[error("malformed JSON payload: {0}")]
    Malformed(String),
}

/// Blob-storage failure. Recoverable: the image simply is not stored.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to store '{key}': {source}")]
    Put {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("object '{key}' does not exist")]
    NotFound { key: String },

    #[error("invalid object key '{0}'")]
    InvalidKey(String),
}

/// Record-store failure. Fatal for the operation that triggered it.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("no record stored under code '{0}'")]
    NotFound(String),

    #[error("a record is already stored under code '{0}'")]
    Conflict(String),

    #[error("storage I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record '{code}' could not be (de)serialised: {source}")]
    Serde {
        code: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A non-fatal problem with one slide.
///
/// The run continues; the issue list explains which artifacts are missing
/// and sets [`crate::output::ProcessingResult::partial`].
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlideIssue {
    #[error("Slide {page}: not rendered, text recovered from direct extraction")]
    NotRendered { page: usize },

    #[error("Slide {page}: text recognition failed: {detail}")]
    RecognitionFailed { page: usize, detail: String },

    #[error("Slide {page}: {artifact} generation failed: {detail}")]
    GenerationFailed {
        page: usize,
        artifact: String,
        detail: String,
    },

    #[error("Slide {page}: image upload failed: {detail}")]
    UploadFailed { page: usize, detail: String },
}

impl SlideIssue {
    pub fn page(&self) -> usize {
        match self {
            SlideIssue::NotRendered { page }
            | SlideIssue::RecognitionFailed { page, .. }
            | SlideIssue::GenerationFailed { page, .. }
            | SlideIssue::UploadFailed { page, .. } => *page,
        }
    }
}
