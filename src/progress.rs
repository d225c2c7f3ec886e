//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to observe a
//! run: state transitions, each slide's generation, and which evaluation
//! strategy a report ended up using.
//!
//! # Example
//!
//! ```rust
//! use edgequake_deckcoach::{PipelineConfig, PipelineProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for CountingCallback {
//!     fn on_slide_complete(&self, page: usize, total: usize) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("slide {page}/{total} done");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PipelineState;
use std::sync::Arc;

/// Which path the batch evaluator took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// One combined call scored every pair.
    Batch,
    /// The combined call failed; pairs were scored one at a time.
    PerItem,
}

/// Called by the pipeline as it moves through a document or report.
///
/// All methods default to no-ops. Implementations must be `Send + Sync`:
/// several documents may be processed concurrently with the same config.
pub trait PipelineProgressCallback: Send + Sync {
    /// The run entered `state`.
    fn on_state_change(&self, state: PipelineState) {
        let _ = state;
    }

    /// Called before the provider is asked about a slide.
    fn on_slide_start(&self, page: usize, total: usize) {
        let _ = (page, total);
    }

    /// Called after a slide's question and speech were attempted.
    fn on_slide_complete(&self, page: usize, total: usize) {
        let _ = (page, total);
    }

    /// The slide's text was too short to be worth a provider call.
    fn on_slide_skipped(&self, page: usize, total: usize) {
        let _ = (page, total);
    }

    /// A non-fatal failure on a slide.
    fn on_slide_error(&self, page: usize, total: usize, error: &str) {
        let _ = (page, total, error);
    }

    /// Evaluation of `pairs` answers started in `mode`.
    fn on_evaluation(&self, mode: EvaluationMode, pairs: usize) {
        let _ = (mode, pairs);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
