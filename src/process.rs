//! The two entry points: process a deck, and report on answers.
//!
//! ```text
//! Received ─▶ Extracting ─▶ Generating ─▶ Uploading ─▶ Complete
//!                 │                                     (partial = any SlideIssue)
//!                 └──────────▶ Failed   (only ExtractionError / PersistenceError)
//! ```
//!
//! A run owns a scratch [`TempDir`] holding the document copy pdfium reads
//! from; it is removed on every exit path when the run's future completes
//! or is dropped. Pages are handled strictly in order, one provider call at
//! a time, all calls going through one [`RateLimitedCaller`] that can be
//! shared by several [`Pipeline`]s.

use crate::config::PipelineConfig;
use crate::error::{DeckCoachError, ExtractionError, PersistenceError, SlideIssue, StorageError};
use crate::output::{
    Document, Page, PipelineState, PresentationRecord, ProcessingResult, QaPair, Report,
    ReportSummary,
};
use crate::pipeline::evaluate::{BatchEvaluator, EvaluationSettings};
use crate::pipeline::extract::{validate, ExtractionChain, PdfiumTextExtractor, TextExtractor};
use crate::pipeline::generate::{ContentGenerator, GenerationSettings};
use crate::pipeline::llm::{resolve_provider, CompletionProvider, EdgequakeProvider};
use crate::pipeline::ocr::{Recognizer, VisionRecognizer};
use crate::pipeline::render::{PdfiumRenderer, Renderer};
use crate::pipeline::schedule::{RateLimitPolicy, RateLimitedCaller, TokioClock};
use crate::progress::{NoopProgressCallback, PipelineProgressCallback};
use crate::storage::{signed_presentation, BlobStore, RecordStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The external services a [`Pipeline`] runs against.
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub text_extractor: Arc<dyn TextExtractor>,
    pub recognizer: Arc<dyn Recognizer>,
    pub provider: Arc<dyn CompletionProvider>,
    pub blobs: Arc<dyn BlobStore>,
    pub records: Arc<dyn RecordStore>,
}

/// Deck processing and answer evaluation over a fixed set of collaborators.
pub struct Pipeline {
    config: PipelineConfig,
    renderer: Arc<dyn Renderer>,
    text_extractor: Arc<dyn TextExtractor>,
    recognizer: Arc<dyn Recognizer>,
    generator: ContentGenerator,
    evaluator: BatchEvaluator,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    caller: Arc<RateLimitedCaller>,
}

impl Pipeline {
    /// Assemble a pipeline. Pass the same `caller` to several pipelines to
    /// space their provider calls against each other.
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        caller: Arc<RateLimitedCaller>,
    ) -> Self {
        let generator = ContentGenerator::new(
            Arc::clone(&collaborators.provider),
            Arc::clone(&caller),
            GenerationSettings {
                temperature: config.generation_temperature,
                question_max_tokens: config.question_max_tokens,
                speech_max_tokens: config.speech_max_tokens,
            },
        );
        let evaluator = BatchEvaluator::new(
            Arc::clone(&collaborators.provider),
            Arc::clone(&caller),
            EvaluationSettings {
                temperature: config.evaluation_temperature,
                max_tokens: config.evaluation_max_tokens,
            },
        )
        .with_progress(config.progress_callback.clone());

        Self {
            config,
            renderer: collaborators.renderer,
            text_extractor: collaborators.text_extractor,
            recognizer: collaborators.recognizer,
            generator,
            evaluator,
            blobs: collaborators.blobs,
            records: collaborators.records,
            caller,
        }
    }

    /// Production wiring: pdfium for rendering and text, the resolved
    /// `edgequake_llm` provider for OCR and generation, wall-clock scheduling.
    pub fn from_config(
        config: PipelineConfig,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Self, DeckCoachError> {
        let llm = resolve_provider(&config)?;
        info!(
            "Using provider={}, model={}",
            config.provider_name.as_deref().unwrap_or("auto"),
            config.model.as_deref().unwrap_or("default")
        );

        let caller = Arc::new(RateLimitedCaller::new(
            RateLimitPolicy::from_config(&config),
            Arc::new(TokioClock),
        ));
        let collaborators = Collaborators {
            renderer: Arc::new(PdfiumRenderer::new(
                config.password.clone(),
                config.max_rendered_pixels,
            )),
            text_extractor: Arc::new(PdfiumTextExtractor::new(config.password.clone())),
            recognizer: Arc::new(VisionRecognizer::new(
                Arc::clone(&llm),
                Arc::clone(&caller),
                config.ocr_max_tokens,
                config.evaluation_temperature,
            )),
            provider: Arc::new(EdgequakeProvider::new(llm)),
            blobs,
            records,
        };
        Ok(Self::new(config, collaborators, caller))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The scheduler this pipeline's provider calls go through.
    pub fn caller(&self) -> &Arc<RateLimitedCaller> {
        &self.caller
    }

    fn progress(&self) -> &dyn PipelineProgressCallback {
        match self.config.progress_callback {
            Some(ref cb) => cb.as_ref(),
            None => &NoopProgressCallback,
        }
    }

    // ── ProcessDocument ──────────────────────────────────────────────────

    /// Extract slides, generate questions and speeches, upload images.
    ///
    /// # Errors
    /// Only [`DeckCoachError::Extraction`]: the document is empty, not a
    /// PDF, or yields neither images nor text. Everything after extraction
    /// degrades per slide and is reported in [`ProcessingResult::issues`].
    pub async fn process_document(
        &self,
        document: &Document,
        code: &str,
    ) -> Result<ProcessingResult, DeckCoachError> {
        let start = Instant::now();
        info!("Processing '{}' as {}", document.name, code);
        self.progress().on_state_change(PipelineState::Received);

        match self.run(document, code).await {
            Ok(result) => {
                self.progress().on_state_change(PipelineState::Complete);
                info!(
                    "{}: {} slides, {} issues, {:?}",
                    code,
                    result.slide_count(),
                    result.issues.len(),
                    start.elapsed()
                );
                Ok(result)
            }
            Err(e) => {
                self.progress().on_state_change(PipelineState::Failed);
                warn!("{}: {}", code, e);
                Err(e)
            }
        }
    }

    async fn run(&self, document: &Document, code: &str) -> Result<ProcessingResult, DeckCoachError> {
        let progress = self.progress();

        // ── Extracting ───────────────────────────────────────────────────
        progress.on_state_change(PipelineState::Extracting);
        validate(document)?;

        let scratch = TempDir::new().map_err(ExtractionError::Scratch)?;
        let doc_path = scratch.path().join("deck.pdf");
        tokio::fs::write(&doc_path, &document.bytes)
            .await
            .map_err(ExtractionError::Scratch)?;

        let chain = ExtractionChain {
            renderer: self.renderer.as_ref(),
            text_extractor: self.text_extractor.as_ref(),
            dpi: self.config.dpi,
            fallback_dpi: self.config.fallback_dpi,
        };
        let extraction = chain.extract(&doc_path, &document.name).await?;
        debug!(
            "{}: {} of {} pages rendered",
            code,
            extraction.rendered_count(),
            extraction.pages.len()
        );
        let method = extraction.method;
        let mut issues = extraction.issues;
        let mut drafts = extraction.pages;
        let total = drafts.len();

        // ── Generating ───────────────────────────────────────────────────
        progress.on_state_change(PipelineState::Generating);
        let mut questions = Vec::with_capacity(total);
        let mut speeches = Vec::with_capacity(total);

        for draft in drafts.iter_mut() {
            let page = draft.index;
            progress.on_slide_start(page, total);

            if let Some(ref png) = draft.image {
                match self.recognizer.recognize(png).await {
                    Ok(text) => draft.text = text,
                    Err(e) => {
                        warn!("Slide {}: {}", page, e);
                        progress.on_slide_error(page, total, &e.to_string());
                        issues.push(SlideIssue::RecognitionFailed {
                            page,
                            detail: e.to_string(),
                        });
                    }
                }
            }

            if draft.text.trim().chars().count() <= self.config.min_slide_chars {
                debug!("Slide {}: text too short, skipping generation", page);
                progress.on_slide_skipped(page, total);
                questions.push(None);
                speeches.push(None);
                continue;
            }

            let question = self.generator.try_question(&draft.text, page).await;
            questions.push(self.artifact(question, page, total, "question", &mut issues));
            let speech = self.generator.try_speech(&draft.text, page).await;
            speeches.push(self.artifact(speech, page, total, "speech", &mut issues));

            progress.on_slide_complete(page, total);
        }

        // ── Uploading ────────────────────────────────────────────────────
        progress.on_state_change(PipelineState::Uploading);
        let mut pages = Vec::with_capacity(total);
        for draft in drafts {
            let image_ref = match draft.image {
                Some(png) => {
                    let key = image_key(code, draft.index);
                    match self.blobs.put(&key, &png, "image/png").await {
                        Ok(()) => Some(key),
                        Err(e) => {
                            warn!("Slide {}: upload failed: {}", draft.index, e);
                            progress.on_slide_error(draft.index, total, &e.to_string());
                            issues.push(SlideIssue::UploadFailed {
                                page: draft.index,
                                detail: e.to_string(),
                            });
                            None
                        }
                    }
                }
                None => None,
            };
            pages.push(Page {
                index: draft.index,
                text: draft.text,
                image_ref,
            });
        }

        drop(scratch);
        issues.sort_by_key(SlideIssue::page);

        Ok(ProcessingResult::new(
            code.to_string(),
            document.title(),
            pages,
            method,
            questions,
            speeches,
            issues,
        ))
    }

    fn artifact(
        &self,
        outcome: Result<Option<String>, crate::error::ProviderError>,
        page: usize,
        total: usize,
        artifact: &str,
        issues: &mut Vec<SlideIssue>,
    ) -> Option<String> {
        match outcome {
            Ok(value) => value,
            Err(e) => {
                warn!("Slide {}: {} generation failed: {}", page, artifact, e);
                self.progress().on_slide_error(page, total, &e.to_string());
                issues.push(SlideIssue::GenerationFailed {
                    page,
                    artifact: artifact.to_string(),
                    detail: e.to_string(),
                });
                None
            }
        }
    }

    /// Process under a fresh code and persist the record.
    ///
    /// The code is checked against the store before processing; a deck that
    /// races another onto the same code fails with a conflict rather than
    /// replacing the stored record.
    pub async fn process_and_save(&self, document: &Document) -> Result<ProcessingResult, DeckCoachError> {
        let code = pick_unused_code(self.records.as_ref(), generate_code).await?;
        let result = self.process_document(document, &code).await?;
        self.records.save_presentation(&result.to_record()).await?;
        Ok(result)
    }

    // ── GenerateReport ───────────────────────────────────────────────────

    /// Score `pairs`; one evaluation per pair, in order. Never fails.
    pub async fn generate_report(&self, code: &str, title: &str, pairs: &[QaPair]) -> Report {
        let evaluations = self.evaluator.evaluate(pairs).await;
        let summary = ReportSummary::from_evaluations(&evaluations, self.config.pass_threshold);
        info!(
            "{}: report on {} answers, average {}, pass rate {}%",
            code, summary.total_questions, summary.average_score, summary.pass_rate
        );
        Report {
            code: code.to_string(),
            title: title.to_string(),
            summary,
            evaluations,
        }
    }

    /// Look up the presentation, score `pairs`, persist the report.
    pub async fn generate_and_save_report(
        &self,
        code: &str,
        pairs: &[QaPair],
    ) -> Result<Report, DeckCoachError> {
        let record = self
            .records
            .load_presentation(code)
            .await
            .map_err(|e| DeckCoachError::from_lookup("presentation", e))?;
        let report = self.generate_report(code, &record.title, pairs).await;
        self.records.save_report(&report).await?;
        Ok(report)
    }

    // ── Retrieval ────────────────────────────────────────────────────────

    pub async fn slide_image_url(&self, key: &str) -> Result<String, StorageError> {
        self.blobs
            .signed_url(key, Duration::from_secs(self.config.signed_url_ttl_secs))
            .await
    }

    /// The stored record with image keys replaced by signed URLs.
    pub async fn load_presentation(&self, code: &str) -> Result<PresentationRecord, DeckCoachError> {
        signed_presentation(
            self.records.as_ref(),
            self.blobs.as_ref(),
            code,
            Duration::from_secs(self.config.signed_url_ttl_secs),
        )
        .await
    }

    pub async fn load_report(&self, code: &str) -> Result<Report, DeckCoachError> {
        self.records
            .load_report(code)
            .await
            .map_err(|e| DeckCoachError::from_lookup("report", e))
    }
}

/// Blob key of a slide image: `<CODE>/slide-007.png`.
pub fn image_key(code: &str, page: usize) -> String {
    format!("{code}/slide-{page:03}.png")
}

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

/// Short uppercase presentation code. Unambiguous alphabet (no `0/O`, `1/I`).
///
/// Each character takes one random byte of a v4 UUID; the alphabet has 32
/// symbols so `byte % 32` is uniform.
pub fn generate_code() -> String {
    Uuid::new_v4().as_bytes()[..CODE_LEN]
        .iter()
        .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
        .collect()
}

const CODE_ATTEMPTS: usize = 8;

/// First code from `next` with no presentation stored under it.
pub(crate) async fn pick_unused_code(
    records: &dyn RecordStore,
    mut next: impl FnMut() -> String,
) -> Result<String, DeckCoachError> {
    for _ in 0..CODE_ATTEMPTS {
        let code = next();
        match records.load_presentation(&code).await {
            Err(PersistenceError::NotFound(_)) => return Ok(code),
            Ok(_) => debug!("Code {} already taken, drawing another", code),
            Err(e) => return Err(e.into()),
        }
    }
    Err(DeckCoachError::Internal(format!(
        "no unused presentation code after {CODE_ATTEMPTS} attempts"
    )))
}
