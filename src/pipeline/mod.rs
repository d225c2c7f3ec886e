//! Pipeline stages for deck processing and answer evaluation.
//!
//! Each submodule implements one step and owns the trait for the
//! collaborator behind it, so any stage can be swapped (a different
//! renderer, a scripted provider in tests) without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ─┬─ render ──▶ ocr ─┐
//!                    └─ text ──▶ split ─┴─▶ generate ──▶ (upload)
//!
//! QA pairs ──▶ evaluate ──▶ report
//! ```
//!
//! 1. [`input`]: local path or URL to an in-memory document
//! 2. [`extract`]: render-first extraction chain with direct-text fallback
//! 3. [`render`]: pdfium rasterisation in `spawn_blocking`
//! 4. [`encode`]: PNG bytes and base64 `ImageData`
//! 5. [`ocr`]: vision-model transcription of rendered slides
//! 6. [`split`]: page splitting of raw extracted text
//! 7. [`generate`]: one question and one speech script per slide
//! 8. [`evaluate`]: batch answer scoring with per-pair fallback
//!
//! Shared by the model-calling stages: [`llm`] (provider seam and error
//! classification), [`schedule`] (spacing and rate-limit retries) and
//! [`payload`] (reply cleanup and JSON extraction).

pub mod encode;
pub mod evaluate;
pub mod extract;
pub mod generate;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod payload;
pub mod render;
pub mod schedule;
pub mod split;
