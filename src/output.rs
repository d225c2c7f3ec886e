//! Data model: documents in, processing results and reports out.
//!
//! Inside the pipeline per-slide values live in ordered vectors indexed by
//! `page_index - 1`. The integer-keyed maps of the persisted contract
//! ([`PresentationRecord`]) are produced only at the serialisation boundary,
//! so "slide has no question" and "slide does not exist" never blur together.

use crate::error::SlideIssue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Input ────────────────────────────────────────────────────────────────

/// A slide deck as handed to the pipeline: raw bytes plus a display name.
///
/// Owned by the caller; the pipeline copies it into its scratch directory
/// and never persists it.
#[derive(Clone)]
pub struct Document {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Display name without directory or `.pdf` extension, used as the title.
    pub fn title(&self) -> String {
        let base = self
            .name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.name);
        let stem = match base.rfind('.') {
            Some(dot) if dot > 0 => &base[..dot],
            _ => base,
        };
        stem.to_string()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

// ── Processing ───────────────────────────────────────────────────────────

/// One slide of the processed deck.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// 1-based, contiguous, in emission order.
    pub index: usize,
    pub text: String,
    /// Blob-store key of the rendered slide image, set only once stored.
    pub image_ref: Option<String>,
}

/// Lifecycle of a single `process_document` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Received,
    Extracting,
    Generating,
    Uploading,
    Complete,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Received => "received",
            PipelineState::Extracting => "extracting",
            PipelineState::Generating => "generating",
            PipelineState::Uploading => "uploading",
            PipelineState::Complete => "complete",
            PipelineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How slide text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Every page rendered and recognised.
    Rendered,
    /// Some pages rendered, the rest patched from direct text.
    PartiallyRendered,
    /// Rendering produced nothing; direct text split into pages.
    DirectText,
}

/// Everything `process_document` produced for one deck.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub code: String,
    pub title: String,
    pub pages: Vec<Page>,
    pub method: ExtractionMethod,
    /// `questions[i]` belongs to `pages[i]`.
    questions: Vec<Option<String>>,
    /// `speeches[i]` belongs to `pages[i]`.
    speeches: Vec<Option<String>>,
    pub issues: Vec<SlideIssue>,
    pub partial: bool,
}

impl ProcessingResult {
    /// Assemble a result; artifact vectors are padded/truncated to the page count.
    pub fn new(
        code: String,
        title: String,
        pages: Vec<Page>,
        method: ExtractionMethod,
        mut questions: Vec<Option<String>>,
        mut speeches: Vec<Option<String>>,
        issues: Vec<SlideIssue>,
    ) -> Self {
        questions.resize(pages.len(), None);
        speeches.resize(pages.len(), None);
        let partial = !issues.is_empty();
        Self {
            code,
            title,
            pages,
            method,
            questions,
            speeches,
            issues,
            partial,
        }
    }

    pub fn slide_count(&self) -> usize {
        self.pages.len()
    }

    pub fn has_images(&self) -> bool {
        self.pages.iter().any(|p| p.image_ref.is_some())
    }

    /// Question for the 1-based `page_index`, `None` if absent or out of range.
    pub fn question(&self, page_index: usize) -> Option<&str> {
        page_index
            .checked_sub(1)
            .and_then(|i| self.questions.get(i))
            .and_then(|q| q.as_deref())
    }

    /// Speech script for the 1-based `page_index`.
    pub fn speech(&self, page_index: usize) -> Option<&str> {
        page_index
            .checked_sub(1)
            .and_then(|i| self.speeches.get(i))
            .and_then(|s| s.as_deref())
    }

    /// Project onto the persisted contract.
    pub fn to_record(&self) -> PresentationRecord {
        let slide_texts = self
            .pages
            .iter()
            .map(|p| (p.index, p.text.clone()))
            .collect();
        let questions = self
            .pages
            .iter()
            .filter_map(|p| self.question(p.index).map(|q| (p.index, vec![q.to_string()])))
            .collect();
        let speech_content = self
            .pages
            .iter()
            .filter_map(|p| self.speech(p.index).map(|s| (p.index, s.to_string())))
            .collect();
        let slide_images = self
            .pages
            .iter()
            .filter_map(|p| p.image_ref.clone().map(|r| (p.index, r)))
            .collect();

        PresentationRecord {
            code: self.code.clone(),
            title: self.title.clone(),
            slide_count: self.slide_count(),
            has_images: self.has_images(),
            slide_texts,
            questions,
            speech_content,
            slide_images,
        }
    }
}

/// The recordable output of `process_document`, consumed by persistence and
/// by viewer clients. Map keys serialise as JSON strings (`"1"`, `"2"`, …).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationRecord {
    pub code: String,
    pub title: String,
    pub slide_count: usize,
    pub has_images: bool,
    pub slide_texts: BTreeMap<usize, String>,
    pub questions: BTreeMap<usize, Vec<String>>,
    pub speech_content: BTreeMap<usize, String>,
    #[serde(default)]
    pub slide_images: BTreeMap<usize, String>,
}

// ── Evaluation ───────────────────────────────────────────────────────────

/// A caller-supplied question and the audience member's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QaPair {
    pub question: String,
    pub user_answer: String,
}

impl QaPair {
    pub fn new(question: impl Into<String>, user_answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_answer: user_answer.into(),
        }
    }
}

/// Score of one answer against the model's reference answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub question: String,
    pub user_answer: String,
    pub reference_answer: String,
    /// 0–100.
    pub similarity: u8,
    pub missing_points: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_questions: usize,
    /// Mean similarity, rounded to the nearest integer.
    pub average_score: u32,
    pub passed_questions: usize,
    /// `round(passed / total * 100)`, 0 for an empty report.
    pub pass_rate: u32,
}

impl ReportSummary {
    pub fn from_evaluations(evaluations: &[Evaluation], pass_threshold: u8) -> Self {
        let total = evaluations.len();
        if total == 0 {
            return Self {
                total_questions: 0,
                average_score: 0,
                passed_questions: 0,
                pass_rate: 0,
            };
        }
        let sum: u64 = evaluations.iter().map(|e| e.similarity as u64).sum();
        let passed = evaluations
            .iter()
            .filter(|e| e.similarity >= pass_threshold)
            .count();
        Self {
            total_questions: total,
            average_score: (sum as f64 / total as f64).round() as u32,
            passed_questions: passed,
            pass_rate: (passed as f64 / total as f64 * 100.0).round() as u32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub code: String,
    pub title: String,
    pub summary: ReportSummary,
    pub evaluations: Vec<Evaluation>,
}
