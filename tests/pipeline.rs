//! Integration tests for the deck pipeline and report generation.
//!
//! Every collaborator is a hand-written fake: a renderer that fails on
//! demand, a scripted completion provider that counts its calls, an
//! in-memory blob store and a manual clock, so these tests run offline and
//! without wall-clock sleeps.

use async_trait::async_trait;
use edgequake_deckcoach::error::{ExtractError, RecognitionError, RenderError};
use edgequake_deckcoach::pipeline::evaluate::{RATE_LIMITED_REFERENCE, UNAVAILABLE_REFERENCE};
use edgequake_deckcoach::pipeline::extract::TextExtractor;
use edgequake_deckcoach::pipeline::llm::{CompletionProvider, CompletionRequest};
use edgequake_deckcoach::pipeline::ocr::Recognizer;
use edgequake_deckcoach::pipeline::render::{RenderedPage, Renderer};
use edgequake_deckcoach::pipeline::schedule::ManualClock;
use edgequake_deckcoach::{
    BlobStore, Collaborators, DeckCoachError, Document, EvaluationMode, ExtractionError,
    ExtractionMethod, JsonRecordStore, MemoryBlobStore, Pipeline, PipelineConfig,
    PipelineProgressCallback, PipelineState, ProviderError, QaPair, RateLimitPolicy,
    RateLimitedCaller, SlideIssue, StorageError,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Renderer with a page count and scripted failures.
#[derive(Default)]
struct FakeRenderer {
    pages: usize,
    /// `page_count` fails: no pdfium on the host.
    unavailable: bool,
    /// The all-pages pass at the first DPI fails.
    fail_full_pass: bool,
    /// Page-by-page rendering fails from this page on.
    fail_from: Option<usize>,
    calls: Mutex<Vec<(Vec<usize>, u32)>>,
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn page_count(&self, _document: &Path) -> Result<usize, RenderError> {
        if self.unavailable {
            Err(RenderError::Unavailable("libpdfium not found".into()))
        } else {
            Ok(self.pages)
        }
    }

    async fn render(
        &self,
        _document: &Path,
        pages: &[usize],
        dpi: u32,
    ) -> Result<Vec<RenderedPage>, RenderError> {
        self.calls.lock().unwrap().push((pages.to_vec(), dpi));
        if self.fail_full_pass && pages.len() > 1 {
            return Err(RenderError::Page {
                page: 1,
                detail: "out of memory".into(),
            });
        }
        pages
            .iter()
            .map(|&index| match self.fail_from {
                Some(from) if index >= from => Err(RenderError::Page {
                    page: index,
                    detail: "broken content stream".into(),
                }),
                _ => Ok(RenderedPage {
                    index,
                    png: format!("PNG{index}").into_bytes(),
                }),
            })
            .collect()
    }
}

struct FakeText(Result<String, String>);

#[async_trait]
impl TextExtractor for FakeText {
    async fn extract_text(&self, _document: &Path) -> Result<String, ExtractError> {
        self.0.clone().map_err(ExtractError)
    }
}

/// Reads the page number back out of `PNG<n>`.
#[derive(Default)]
struct FakeRecognizer {
    fail_on: Option<usize>,
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn recognize(&self, png: &[u8]) -> Result<String, RecognitionError> {
        let page: usize = String::from_utf8_lossy(&png[3..]).parse().unwrap();
        if self.fail_on == Some(page) {
            return Err(RecognitionError("vision model refused".into()));
        }
        Ok(format!("Slide {page}: recognised text about the roadmap"))
    }
}

type Reply = dyn Fn(usize, &CompletionRequest) -> Result<String, ProviderError> + Send + Sync;

/// Provider answering through a closure of `(call_number, request)`.
struct ScriptedProvider {
    reply: Box<Reply>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    fn new(
        reply: impl Fn(usize, &CompletionRequest) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Questions and speeches that echo the slide number.
    fn presenter() -> Arc<Self> {
        Self::new(|_, req| Ok(presenter_reply(req)))
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn presenter_reply(req: &CompletionRequest) -> String {
    if req.prompt.contains("exactly ONE question") {
        "Question: What drives the roadmap?".into()
    } else {
        "Today I will walk you through our roadmap.".into()
    }
}

fn is_batch(req: &CompletionRequest) -> bool {
    req.prompt.starts_with("Evaluate the following")
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let n = {
            let mut reqs = self.requests.lock().unwrap();
            reqs.push(request.clone());
            reqs.len()
        };
        (self.reply)(n, request)
    }
}

struct FailingBlobStore;

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, key: &str, _bytes: &[u8], _ct: &str) -> Result<(), StorageError> {
        Err(StorageError::Put {
            key: key.to_string(),
            source: std::io::Error::other("bucket unavailable"),
        })
    }

    async fn signed_url(&self, key: &str, _ttl: Duration) -> Result<String, StorageError> {
        Err(StorageError::NotFound {
            key: key.to_string(),
        })
    }
}

#[derive(Default)]
struct Recorder {
    states: Mutex<Vec<PipelineState>>,
    skipped: AtomicUsize,
    modes: Mutex<Vec<EvaluationMode>>,
}

impl PipelineProgressCallback for Recorder {
    fn on_state_change(&self, state: PipelineState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_slide_skipped(&self, _page: usize, _total: usize) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn on_evaluation(&self, mode: EvaluationMode, _pairs: usize) {
        self.modes.lock().unwrap().push(mode);
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    pipeline: Pipeline,
    provider: Arc<ScriptedProvider>,
    renderer: Arc<FakeRenderer>,
    clock: Arc<ManualClock>,
    recorder: Arc<Recorder>,
    _data: TempDir,
}

struct Setup {
    renderer: FakeRenderer,
    text: FakeText,
    recognizer: FakeRecognizer,
    provider: Arc<ScriptedProvider>,
    blobs: Arc<dyn BlobStore>,
}

impl Setup {
    /// No pdfium, direct text only.
    fn text_only(raw: &str) -> Self {
        Self {
            renderer: FakeRenderer {
                unavailable: true,
                ..Default::default()
            },
            text: FakeText(Ok(raw.to_string())),
            recognizer: FakeRecognizer::default(),
            provider: ScriptedProvider::presenter(),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    fn rendered(pages: usize) -> Self {
        Self {
            renderer: FakeRenderer {
                pages,
                ..Default::default()
            },
            ..Self::text_only("")
        }
    }

    fn build(self) -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        let data = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new());
        let recorder = Arc::new(Recorder::default());
        let config = PipelineConfig::builder()
            .progress_callback(recorder.clone())
            .build()
            .unwrap();
        let caller = Arc::new(RateLimitedCaller::new(
            RateLimitPolicy::from_config(&config),
            clock.clone(),
        ));
        let renderer = Arc::new(self.renderer);
        let pipeline = Pipeline::new(
            config,
            Collaborators {
                renderer: renderer.clone(),
                text_extractor: Arc::new(self.text),
                recognizer: Arc::new(self.recognizer),
                provider: self.provider.clone(),
                blobs: self.blobs,
                records: Arc::new(JsonRecordStore::new(data.path())),
            },
            caller,
        );
        Harness {
            pipeline,
            provider: self.provider,
            renderer,
            clock,
            recorder,
            _data: data,
        }
    }
}

fn deck() -> Document {
    Document::new("decks/q3-roadmap.pdf", b"%PDF-1.7\n% fake deck\n".to_vec())
}

// ── ProcessDocument ──────────────────────────────────────────────────────────

#[tokio::test]
async fn render_failure_yields_text_only_result() {
    let h = Setup::text_only(
        "Roadmap overview for the third quarter\u{000C}Pricing changes in 2025\u{000C}  \n\u{000C}Questions?",
    )
    .build();

    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();

    assert_eq!(result.slide_count(), 3);
    assert!(!result.has_images());
    assert_eq!(result.method, ExtractionMethod::DirectText);
    assert_eq!(
        result.pages.iter().map(|p| p.index).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(result.pages[2].text, "Questions?");
    assert!(!result.partial);
    assert_eq!(result.title, "q3-roadmap");

    let record = result.to_record();
    assert!(!record.has_images);
    assert_eq!(record.slide_count, 3);
    assert_eq!(record.questions[&1], vec!["What drives the roadmap?".to_string()]);
    assert!(!record.questions.contains_key(&3));
}

#[tokio::test]
async fn text_without_separators_is_one_slide() {
    let h = Setup::text_only("A single paragraph about company vision and the mission ahead").build();
    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();
    assert_eq!(result.slide_count(), 1);
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn blank_line_runs_split_slides_when_no_page_breaks() {
    let h = Setup::text_only("First slide with enough text\n\n\nSecond slide with enough text").build();
    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();
    assert_eq!(result.slide_count(), 2);
    assert_eq!(result.pages[1].text, "Second slide with enough text");
}

#[tokio::test]
async fn short_slides_trigger_no_provider_calls() {
    // "Thanks all" is exactly 10 characters.
    let h = Setup::text_only("Hi\u{000C}  Ok  \u{000C}Thanks all").build();
    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();

    assert_eq!(result.slide_count(), 3);
    assert_eq!(h.provider.calls(), 0);
    assert_eq!(h.recorder.skipped.load(Ordering::SeqCst), 3);
    for page in 1..=3 {
        assert_eq!(result.question(page), None);
        assert_eq!(result.speech(page), None);
    }
    assert!(!result.partial);
}

#[tokio::test]
async fn rendered_deck_is_recognised_and_uploaded() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let h = Setup {
        blobs: blobs.clone(),
        ..Setup::rendered(3)
    }
    .build();

    let result = h.pipeline.process_document(&deck(), "K7M2QX").await.unwrap();

    assert_eq!(result.method, ExtractionMethod::Rendered);
    assert_eq!(result.slide_count(), 3);
    assert!(result.has_images());
    assert!(!result.partial);
    assert_eq!(result.pages[1].text, "Slide 2: recognised text about the roadmap");
    assert_eq!(result.pages[1].image_ref.as_deref(), Some("K7M2QX/slide-002.png"));
    assert_eq!(
        blobs.keys(),
        vec![
            "K7M2QX/slide-001.png".to_string(),
            "K7M2QX/slide-002.png".to_string(),
            "K7M2QX/slide-003.png".to_string(),
        ]
    );
    assert_eq!(blobs.get("K7M2QX/slide-003.png").unwrap().1, "image/png");
    assert_eq!(*h.renderer.calls.lock().unwrap(), vec![(vec![1, 2, 3], 150)]);
    assert_eq!(h.provider.calls(), 6);
    assert_eq!(result.speech(3), Some("Today I will walk you through our roadmap."));
}

#[tokio::test]
async fn partial_render_keeps_images_and_patches_missing_pages() {
    let h = Setup {
        renderer: FakeRenderer {
            pages: 4,
            fail_full_pass: true,
            fail_from: Some(3),
            ..Default::default()
        },
        text: FakeText(Ok(
            "p1 text\u{000C}p2 text\u{000C}Page three from the text layer\u{000C}Page four from the text layer".into(),
        )),
        ..Setup::text_only("")
    }
    .build();

    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();

    assert_eq!(result.method, ExtractionMethod::PartiallyRendered);
    assert_eq!(result.slide_count(), 4);
    assert!(result.has_images());
    assert!(result.pages[0].image_ref.is_some());
    assert!(result.pages[1].image_ref.is_some());
    assert_eq!(result.pages[0].text, "Slide 1: recognised text about the roadmap");
    assert_eq!(result.pages[2].image_ref, None);
    assert_eq!(result.pages[2].text, "Page three from the text layer");
    assert_eq!(result.pages[3].text, "Page four from the text layer");
    assert!(result.partial);
    assert_eq!(
        result.issues,
        vec![
            SlideIssue::NotRendered { page: 3 },
            SlideIssue::NotRendered { page: 4 },
        ]
    );

    // Full pass at 150 DPI, then page by page at 72 DPI up to the first failure.
    assert_eq!(
        *h.renderer.calls.lock().unwrap(),
        vec![
            (vec![1, 2, 3, 4], 150),
            (vec![1], 72),
            (vec![2], 72),
            (vec![3], 72),
        ]
    );
}

#[tokio::test]
async fn low_resolution_retry_with_zero_pages_falls_back_to_text() {
    let h = Setup {
        renderer: FakeRenderer {
            pages: 2,
            fail_full_pass: true,
            fail_from: Some(1),
            ..Default::default()
        },
        text: FakeText(Ok("Opening slide for the team\u{000C}Closing slide for the team".into())),
        ..Setup::text_only("")
    }
    .build();

    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();
    assert_eq!(result.method, ExtractionMethod::DirectText);
    assert!(!result.has_images());
    assert_eq!(result.slide_count(), 2);
}

#[tokio::test]
async fn recognition_failure_is_a_slide_issue() {
    let h = Setup {
        recognizer: FakeRecognizer { fail_on: Some(2) },
        ..Setup::rendered(2)
    }
    .build();

    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();
    assert!(result.partial);
    assert_eq!(result.pages[1].text, "");
    assert!(result.pages[1].image_ref.is_some());
    assert!(matches!(
        result.issues[..],
        [SlideIssue::RecognitionFailed { page: 2, .. }]
    ));
    // Slide 2 has no text, so only slide 1 reaches the provider.
    assert_eq!(h.provider.calls(), 2);
}

#[tokio::test]
async fn upload_failure_drops_the_image_reference() {
    let h = Setup {
        blobs: Arc::new(FailingBlobStore),
        ..Setup::rendered(1)
    }
    .build();

    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();
    assert!(!result.has_images());
    assert!(result.partial);
    assert!(matches!(result.issues[..], [SlideIssue::UploadFailed { page: 1, .. }]));
    assert!(result.question(1).is_some());
}

#[tokio::test]
async fn rate_limit_on_first_call_recovers_with_two_calls() {
    let provider = ScriptedProvider::new(|n, req| {
        if n == 1 {
            Err(ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            })
        } else {
            Ok(presenter_reply(req))
        }
    });
    let h = Setup {
        provider,
        ..Setup::text_only("Roadmap overview for the third quarter")
    }
    .build();

    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();

    assert_eq!(result.question(1), Some("What drives the roadmap?"));
    assert!(!result.partial);
    // Question took two attempts, speech one.
    assert_eq!(h.provider.calls(), 3);
    // 2 s hint + 1 s margin, the rest of the 4 s slot, then the speech slot.
    assert_eq!(
        h.clock.sleeps(),
        vec![
            Duration::from_secs(3),
            Duration::from_secs(1),
            Duration::from_secs(4),
        ]
    );
}

#[tokio::test]
async fn persistent_rate_limit_leaves_artifacts_empty() {
    let provider = ScriptedProvider::new(|_, _| Err(ProviderError::RateLimited { retry_after: None }));
    let h = Setup {
        provider,
        ..Setup::text_only("Roadmap overview for the third quarter")
    }
    .build();

    let result = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();
    assert_eq!(result.question(1), None);
    assert_eq!(result.speech(1), None);
    assert!(result.partial);
    assert_eq!(result.issues.len(), 2);
    // Three attempts each for question and speech.
    assert_eq!(h.provider.calls(), 6);
}

#[tokio::test]
async fn states_progress_to_complete() {
    let h = Setup::rendered(1).build();
    h.pipeline.process_document(&deck(), "AB12CD").await.unwrap();
    assert_eq!(
        *h.recorder.states.lock().unwrap(),
        vec![
            PipelineState::Received,
            PipelineState::Extracting,
            PipelineState::Generating,
            PipelineState::Uploading,
            PipelineState::Complete,
        ]
    );
}

#[tokio::test]
async fn unreadable_documents_fail_before_generating() {
    let h = Setup::text_only("unused").build();

    let empty = Document::new("empty.pdf", Vec::new());
    let err = h.pipeline.process_document(&empty, "AB12CD").await.unwrap_err();
    assert!(err.to_string().starts_with("Could not read document"));
    assert!(matches!(
        err,
        DeckCoachError::Extraction(ExtractionError::EmptyDocument { .. })
    ));

    let png = Document::new("slide.png", b"\x89PNG\r\n".to_vec());
    let err = h.pipeline.process_document(&png, "AB12CD").await.unwrap_err();
    assert!(matches!(
        err,
        DeckCoachError::Extraction(ExtractionError::NotAPdf { .. })
    ));

    assert_eq!(
        *h.recorder.states.lock().unwrap(),
        vec![
            PipelineState::Received,
            PipelineState::Extracting,
            PipelineState::Failed,
            PipelineState::Received,
            PipelineState::Extracting,
            PipelineState::Failed,
        ]
    );
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn no_render_and_no_text_is_unreadable() {
    let h = Setup {
        text: FakeText(Err("no text layer".into())),
        ..Setup::text_only("")
    }
    .build();
    let err = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap_err();
    assert!(matches!(
        err,
        DeckCoachError::Extraction(ExtractionError::Unreadable { .. })
    ));
}

// ── GenerateReport ───────────────────────────────────────────────────────────

fn pairs(n: usize) -> Vec<QaPair> {
    (1..=n)
        .map(|i| QaPair::new(format!("Question {i}?"), format!("Answer {i}")))
        .collect()
}

fn single_reply(similarity: u8) -> String {
    format!(
        r#"{{"referenceAnswer": "Reference", "similarity": {similarity}, "missingPoints": ""}}"#
    )
}

#[tokio::test]
async fn empty_pairs_make_an_empty_report_without_calls() {
    let h = Setup::text_only("").build();
    let report = h.pipeline.generate_report("AB12CD", "Deck", &[]).await;
    assert!(report.evaluations.is_empty());
    assert_eq!(report.summary.total_questions, 0);
    assert_eq!(report.summary.pass_rate, 0);
    assert_eq!(report.summary.average_score, 0);
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn fenced_batch_reply_is_used_directly() {
    let provider = ScriptedProvider::new(|_, _| {
        Ok("Here you go:\n```json\n[\n\
            {\"index\": 1, \"referenceAnswer\": \"R1\", \"similarity\": 90, \"missingPoints\": \"\"},\n\
            {\"index\": 2, \"referenceAnswer\": \"R2\", \"similarity\": 70, \"missingPoints\": \"detail\"},\n\
            {\"index\": 3, \"referenceAnswer\": \"R3\", \"similarity\": 40, \"missingPoints\": \"most of it\"}\n\
            ]\n```"
            .into())
    });
    let h = Setup {
        provider,
        ..Setup::text_only("")
    }
    .build();

    let report = h.pipeline.generate_report("AB12CD", "Deck", &pairs(3)).await;

    assert_eq!(report.evaluations.len(), 3);
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(report.evaluations[1].reference_answer, "R2");
    assert_eq!(report.evaluations[1].question, "Question 2?");
    assert_eq!(report.summary.total_questions, 3);
    assert_eq!(report.summary.passed_questions, 2);
    assert_eq!(report.summary.pass_rate, 67);
    assert_eq!(report.summary.average_score, 67);
    assert_eq!(*h.recorder.modes.lock().unwrap(), vec![EvaluationMode::Batch]);
}

#[tokio::test]
async fn bare_object_for_single_pair_gives_one_evaluation() {
    let provider = ScriptedProvider::new(|_, _| Ok(single_reply(85)));
    let h = Setup {
        provider,
        ..Setup::text_only("")
    }
    .build();

    let report = h.pipeline.generate_report("AB12CD", "Deck", &pairs(1)).await;
    assert_eq!(report.evaluations.len(), 1);
    assert_eq!(report.evaluations[0].similarity, 85);
    assert_eq!(h.provider.calls(), 1);
}

#[tokio::test]
async fn malformed_batch_reply_falls_back_to_per_pair_calls() {
    let provider = ScriptedProvider::new(|_, req| {
        if is_batch(req) {
            Ok("[{\"index\": 1, \"similarity\": 80".into())
        } else {
            Ok(single_reply(60))
        }
    });
    let h = Setup {
        provider,
        ..Setup::text_only("")
    }
    .build();

    let report = h.pipeline.generate_report("AB12CD", "Deck", &pairs(3)).await;

    assert_eq!(report.evaluations.len(), 3);
    assert_eq!(h.provider.calls(), 4);
    assert!(report.evaluations.iter().all(|e| e.similarity == 60));
    assert_eq!(report.evaluations[2].user_answer, "Answer 3");
    assert_eq!(*h.recorder.modes.lock().unwrap(), vec![EvaluationMode::PerItem]);
}

#[tokio::test]
async fn blank_batch_replies_fall_back_to_one_call_per_pair() {
    for blank in ["", " \n\t "] {
        let provider = ScriptedProvider::new(move |_, req| {
            if is_batch(req) {
                Ok(blank.to_string())
            } else {
                Ok(single_reply(75))
            }
        });
        let h = Setup {
            provider,
            ..Setup::text_only("")
        }
        .build();

        let report = h.pipeline.generate_report("AB12CD", "Deck", &pairs(3)).await;

        assert_eq!(report.evaluations.len(), 3, "reply {blank:?}");
        assert_eq!(h.provider.calls(), 4);
        for (e, p) in report.evaluations.iter().zip(pairs(3)) {
            assert_eq!(e.question, p.question);
            assert_eq!(e.similarity, 75);
        }
        assert_eq!(report.summary.passed_questions, 3);
        assert_eq!(*h.recorder.modes.lock().unwrap(), vec![EvaluationMode::PerItem]);
    }
}

#[tokio::test]
async fn stray_and_repeated_batch_indexes_score_only_their_own_pair() {
    let provider = ScriptedProvider::new(|_, _| {
        Ok("[\n\
            {\"index\": 7, \"referenceAnswer\": \"R7\", \"similarity\": 90, \"missingPoints\": \"\"},\n\
            {\"index\": 1, \"referenceAnswer\": \"R1\", \"similarity\": 10, \"missingPoints\": \"all\"},\n\
            {\"index\": 1, \"referenceAnswer\": \"R1b\", \"similarity\": 99, \"missingPoints\": \"\"}\n\
            ]"
            .into())
    });
    let h = Setup {
        provider,
        ..Setup::text_only("")
    }
    .build();

    let report = h.pipeline.generate_report("AB12CD", "Deck", &pairs(3)).await;

    assert_eq!(report.evaluations.len(), 3);
    assert_eq!(h.provider.calls(), 1);
    assert_eq!(report.evaluations[0].reference_answer, "R1");
    assert_eq!(report.evaluations[0].similarity, 10);
    for e in &report.evaluations[1..] {
        assert_eq!(e.reference_answer, UNAVAILABLE_REFERENCE);
        assert_eq!(e.similarity, 0);
    }
    assert_eq!(report.summary.passed_questions, 0);
    assert_eq!(*h.recorder.modes.lock().unwrap(), vec![EvaluationMode::Batch]);
}

#[tokio::test]
async fn unparseable_everything_still_yields_one_default_per_pair() {
    let provider = ScriptedProvider::new(|_, _| Ok("I am unable to grade these.".into()));
    let h = Setup {
        provider,
        ..Setup::text_only("")
    }
    .build();

    let report = h.pipeline.generate_report("AB12CD", "Deck", &pairs(2)).await;
    assert_eq!(report.evaluations.len(), 2);
    for e in &report.evaluations {
        assert_eq!(e.similarity, 0);
        assert_eq!(e.reference_answer, UNAVAILABLE_REFERENCE);
    }
    assert_eq!(report.summary.passed_questions, 0);
}

#[tokio::test]
async fn exhausted_rate_limit_marks_evaluations() {
    let provider = ScriptedProvider::new(|_, _| Err(ProviderError::RateLimited { retry_after: None }));
    let h = Setup {
        provider,
        ..Setup::text_only("")
    }
    .build();

    let report = h.pipeline.generate_report("AB12CD", "Deck", &pairs(2)).await;
    assert_eq!(report.evaluations.len(), 2);
    assert!(report
        .evaluations
        .iter()
        .all(|e| e.reference_answer == RATE_LIMITED_REFERENCE && e.similarity == 0));
    // Three batch attempts, then three attempts per pair.
    assert_eq!(h.provider.calls(), 9);
}

// ── Persistence ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn process_save_report_and_reload() {
    let provider = ScriptedProvider::new(|_, req| {
        if req.prompt.contains("JSON") {
            Ok(r#"[{"index": 1, "referenceAnswer": "R", "similarity": 75, "missingPoints": ""}]"#.into())
        } else {
            Ok(presenter_reply(req))
        }
    });
    let h = Setup {
        provider,
        ..Setup::rendered(2)
    }
    .build();

    let result = h.pipeline.process_and_save(&deck()).await.unwrap();
    assert_eq!(result.code.len(), 6);

    let record = h.pipeline.load_presentation(&result.code).await.unwrap();
    assert_eq!(record.slide_count, 2);
    assert!(record.has_images);
    assert!(record.slide_images[&1].starts_with("memory://"));

    let report = h
        .pipeline
        .generate_and_save_report(&result.code, &[QaPair::new("What drives the roadmap?", "Customers")])
        .await
        .unwrap();
    assert_eq!(report.title, "q3-roadmap");
    assert_eq!(report.summary.passed_questions, 1);
    assert_eq!(h.pipeline.load_report(&result.code).await.unwrap(), report);
}

#[tokio::test]
async fn report_for_unknown_code_is_unknown_code() {
    let h = Setup::text_only("").build();
    let err = h
        .pipeline
        .generate_and_save_report("NOPE99", &pairs(1))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DeckCoachError::UnknownCode { what: "presentation", ref code } if code == "NOPE99"
    ));
    assert!(err.to_string().starts_with("No presentation found"));
    assert_eq!(h.provider.calls(), 0);

    let err = h.pipeline.load_report("NOPE99").await.unwrap_err();
    assert!(matches!(err, DeckCoachError::UnknownCode { what: "report", .. }));
}

#[tokio::test]
async fn blank_text_layer_without_rendering_is_unreadable() {
    let h = Setup::text_only(" \u{000C} \n ").build();
    let err = h.pipeline.process_document(&deck(), "AB12CD").await.unwrap_err();
    assert!(matches!(
        err,
        DeckCoachError::Extraction(ExtractionError::Unreadable { .. })
    ));
}
