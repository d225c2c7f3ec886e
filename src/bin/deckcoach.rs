//! CLI binary for edgequake-deckcoach.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! wires the file-backed stores and prints records and reports.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_deckcoach::storage::signed_presentation;
use edgequake_deckcoach::{
    load_document, EvaluationMode, FsBlobStore, JsonRecordStore, Pipeline, PipelineConfig,
    PipelineProgressCallback, PipelineState, PresentationRecord, ProcessingResult,
    ProgressCallback, QaPair, RecordStore, Report,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while extracting, then a per-slide bar while generating.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} slides  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Generating");
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_state_change(&self, state: PipelineState) {
        match state {
            PipelineState::Received => self.bar.set_message("Reading deck…"),
            PipelineState::Extracting => {
                self.bar.set_prefix("Extracting");
                self.bar.set_message("Rendering slides…");
            }
            PipelineState::Generating => {}
            PipelineState::Uploading => {
                self.bar.set_prefix("Uploading");
                self.bar.set_message("Storing slide images…");
            }
            PipelineState::Complete => {
                self.bar.finish_and_clear();
                let errors = self.errors.load(Ordering::SeqCst);
                let skipped = self.skipped.load(Ordering::SeqCst);
                eprintln!(
                    "{} done  {}",
                    if errors == 0 { green("✔") } else { cyan("⚠") },
                    dim(&format!("{errors} issues, {skipped} slides skipped")),
                );
            }
            PipelineState::Failed => {
                self.bar.finish_and_clear();
                eprintln!("{} failed", red("✘"));
            }
        }
    }

    fn on_slide_start(&self, page: usize, total: usize) {
        if self.bar.length() != Some(total as u64) {
            self.activate_bar(total);
        }
        self.bar.set_message(format!("slide {page}"));
    }

    fn on_slide_complete(&self, page: usize, total: usize) {
        self.bar.println(format!("  {} Slide {:>3}/{:<3}", green("✓"), page, total));
        self.bar.inc(1);
    }

    fn on_slide_skipped(&self, page: usize, total: usize) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Slide {:>3}/{:<3}  {}",
            dim("·"),
            page,
            total,
            dim("too little text, skipped")
        ));
        self.bar.inc(1);
    }

    fn on_slide_error(&self, page: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} Slide {:>3}/{:<3}  {}", red("✗"), page, total, red(&msg)));
    }

    fn on_evaluation(&self, mode: EvaluationMode, pairs: usize) {
        let how = match mode {
            EvaluationMode::Batch => "one batch call",
            EvaluationMode::PerItem => "one call per answer",
        };
        eprintln!("{} scored {} answers with {}", cyan("◆"), pairs, how);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process a deck: extract slides, generate questions and speeches
  deckcoach process talk.pdf

  # From a URL, JSON record on stdout
  deckcoach --json process https://example.com/q3-review.pdf

  # Score answers for a processed deck
  deckcoach report K7M2QX --answers answers.json

  # Show a stored record with signed image URLs
  deckcoach show K7M2QX

ANSWERS FILE:
  [{"question": "Why did churn drop?", "userAnswer": "Better onboarding"}]

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  DECKCOACH_DATA_DIR      Where records and slide images are stored
"#;

/// Turn slide decks into questions and speaker scripts, then score answers.
#[derive(Parser, Debug)]
#[command(
    name = "deckcoach",
    version,
    about = "Turn slide decks into questions and speaker scripts, then score answers",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding records and slide images.
    #[arg(long, global = true, env = "DECKCOACH_DATA_DIR", default_value = "deckcoach-data")]
    data_dir: PathBuf,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Minimum spacing between provider calls in milliseconds.
    #[arg(long, global = true, env = "DECKCOACH_CALL_DELAY_MS", default_value_t = 4000)]
    call_delay_ms: u64,

    /// Print JSON instead of a human-readable summary.
    #[arg(long, global = true, env = "DECKCOACH_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DECKCOACH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DECKCOACH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DECKCOACH_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract slides, generate a question and a speech per slide, store the record.
    Process {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,

        /// Rendering DPI (72–400).
        #[arg(long, env = "DECKCOACH_DPI", default_value_t = 150,
              value_parser = clap::value_parser!(u32).range(72..=400))]
        dpi: u32,

        /// PDF user password for encrypted decks.
        #[arg(long, env = "DECKCOACH_PASSWORD")]
        password: Option<String>,

        /// HTTP download timeout in seconds.
        #[arg(long, env = "DECKCOACH_DOWNLOAD_TIMEOUT", default_value_t = 120)]
        download_timeout: u64,
    },

    /// Score answers for a processed deck and store the report.
    Report {
        /// Presentation code printed by `process`.
        code: String,

        /// JSON file with `[{"question": …, "userAnswer": …}]`.
        #[arg(long, short)]
        answers: PathBuf,

        /// Similarity needed to pass (0–100).
        #[arg(long, default_value_t = 70, value_parser = clap::value_parser!(u8).range(0..=100))]
        pass_threshold: u8,
    },

    /// Print a stored presentation record (and its report, if any).
    Show {
        /// Presentation code.
        code: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let blobs = Arc::new(FsBlobStore::new(cli.data_dir.join("blobs")));
    let records = Arc::new(JsonRecordStore::new(&cli.data_dir));

    match &cli.command {
        Command::Process {
            input,
            dpi,
            password,
            download_timeout,
        } => {
            let progress: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as ProgressCallback)
            } else {
                None
            };

            let mut builder = base_config(&cli)
                .dpi(*dpi)
                .download_timeout_secs(*download_timeout);
            if let Some(pwd) = password {
                builder = builder.password(pwd.clone());
            }
            if let Some(cb) = progress {
                builder = builder.progress_callback(cb);
            }
            let config = builder.build().context("Invalid configuration")?;

            let document = load_document(input, *download_timeout)
                .await
                .with_context(|| format!("Failed to load '{input}'"))?;
            let pipeline = Pipeline::from_config(config, blobs, records)?;
            let result = pipeline
                .process_and_save(&document)
                .await
                .context("Processing failed")?;

            if cli.json {
                print_json(&result.to_record())?;
            } else if !cli.quiet {
                print_result(&result);
            }
        }

        Command::Report {
            code,
            answers,
            pass_threshold,
        } => {
            let pairs = read_answers(answers).await?;
            let mut builder = base_config(&cli).pass_threshold(*pass_threshold);
            if show_progress {
                builder = builder.progress_callback(CliProgressCallback::new() as ProgressCallback);
            }
            let config = builder.build().context("Invalid configuration")?;

            let pipeline = Pipeline::from_config(config, blobs, records)?;
            let report = pipeline
                .generate_and_save_report(code, &pairs)
                .await
                .context("Report failed")?;

            if cli.json {
                print_json(&report)?;
            } else if !cli.quiet {
                print_report(&report, *pass_threshold);
            }
        }

        Command::Show { code } => {
            let defaults = PipelineConfig::default();
            let ttl = Duration::from_secs(defaults.signed_url_ttl_secs);
            let record = signed_presentation(records.as_ref(), blobs.as_ref(), code, ttl)
                .await
                .with_context(|| format!("No presentation '{code}'"))?;
            let report = records.load_report(code).await.ok();

            if cli.json {
                print_json(&serde_json::json!({ "presentation": record, "report": report }))?;
            } else {
                print_record(&record);
                if let Some(ref r) = report {
                    println!();
                    print_report(r, defaults.pass_threshold);
                }
            }
        }
    }

    Ok(())
}

fn base_config(cli: &Cli) -> edgequake_deckcoach::PipelineConfigBuilder {
    let mut builder = PipelineConfig::builder().inter_call_delay_ms(cli.call_delay_ms);
    if let Some(ref m) = cli.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p.clone());
    }
    builder
}

async fn read_answers(path: &Path) -> Result<Vec<QaPair>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read answers from {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("{:?} is not a JSON list of answers", path))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialise output")?
    );
    Ok(())
}

fn print_result(result: &ProcessingResult) {
    println!(
        "{}  {}  {} slides  {}",
        bold(&result.code),
        result.title,
        result.slide_count(),
        dim(&format!(
            "{:?}{}",
            result.method,
            if result.has_images() { ", images" } else { "" }
        )),
    );
    for page in &result.pages {
        println!("\n{}", cyan(&format!("── Slide {} ──", page.index)));
        if let Some(q) = result.question(page.index) {
            println!("  {} {}", bold("Q:"), q);
        }
        if let Some(s) = result.speech(page.index) {
            println!("  {} {}", bold("Speech:"), s);
        }
    }
    for issue in &result.issues {
        eprintln!("{} {}", cyan("⚠"), issue);
    }
}

fn print_record(record: &PresentationRecord) {
    println!(
        "{}  {}  {} slides",
        bold(&record.code),
        record.title,
        record.slide_count
    );
    for (page, text) in &record.slide_texts {
        println!("\n{}", cyan(&format!("── Slide {page} ──")));
        println!("{}", dim(text));
        if let Some(url) = record.slide_images.get(page) {
            println!("  {} {}", bold("Image:"), url);
        }
        for q in record.questions.get(page).into_iter().flatten() {
            println!("  {} {}", bold("Q:"), q);
        }
        if let Some(s) = record.speech_content.get(page) {
            println!("  {} {}", bold("Speech:"), s);
        }
    }
}

fn print_report(report: &Report, pass_threshold: u8) {
    let s = &report.summary;
    println!(
        "{}  {}  average {}  passed {}/{} ({}%)",
        bold(&report.code),
        report.title,
        s.average_score,
        s.passed_questions,
        s.total_questions,
        s.pass_rate
    );
    for (i, e) in report.evaluations.iter().enumerate() {
        let mark = if e.similarity >= pass_threshold { green("✓") } else { red("✗") };
        println!("\n{} {}. {}  {}", mark, i + 1, e.question, dim(&format!("{}/100", e.similarity)));
        println!("   {} {}", bold("Answer:"), e.user_answer);
        println!("   {} {}", bold("Reference:"), e.reference_answer);
        if !e.missing_points.is_empty() {
            println!("   {} {}", bold("Missing:"), e.missing_points);
        }
    }
}
