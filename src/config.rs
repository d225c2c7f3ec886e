//! Configuration for the slide pipeline.
//!
//! Every tunable lives in [`PipelineConfig`], built through
//! [`PipelineConfigBuilder`]. Collaborators (renderer, stores, clock) are
//! passed to [`crate::process::Pipeline`] separately; this struct only holds
//! plain settings plus the optional pre-built provider and progress callback.

use crate::error::DeckCoachError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for processing decks and generating reports.
///
/// # Example
/// ```rust
/// use edgequake_deckcoach::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(150)
///     .inter_call_delay_ms(4000)
///     .model("gpt-4.1-nano")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// First-attempt rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// DPI of the single page-by-page retry after a render failure. Default: 72.
    pub fallback_dpi: u32,

    /// Cap on the longest rendered edge in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier. If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Temperature for question and speech generation. Default: 0.7.
    pub generation_temperature: f32,

    /// Temperature for OCR and answer evaluation. Default: 0.1.
    pub evaluation_temperature: f32,

    /// Max tokens for one generated question. Default: 150.
    pub question_max_tokens: usize,

    /// Max tokens for one speech script. Default: 500.
    pub speech_max_tokens: usize,

    /// Max tokens for one OCR transcription. Default: 2048.
    pub ocr_max_tokens: usize,

    /// Max tokens for a single-pair evaluation; the batch call scales this
    /// by the number of pairs. Default: 400.
    pub evaluation_max_tokens: usize,

    /// Minimum spacing between consecutive provider calls. Default: 4000 ms
    /// (15 requests per minute).
    pub inter_call_delay_ms: u64,

    /// Wait applied on a rate-limit response that carries no hint. Default: 20 000 ms.
    pub rate_limit_wait_ms: u64,

    /// Added on top of a provider-suggested wait. Default: 1000 ms.
    pub rate_limit_margin_ms: u64,

    /// Retries after the first rate-limited attempt. Default: 2.
    pub rate_limit_retries: u32,

    /// Slides whose trimmed text has at most this many characters are not
    /// sent to the model. Default: 10.
    pub min_slide_chars: usize,

    /// Similarity at or above which an answer passes. Default: 70.
    pub pass_threshold: u8,

    /// Lifetime of signed image URLs. Default: 3600 s.
    pub signed_url_ttl_secs: u64,

    /// PDF user password for encrypted decks.
    pub password: Option<String>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-stage progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            fallback_dpi: 72,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            generation_temperature: 0.7,
            evaluation_temperature: 0.1,
            question_max_tokens: 150,
            speech_max_tokens: 500,
            ocr_max_tokens: 2048,
            evaluation_max_tokens: 400,
            inter_call_delay_ms: 4000,
            rate_limit_wait_ms: 20_000,
            rate_limit_margin_ms: 1000,
            rate_limit_retries: 2,
            min_slide_chars: 10,
            pass_threshold: 70,
            signed_url_ttl_secs: 3600,
            password: None,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("fallback_dpi", &self.fallback_dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("generation_temperature", &self.generation_temperature)
            .field("evaluation_temperature", &self.evaluation_temperature)
            .field("inter_call_delay_ms", &self.inter_call_delay_ms)
            .field("rate_limit_wait_ms", &self.rate_limit_wait_ms)
            .field("rate_limit_margin_ms", &self.rate_limit_margin_ms)
            .field("rate_limit_retries", &self.rate_limit_retries)
            .field("min_slide_chars", &self.min_slide_chars)
            .field("pass_threshold", &self.pass_threshold)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    pub fn rate_limit_margin(&self) -> Duration {
        Duration::from_millis(self.rate_limit_margin_ms)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn fallback_dpi(mut self, dpi: u32) -> Self {
        self.config.fallback_dpi = dpi.clamp(36, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn generation_temperature(mut self, t: f32) -> Self {
        self.config.generation_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn evaluation_temperature(mut self, t: f32) -> Self {
        self.config.evaluation_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn question_max_tokens(mut self, n: usize) -> Self {
        self.config.question_max_tokens = n;
        self
    }

    pub fn speech_max_tokens(mut self, n: usize) -> Self {
        self.config.speech_max_tokens = n;
        self
    }

    pub fn ocr_max_tokens(mut self, n: usize) -> Self {
        self.config.ocr_max_tokens = n;
        self
    }

    pub fn evaluation_max_tokens(mut self, n: usize) -> Self {
        self.config.evaluation_max_tokens = n;
        self
    }

    pub fn inter_call_delay_ms(mut self, ms: u64) -> Self {
        self.config.inter_call_delay_ms = ms;
        self
    }

    pub fn rate_limit_wait_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_wait_ms = ms;
        self
    }

    pub fn rate_limit_margin_ms(mut self, ms: u64) -> Self {
        self.config.rate_limit_margin_ms = ms;
        self
    }

    pub fn rate_limit_retries(mut self, n: u32) -> Self {
        self.config.rate_limit_retries = n;
        self
    }

    pub fn min_slide_chars(mut self, n: usize) -> Self {
        self.config.min_slide_chars = n;
        self
    }

    pub fn pass_threshold(mut self, score: u8) -> Self {
        self.config.pass_threshold = score;
        self
    }

    pub fn signed_url_ttl_secs(mut self, secs: u64) -> Self {
        self.config.signed_url_ttl_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DeckCoachError> {
        let c = &self.config;
        if c.fallback_dpi > c.dpi {
            return Err(DeckCoachError::InvalidConfig(format!(
                "fallback DPI ({}) must not exceed render DPI ({})",
                c.fallback_dpi, c.dpi
            )));
        }
        if c.pass_threshold > 100 {
            return Err(DeckCoachError::InvalidConfig(format!(
                "pass threshold must be 0–100, got {}",
                c.pass_threshold
            )));
        }
        if c.question_max_tokens == 0 || c.speech_max_tokens == 0 || c.evaluation_max_tokens == 0 {
            return Err(DeckCoachError::InvalidConfig(
                "max token limits must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = PipelineConfig::default();
        assert_eq!(c.dpi, 150);
        assert_eq!(c.fallback_dpi, 72);
        assert_eq!(c.rate_limit_retries, 2);
        assert_eq!(c.min_slide_chars, 10);
        assert_eq!(c.pass_threshold, 70);
        assert_eq!(c.inter_call_delay(), Duration::from_secs(4));
    }

    #[test]
    fn builder_clamps_dpi() {
        let c = PipelineConfig::builder().dpi(1000).build().unwrap();
        assert_eq!(c.dpi, 400);
    }

    #[test]
    fn fallback_dpi_above_dpi_is_rejected() {
        let err = PipelineConfig::builder()
            .dpi(100)
            .fallback_dpi(200)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("fallback DPI"));
    }

    #[test]
    fn pass_threshold_over_100_is_rejected() {
        assert!(PipelineConfig::builder().pass_threshold(101).build().is_err());
    }
}
