//! Language-model provider seam.
//!
//! The pipeline talks to models through [`CompletionProvider`], a one-method
//! trait that tests can fake with a scripted reply list. The production
//! implementation, [`EdgequakeProvider`], adapts any `edgequake_llm`
//! provider and classifies its failures: rate limiting (HTTP 429, "rate
//! limit", "too many requests") becomes [`ProviderError::RateLimited`] with
//! the server's "retry after" hint when one is present; everything else is
//! [`ProviderError::Api`].

use crate::config::PipelineConfig;
use crate::error::{DeckCoachError, ProviderError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default model when the caller names a provider but no model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One text completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: usize, temperature: f32) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            max_tokens,
            temperature,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// Anything that can turn a prompt into text.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError>;
}

/// [`CompletionProvider`] backed by an `edgequake_llm` provider.
pub struct EdgequakeProvider {
    inner: Arc<dyn LLMProvider>,
}

impl EdgequakeProvider {
    pub fn new(inner: Arc<dyn LLMProvider>) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn LLMProvider> {
        &self.inner
    }
}

#[async_trait]
impl CompletionProvider for EdgequakeProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ProviderError> {
        let start = Instant::now();
        let mut messages = Vec::with_capacity(2);
        if let Some(ref system) = request.system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(&request.prompt));

        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        match self.inner.chat(&messages, Some(&options)).await {
            Ok(response) => {
                debug!(
                    "completion: {} input tokens, {} output tokens, {:?}",
                    response.prompt_tokens,
                    response.completion_tokens,
                    start.elapsed()
                );
                Ok(response.content)
            }
            Err(e) => Err(classify_error(&e.to_string())),
        }
    }
}

// ── Error classification ─────────────────────────────────────────────────

static RE_RATE_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests|resource[ _]exhausted").unwrap()
});

static RE_RETRY_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:retry[ _-]?after|try again in|retry in|retrydelay)\W{0,4}([0-9]+(?:\.[0-9]+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?",
    )
    .unwrap()
});

/// Map a provider error message onto [`ProviderError`].
pub fn classify_error(message: &str) -> ProviderError {
    if RE_RATE_LIMIT.is_match(message) {
        ProviderError::RateLimited {
            retry_after: parse_retry_hint(message),
        }
    } else {
        ProviderError::Api(message.to_string())
    }
}

/// Extract a "retry after N[s|ms]" style hint. Bare numbers are seconds.
pub fn parse_retry_hint(message: &str) -> Option<Duration> {
    let caps = RE_RETRY_HINT.captures(message)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_ascii_lowercase());
    let millis = match unit.as_deref() {
        Some(u) if u.starts_with("ms") || u.starts_with("milli") => value,
        _ => value * 1000.0,
    };
    if millis.is_finite() && millis >= 0.0 {
        Some(Duration::from_millis(millis.round() as u64))
    } else {
        None
    }
}

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, DeckCoachError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        DeckCoachError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. `config.provider`: pre-built by the caller
/// 2. `config.provider_name` + `config.model`
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` (both set)
/// 4. `OPENAI_API_KEY` present → OpenAI
/// 5. `ProviderFactory::from_env()` auto-detection
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, DeckCoachError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| DeckCoachError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_429_as_rate_limit() {
        let e = classify_error("HTTP 429 Too Many Requests");
        assert!(matches!(e, ProviderError::RateLimited { retry_after: None }));
    }

    #[test]
    fn classifies_openai_style_hint() {
        let e = classify_error(
            "Rate limit reached for gpt-4.1-nano. Please try again in 6.5s. Visit ...",
        );
        match e {
            ProviderError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_millis(6500)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_millisecond_hints() {
        assert_eq!(
            parse_retry_hint("rate_limit_exceeded: try again in 450ms"),
            Some(Duration::from_millis(450))
        );
    }

    #[test]
    fn bare_retry_after_is_seconds() {
        assert_eq!(
            parse_retry_hint("429; Retry-After: 30"),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn gemini_resource_exhausted_is_rate_limit() {
        let e = classify_error("RESOURCE_EXHAUSTED: quota exceeded, retryDelay: \"12s\"");
        assert!(matches!(
            e,
            ProviderError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(12)
        ));
    }

    #[test]
    fn other_errors_are_api_errors() {
        let e = classify_error("401 Unauthorized: invalid api key");
        assert!(matches!(e, ProviderError::Api(ref m) if m.contains("401")));
    }

    #[test]
    fn request_builder_sets_system() {
        let r = CompletionRequest::new("hi", 10, 0.5).with_system("sys");
        assert_eq!(r.system.as_deref(), Some("sys"));
        assert_eq!(r.max_tokens, 10);
    }
}
