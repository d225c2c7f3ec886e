//! Per-slide question and speech generation.

use crate::error::ProviderError;
use crate::pipeline::llm::{CompletionProvider, CompletionRequest};
use crate::pipeline::payload::clean_text;
use crate::pipeline::schedule::RateLimitedCaller;
use crate::prompts::{question_prompt, speech_prompt, PRESENTER_SYSTEM_PROMPT};
use std::sync::Arc;
use tracing::{debug, warn};

/// Generation limits, usually taken from [`crate::PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub question_max_tokens: usize,
    pub speech_max_tokens: usize,
}

/// Produces one audience question and one spoken script per slide.
pub struct ContentGenerator {
    provider: Arc<dyn CompletionProvider>,
    caller: Arc<RateLimitedCaller>,
    settings: GenerationSettings,
}

impl ContentGenerator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        caller: Arc<RateLimitedCaller>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            provider,
            caller,
            settings,
        }
    }

    /// One question for the slide. `Ok(None)` when the model answered with
    /// nothing usable.
    pub async fn try_question(
        &self,
        text: &str,
        page_index: usize,
    ) -> Result<Option<String>, ProviderError> {
        let request = CompletionRequest::new(
            question_prompt(text, page_index),
            self.settings.question_max_tokens,
            self.settings.temperature,
        )
        .with_system(PRESENTER_SYSTEM_PROMPT);
        self.complete("question", page_index, &request).await
    }

    pub async fn try_speech(
        &self,
        text: &str,
        page_index: usize,
    ) -> Result<Option<String>, ProviderError> {
        let request = CompletionRequest::new(
            speech_prompt(text, page_index),
            self.settings.speech_max_tokens,
            self.settings.temperature,
        )
        .with_system(PRESENTER_SYSTEM_PROMPT);
        self.complete("speech", page_index, &request).await
    }

    /// [`try_question`](Self::try_question) with every failure mapped to `None`.
    pub async fn generate_question(&self, text: &str, page_index: usize) -> Option<String> {
        self.try_question(text, page_index)
            .await
            .unwrap_or_else(|e| {
                warn!("Slide {}: question generation failed: {}", page_index, e);
                None
            })
    }

    pub async fn generate_speech(&self, text: &str, page_index: usize) -> Option<String> {
        self.try_speech(text, page_index)
            .await
            .unwrap_or_else(|e| {
                warn!("Slide {}: speech generation failed: {}", page_index, e);
                None
            })
    }

    async fn complete(
        &self,
        artifact: &str,
        page_index: usize,
        request: &CompletionRequest,
    ) -> Result<Option<String>, ProviderError> {
        let label = format!("slide {page_index} {artifact}");
        let raw = self
            .caller
            .call(&label, || self.provider.complete(request))
            .await?;

        let cleaned = clean_text(&raw);
        if cleaned.is_empty() {
            debug!("{}: empty reply", label);
            Ok(None)
        } else {
            Ok(Some(cleaned))
        }
    }
}
