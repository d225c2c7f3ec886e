//! Text recognition for rendered slides.
//!
//! The default [`Recognizer`] is a vision model: the slide PNG goes out as a
//! base64 image part and the transcription comes back as plain text, cleaned
//! with the same rules as every other model reply. Calls share the
//! pipeline's [`RateLimitedCaller`], so OCR counts against the same
//! requests-per-minute budget as generation.

use crate::error::RecognitionError;
use crate::pipeline::encode::png_image_data;
use crate::pipeline::llm::classify_error;
use crate::pipeline::payload::clean_text;
use crate::pipeline::schedule::RateLimitedCaller;
use crate::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use tracing::debug;

/// OCR of one page image.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, png: &[u8]) -> Result<String, RecognitionError>;
}

/// [`Recognizer`] backed by a multimodal `edgequake_llm` provider.
pub struct VisionRecognizer {
    provider: Arc<dyn LLMProvider>,
    caller: Arc<RateLimitedCaller>,
    max_tokens: usize,
    temperature: f32,
}

impl VisionRecognizer {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        caller: Arc<RateLimitedCaller>,
        max_tokens: usize,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            caller,
            max_tokens,
            temperature,
        }
    }
}

#[async_trait]
impl Recognizer for VisionRecognizer {
    async fn recognize(&self, png: &[u8]) -> Result<String, RecognitionError> {
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![png_image_data(png)]),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        let raw = self
            .caller
            .call("ocr", || {
                let (messages, options) = (&messages, &options);
                async move {
                    self.provider
                        .chat(messages, Some(options))
                        .await
                        .map(|r| r.content)
                        .map_err(|e| classify_error(&e.to_string()))
                }
            })
            .await
            .map_err(|e| RecognitionError(e.to_string()))?;

        let text = clean_text(&raw);
        debug!("OCR: {} bytes PNG → {} chars", png.len(), text.len());
        Ok(text)
    }
}
