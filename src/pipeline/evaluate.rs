//! Answer evaluation: one combined call, per-pair calls as the fallback.
//!
//! The batch reply is parsed leniently. Models wrap arrays in fences, return
//! a bare object for a single pair, nest the array under `evaluations`, count
//! from 0 instead of 1, or quote the score. Results are mapped back to input
//! pairs by their `index` field first, then by position, and any pair still
//! unmatched gets a conservative default. Whatever happens, the output has
//! exactly one [`Evaluation`] per input pair, in input order.

use crate::error::{ParseError, ProviderError};
use crate::output::{Evaluation, QaPair};
use crate::pipeline::llm::{CompletionProvider, CompletionRequest};
use crate::pipeline::payload::extract_json;
use crate::pipeline::schedule::RateLimitedCaller;
use crate::progress::{EvaluationMode, ProgressCallback};
use crate::prompts::{batch_evaluation_prompt, single_evaluation_prompt, EVALUATOR_SYSTEM_PROMPT};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Placeholder reference when no score could be obtained.
pub const UNAVAILABLE_REFERENCE: &str = "Reference answer unavailable.";
/// Placeholder reference when the provider kept rate limiting.
pub const RATE_LIMITED_REFERENCE: &str = "[rate limited] Reference answer unavailable.";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationSettings {
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Error)]
enum BatchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Scores (question, answer) pairs against model-written reference answers.
pub struct BatchEvaluator {
    provider: Arc<dyn CompletionProvider>,
    caller: Arc<RateLimitedCaller>,
    settings: EvaluationSettings,
    progress: Option<ProgressCallback>,
}

impl BatchEvaluator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        caller: Arc<RateLimitedCaller>,
        settings: EvaluationSettings,
    ) -> Self {
        Self {
            provider,
            caller,
            settings,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// One evaluation per pair, in order. Never fails.
    pub async fn evaluate(&self, pairs: &[QaPair]) -> Vec<Evaluation> {
        if pairs.is_empty() {
            return Vec::new();
        }

        let (evaluations, mode) = match self.evaluate_batch(pairs).await {
            Ok(evaluations) => (evaluations, EvaluationMode::Batch),
            Err(e) => {
                warn!(
                    "Batch evaluation of {} pairs failed ({}); scoring one by one",
                    pairs.len(),
                    e
                );
                (self.evaluate_each(pairs).await, EvaluationMode::PerItem)
            }
        };

        info!("Evaluated {} answers ({:?})", evaluations.len(), mode);
        if let Some(ref cb) = self.progress {
            cb.on_evaluation(mode, pairs.len());
        }
        evaluations
    }

    async fn evaluate_batch(&self, pairs: &[QaPair]) -> Result<Vec<Evaluation>, BatchError> {
        let request = CompletionRequest::new(
            batch_evaluation_prompt(pairs),
            self.settings.max_tokens.saturating_mul(pairs.len()),
            self.settings.temperature,
        )
        .with_system(EVALUATOR_SYSTEM_PROMPT);
        let request = &request;

        let raw = self
            .caller
            .call("batch evaluation", || self.provider.complete(request))
            .await?;

        let items = result_items(extract_json(&raw)?)?;
        align(pairs, items).ok_or(BatchError::Parse(ParseError::NoPayload))
    }

    async fn evaluate_each(&self, pairs: &[QaPair]) -> Vec<Evaluation> {
        let mut out = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            let request = CompletionRequest::new(
                single_evaluation_prompt(pair),
                self.settings.max_tokens,
                self.settings.temperature,
            )
            .with_system(EVALUATOR_SYSTEM_PROMPT);
            let label = format!("evaluation {}/{}", i + 1, pairs.len());

            let result = self
                .caller
                .call_or_rate_limited(
                    &label,
                    || {
                        let request = &request;
                        async move {
                            let raw = self.provider.complete(request).await?;
                            Ok(parse_single(pair, &raw))
                        }
                    },
                    || rate_limited_default(pair),
                )
                .await;

            out.push(result.unwrap_or_else(|e| {
                warn!("{}: {}", label, e);
                default_evaluation(pair)
            }));
        }
        out
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, PartialEq)]
struct ParsedItem {
    index: Option<usize>,
    reference: Option<String>,
    similarity: Option<u8>,
    missing: Option<String>,
}

/// Accepts an array, an object wrapping an array, or a single bare object.
fn result_items(value: Value) -> Result<Vec<ParsedItem>, ParseError> {
    let raw_items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => {
            let wrapped = ["evaluations", "results", "items", "data"]
                .iter()
                .find_map(|k| match obj.remove(*k) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                });
            match wrapped {
                Some(items) => items,
                None => vec![Value::Object(obj)],
            }
        }
        other => {
            return Err(ParseError::Malformed(format!(
                "expected array or object, got {}",
                type_name(&other)
            )))
        }
    };

    Ok(raw_items
        .iter()
        .filter_map(Value::as_object)
        .map(parse_item)
        .collect())
}

fn parse_item(obj: &Map<String, Value>) -> ParsedItem {
    ParsedItem {
        index: field(obj, &["index", "id", "pair", "number"]).and_then(as_index),
        reference: field(
            obj,
            &["referenceAnswer", "reference_answer", "reference", "modelAnswer", "answer"],
        )
        .and_then(as_text),
        similarity: field(obj, &["similarity", "score", "similarityScore", "similarity_score"])
            .and_then(as_score),
        missing: field(obj, &["missingPoints", "missing_points", "missing", "feedback"])
            .and_then(as_text),
    }
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| obj.get(*n)).filter(|v| !v.is_null())
}

fn as_index(v: &Value) -> Option<usize> {
    match v {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().trim_matches(['[', ']']).parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|i| i.as_str().map(str::trim))
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers and numeric strings (`"85"`, `"85%"`, `"85/100"`), clamped to 0–100.
fn as_score(v: &Value) -> Option<u8> {
    let f = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
                .unwrap_or(s.len());
            s[..end].parse::<f64>().ok()?
        }
        _ => return None,
    };
    if !f.is_finite() {
        return None;
    }
    Some(f.round().clamp(0.0, 100.0) as u8)
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Map items back to pairs: by `index`, then index-less items in reply
/// order, then default.
///
/// An item whose index names another pair, repeats a taken index, or falls
/// outside `1..=n` is dropped rather than reused for a different pair.
/// `None` when not a single item could be matched to a pair.
fn align(pairs: &[QaPair], items: Vec<ParsedItem>) -> Option<Vec<Evaluation>> {
    let n = pairs.len();
    let indexes: Vec<usize> = items.iter().filter_map(|i| i.index).collect();
    // Zero-based numbering: a 0 is present and nothing reaches n.
    let shift = usize::from(indexes.contains(&0) && indexes.iter().all(|&i| i < n));

    let mut used = vec![false; items.len()];
    let mut assigned: Vec<Option<usize>> = vec![None; n];

    for (slot, target) in assigned.iter_mut().enumerate() {
        let wanted = slot + 1;
        if let Some(pos) = items
            .iter()
            .enumerate()
            .position(|(j, item)| !used[j] && item.index.map(|i| i + shift) == Some(wanted))
        {
            used[pos] = true;
            *target = Some(pos);
        }
    }

    let mut unnumbered = items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.index.is_none())
        .map(|(j, _)| j);
    for target in assigned.iter_mut().filter(|a| a.is_none()) {
        match unnumbered.next() {
            Some(pos) => {
                used[pos] = true;
                *target = Some(pos);
            }
            None => break,
        }
    }

    let dropped = used.iter().filter(|u| !**u).count();
    if dropped > 0 {
        debug!("{} result item(s) matched no pair and were dropped", dropped);
    }

    if assigned.iter().all(Option::is_none) {
        return None;
    }

    let unmatched = assigned.iter().filter(|a| a.is_none()).count();
    if unmatched > 0 {
        debug!("{} of {} pairs had no matching result", unmatched, n);
    }

    Some(
        pairs
            .iter()
            .zip(assigned)
            .map(|(pair, a)| match a {
                Some(pos) => from_item(pair, &items[pos]),
                None => default_evaluation(pair),
            })
            .collect(),
    )
}

fn parse_single(pair: &QaPair, raw: &str) -> Evaluation {
    let item = extract_json(raw)
        .and_then(result_items)
        .ok()
        .and_then(|items| items.into_iter().next());
    match item {
        Some(item) => from_item(pair, &item),
        None => {
            debug!("Unparseable single evaluation reply: {:.80}", raw);
            default_evaluation(pair)
        }
    }
}

fn from_item(pair: &QaPair, item: &ParsedItem) -> Evaluation {
    Evaluation {
        question: pair.question.clone(),
        user_answer: pair.user_answer.clone(),
        reference_answer: item
            .reference
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| UNAVAILABLE_REFERENCE.to_string()),
        similarity: item.similarity.unwrap_or(0),
        missing_points: item.missing.clone().unwrap_or_default(),
    }
}

/// Conservative result for a pair that could not be scored.
pub fn default_evaluation(pair: &QaPair) -> Evaluation {
    Evaluation {
        question: pair.question.clone(),
        user_answer: pair.user_answer.clone(),
        reference_answer: UNAVAILABLE_REFERENCE.to_string(),
        similarity: 0,
        missing_points: "Evaluation unavailable.".to_string(),
    }
}

pub fn rate_limited_default(pair: &QaPair) -> Evaluation {
    Evaluation {
        reference_answer: RATE_LIMITED_REFERENCE.to_string(),
        missing_points: "Evaluation skipped: the model provider is rate limiting requests."
            .to_string(),
        ..default_evaluation(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(n: usize) -> Vec<QaPair> {
        (1..=n)
            .map(|i| QaPair::new(format!("Q{i}?"), format!("A{i}")))
            .collect()
    }

    #[test]
    fn array_is_aligned_by_index_even_when_shuffled() {
        let items = result_items(json!([
            {"index": 2, "referenceAnswer": "R2", "similarity": 40, "missingPoints": "m2"},
            {"index": 1, "referenceAnswer": "R1", "similarity": 90, "missingPoints": ""}
        ]))
        .unwrap();
        let out = align(&pairs(2), items).unwrap();
        assert_eq!(out[0].reference_answer, "R1");
        assert_eq!(out[0].similarity, 90);
        assert_eq!(out[1].reference_answer, "R2");
        assert_eq!(out[1].question, "Q2?");
    }

    #[test]
    fn zero_based_indexes_are_shifted() {
        let items = result_items(json!([
            {"index": 0, "referenceAnswer": "R1", "similarity": 10},
            {"index": 1, "referenceAnswer": "R2", "similarity": 20}
        ]))
        .unwrap();
        let out = align(&pairs(2), items).unwrap();
        assert_eq!(out[0].reference_answer, "R1");
        assert_eq!(out[1].reference_answer, "R2");
    }

    #[test]
    fn missing_indexes_fall_back_to_position_then_default() {
        let items = result_items(json!([
            {"referenceAnswer": "R1", "similarity": 70}
        ]))
        .unwrap();
        let out = align(&pairs(3), items).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].reference_answer, "R1");
        assert_eq!(out[1], default_evaluation(&pairs(3)[1]));
    }

    #[test]
    fn stray_and_repeated_indexes_never_score_another_pair() {
        let items = result_items(json!([
            {"index": 7, "referenceAnswer": "R7", "similarity": 90},
            {"index": 1, "referenceAnswer": "R1", "similarity": 10},
            {"index": 1, "referenceAnswer": "R1b", "similarity": 99}
        ]))
        .unwrap();
        let p = pairs(3);
        let out = align(&p, items).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].reference_answer, "R1");
        assert_eq!(out[0].similarity, 10);
        assert_eq!(out[1], default_evaluation(&p[1]));
        assert_eq!(out[2], default_evaluation(&p[2]));
    }

    #[test]
    fn unnumbered_items_fill_gaps_in_reply_order() {
        let items = result_items(json!([
            {"index": 2, "referenceAnswer": "R2", "similarity": 50},
            {"referenceAnswer": "first loose", "similarity": 60},
            {"referenceAnswer": "second loose", "similarity": 70}
        ]))
        .unwrap();
        let out = align(&pairs(3), items).unwrap();
        assert_eq!(out[0].reference_answer, "first loose");
        assert_eq!(out[1].reference_answer, "R2");
        assert_eq!(out[2].reference_answer, "second loose");
    }

    #[test]
    fn only_out_of_range_indexes_do_not_align() {
        let items = result_items(json!([
            {"index": 9, "referenceAnswer": "R9", "similarity": 80}
        ]))
        .unwrap();
        assert!(align(&pairs(2), items).is_none());
    }

    #[test]
    fn wrapped_and_bare_objects_are_accepted() {
        let wrapped = result_items(json!({"evaluations": [{"index": 1, "similarity": 5}]})).unwrap();
        assert_eq!(wrapped.len(), 1);
        let bare = result_items(json!({"referenceAnswer": "R", "similarity": "85%"})).unwrap();
        assert_eq!(bare[0].similarity, Some(85));
    }

    #[test]
    fn scores_are_coerced_and_clamped() {
        assert_eq!(as_score(&json!(87.6)), Some(88));
        assert_eq!(as_score(&json!(140)), Some(100));
        assert_eq!(as_score(&json!(-3)), Some(0));
        assert_eq!(as_score(&json!("72/100")), Some(72));
        assert_eq!(as_score(&json!("high")), None);
    }

    #[test]
    fn missing_points_array_is_joined() {
        let items = result_items(json!([{"missingPoints": ["cost", " scale "]}])).unwrap();
        assert_eq!(items[0].missing.as_deref(), Some("cost; scale"));
    }

    #[test]
    fn empty_array_does_not_align() {
        assert!(align(&pairs(2), Vec::new()).is_none());
    }

    #[test]
    fn scalar_payload_is_malformed() {
        assert!(matches!(result_items(json!(42)), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn single_reply_parsing_defaults_on_garbage() {
        let pair = QaPair::new("Q?", "A");
        assert_eq!(parse_single(&pair, "I cannot do that"), default_evaluation(&pair));
        let ok = parse_single(
            &pair,
            "```json\n{\"referenceAnswer\": \"R\", \"similarity\": 75, \"missingPoints\": \"\"}\n```",
        );
        assert_eq!(ok.similarity, 75);
        assert_eq!(ok.user_answer, "A");
    }
}
