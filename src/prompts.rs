//! Prompts for every model call the pipeline makes.
//!
//! Kept in one place so wording changes never touch retry or parsing code,
//! and so tests can assert on exactly what is sent.

use crate::output::QaPair;

/// System prompt for the vision OCR call on a rendered slide.
pub const OCR_SYSTEM_PROMPT: &str = r#"You are a meticulous OCR engine for presentation slides.

Transcribe ALL visible text on the slide image:
- Keep the reading order a presenter would use (title first, then body top to bottom)
- Keep bullet points as separate lines starting with "- "
- Transcribe text inside charts, tables and diagrams when legible
- Do NOT describe images, colours or layout
- Do NOT add commentary, headings or code fences
- If the slide has no text, answer with an empty response"#;

/// System prompt shared by question and speech generation.
pub const PRESENTER_SYSTEM_PROMPT: &str =
    "You are an experienced presentation coach helping a speaker prepare a slide deck.";

/// System prompt for answer evaluation.
pub const EVALUATOR_SYSTEM_PROMPT: &str = "You are a fair and precise examiner. \
You answer questions correctly and concisely, then compare a learner's answer \
with your own. You always reply with valid JSON only.";

/// Ask for exactly one audience question about a slide.
pub fn question_prompt(slide_text: &str, page_index: usize) -> String {
    format!(
        "Here is the content of slide {page_index} of a presentation:\n\n\
\"\"\"\n{slide_text}\n\"\"\"\n\n\
Write exactly ONE question an attentive audience member could ask about this slide. \
The question must be answerable from the slide content. \
Reply with the question only, without numbering, quotes or preamble."
    )
}

/// Ask for a short spoken script for a slide.
pub fn speech_prompt(slide_text: &str, page_index: usize) -> String {
    format!(
        "Here is the content of slide {page_index} of a presentation:\n\n\
\"\"\"\n{slide_text}\n\"\"\"\n\n\
Write the script a presenter would say aloud while showing this slide. \
Use 3 to 5 natural spoken sentences, first person, no bullet points, \
no stage directions and no slide number. Reply with the script only."
    )
}

/// Score a single answer. The reply must be one JSON object.
pub fn single_evaluation_prompt(pair: &QaPair) -> String {
    format!(
        "Question: {}\n\
Learner answer: {}\n\n\
1. Write your own correct, concise reference answer to the question.\n\
2. Rate how well the learner answer matches your reference from 0 to 100.\n\
3. List the key points the learner missed (empty string if none).\n\n\
Reply with a single JSON object and nothing else:\n\
{{\"referenceAnswer\": \"...\", \"similarity\": 0, \"missingPoints\": \"...\"}}",
        pair.question.trim(),
        answer_or_placeholder(&pair.user_answer),
    )
}

/// Score many answers in one call. Pairs are numbered from 1 and the reply
/// must echo each number in an `index` field.
pub fn batch_evaluation_prompt(pairs: &[QaPair]) -> String {
    let mut body = String::new();
    for (i, pair) in pairs.iter().enumerate() {
        body.push_str(&format!(
            "[{}]\nQuestion: {}\nLearner answer: {}\n\n",
            i + 1,
            pair.question.trim(),
            answer_or_placeholder(&pair.user_answer),
        ));
    }
    format!(
        "Evaluate the following {n} question/answer pairs.\n\n\
{body}\
For EACH pair:\n\
1. Write your own correct, concise reference answer to the question.\n\
2. Rate how well the learner answer matches your reference from 0 to 100.\n\
3. List the key points the learner missed (empty string if none).\n\n\
Reply with a JSON array of exactly {n} objects and nothing else, one per pair, \
keeping the pair number in \"index\":\n\
[{{\"index\": 1, \"referenceAnswer\": \"...\", \"similarity\": 0, \"missingPoints\": \"...\"}}]",
        n = pairs.len(),
    )
}

fn answer_or_placeholder(answer: &str) -> &str {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        "(no answer given)"
    } else {
        trimmed
    }
}
