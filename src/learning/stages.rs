//! The four LLM stages of a nightly run.
//!
//! Each stage is a standalone async function taking the provider handle,
//! and each degrades instead of failing: a transport or parse error
//! produces a documented fallback value so the orchestrator always has
//! something to persist.

use serde::Deserialize;
use tracing::warn;

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::Message;

/// How many enriched events the summarizer actually reads. Everything
/// past this cap still counts toward the fetch totals but never reaches
/// the model.
pub const MAX_SUMMARIZED_EVENTS: usize = 50;

/// Summary text persisted when the digest stage fails outright.
pub const SUMMARY_FALLBACK: &str = "Summary could not be generated for this period.";

/// The single pattern recorded when the model answered but its output
/// was not the expected JSON document.
pub const PATTERN_PARSE_FALLBACK: &str = "Unable to extract patterns from the daily summary";

/// Insight persisted when the reflection stage fails.
pub const INSIGHT_FALLBACK: &str =
    "Today passed quietly. I gathered the data, but the words for it did not come.";

/// A conversation event joined with its agent's description.
#[derive(Debug, Clone)]
pub struct EnrichedEvent {
    /// Description of the agent this conversation belongs to, or
    /// "Unknown" when the agent is missing or was created outside the
    /// collection window.
    pub agent_description: String,
    pub feedback_rating: Option<i32>,
    pub messages: Vec<Message>,
}

impl EnrichedEvent {
    /// One line of summarizer input.
    fn as_digest_line(&self) -> String {
        let rating = match self.feedback_rating {
            Some(r) => r.to_string(),
            None => "N/A".to_string(),
        };
        format!("Agent: {} | Rating: {}", self.agent_description, rating)
    }
}

/// Result of one stage: the value to carry forward, the tokens billed
/// and whether the fallback path was taken.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub value: T,
    pub tokens: u32,
    pub fell_back: bool,
}

impl<T> StageOutput<T> {
    fn ok(value: T, tokens: u32) -> Self {
        Self {
            value,
            tokens,
            fell_back: false,
        }
    }

    fn fallback(value: T, tokens: u32) -> Self {
        Self {
            value,
            tokens,
            fell_back: true,
        }
    }
}

/// Stage 1: digest the day's conversations into a few paragraphs.
///
/// Failure degrades to [`SUMMARY_FALLBACK`] with zero tokens.
pub async fn summarize_conversations(
    llm: &dyn LlmProvider,
    events: &[EnrichedEvent],
) -> StageOutput<String> {
    let lines: Vec<String> = events
        .iter()
        .take(MAX_SUMMARIZED_EVENTS)
        .map(EnrichedEvent::as_digest_line)
        .collect();

    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You are an analyst reviewing one day of AI agent activity. \
             Summarize the conversations below in a few short paragraphs. \
             Cover: the most common kinds of agents created, how well they \
             were received by their ratings, recurring themes in what users \
             asked for, and any visible problems or friction.",
        ),
        ChatMessage::user(format!(
            "Conversations from the last 24 hours ({} shown):\n\n{}",
            lines.len(),
            lines.join("\n")
        )),
    ])
    .with_temperature(0.5)
    .with_max_tokens(800);

    match llm.complete(request).await {
        Ok(response) => {
            let tokens = response.total_tokens();
            StageOutput::ok(response.content, tokens)
        }
        Err(e) => {
            warn!(error = %e, "summary stage failed, using fallback text");
            StageOutput::fallback(SUMMARY_FALLBACK.to_string(), 0)
        }
    }
}

#[derive(Debug, Deserialize)]
struct PatternsDocument {
    /// A JSON object without the key counts as "no patterns found",
    /// which is distinct from unparsable output.
    #[serde(default)]
    patterns: Vec<String>,
}

/// Strip an optional Markdown code fence around a JSON payload.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") up to the first newline.
    let rest = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_patterns(content: &str) -> Option<Vec<String>> {
    let doc: PatternsDocument = serde_json::from_str(strip_code_fence(content)).ok()?;
    Some(doc.patterns)
}

/// Stage 2: extract recurring patterns from the summary as a JSON list.
///
/// Two distinct failure modes: a transport error yields an empty list
/// and zero tokens, while a successful call whose output is not valid
/// JSON yields a single fixed pattern and keeps the billed tokens.
pub async fn extract_patterns(llm: &dyn LlmProvider, summary: &str) -> StageOutput<Vec<String>> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You extract recurring behavioral patterns from a daily activity \
             summary. Respond with nothing but a JSON object of the form \
             {\"patterns\": [\"...\"]}, where each entry is one concise \
             observation about what users wanted or how agents performed.",
        ),
        ChatMessage::user(summary.to_string()),
    ])
    .with_temperature(0.5)
    .with_max_tokens(500);

    match llm.complete(request).await {
        Ok(response) => {
            let tokens = response.total_tokens();
            match parse_patterns(&response.content) {
                Some(patterns) => StageOutput::ok(patterns, tokens),
                None => {
                    warn!("pattern stage returned unparsable JSON, recording fallback pattern");
                    StageOutput::fallback(vec![PATTERN_PARSE_FALLBACK.to_string()], tokens)
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "pattern stage failed, recording no patterns");
            StageOutput::fallback(Vec::new(), 0)
        }
    }
}

/// Stage 3: propose a revised Master Prompt from the current one plus
/// the day's patterns and summary.
///
/// Failure degrades to the current prompt content verbatim with zero
/// tokens, so the candidate is a no-op revision rather than a hole.
pub async fn propose_master_prompt_update(
    llm: &dyn LlmProvider,
    current_prompt: &str,
    patterns: &[String],
    summary: &str,
) -> StageOutput<String> {
    let pattern_lines: Vec<String> = patterns.iter().map(|p| format!("- {p}")).collect();

    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You maintain the Master Prompt of an AI agent builder. Given \
             the current prompt, today's observed patterns and the daily \
             summary, produce a complete revised prompt. Keep the original \
             structure and voice; change only what the evidence supports. \
             Respond with the full revised prompt text and nothing else.",
        ),
        ChatMessage::user(format!(
            "CURRENT MASTER PROMPT:\n{current_prompt}\n\n\
             OBSERVED PATTERNS:\n{}\n\n\
             DAILY SUMMARY:\n{summary}",
            pattern_lines.join("\n")
        )),
    ])
    .with_temperature(0.7)
    .with_max_tokens(3000);

    match llm.complete(request).await {
        Ok(response) => {
            let tokens = response.total_tokens();
            StageOutput::ok(response.content, tokens)
        }
        Err(e) => {
            warn!(error = %e, "propose stage failed, keeping current prompt verbatim");
            StageOutput::fallback(current_prompt.to_string(), 0)
        }
    }
}

/// Stage 4: a short first-person reflection on the day.
///
/// The highest temperature of the four stages; this output is flavor,
/// not data. Failure degrades to [`INSIGHT_FALLBACK`].
pub async fn generate_daily_insight(
    llm: &dyn LlmProvider,
    summary: &str,
    patterns: &[String],
) -> StageOutput<String> {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "You are the system itself, writing a nightly diary entry in \
             the first person. In about 150 words, reflect on what you \
             observed today and what you learned from it. Be personal and \
             concrete; do not list statistics.",
        ),
        ChatMessage::user(format!(
            "Today's summary:\n{summary}\n\nPatterns noticed:\n{}",
            patterns.join("\n")
        )),
    ])
    .with_temperature(0.9)
    .with_max_tokens(300);

    match llm.complete(request).await {
        Ok(response) => {
            let tokens = response.total_tokens();
            StageOutput::ok(response.content, tokens)
        }
        Err(e) => {
            warn!(error = %e, "insight stage failed, using fallback text");
            StageOutput::fallback(INSIGHT_FALLBACK.to_string(), 0)
        }
    }
}
