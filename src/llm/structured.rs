// src/llm/structured.rs

use std::sync::Arc;

use regex::Regex;

use crate::llm::schema::OutputSchema;
use crate::llm::{ChatMessage, CompletionProvider, LlmError};

/// Sentinel embedded in every system prompt. Seeing it in a reply means the
/// model echoed its instructions.
pub const LEAK_MARKER: &str = "QF-CANARY-7d3e91b4";

/// First call plus one corrective retry.
const MAX_ATTEMPTS: usize = 2;

/// A rendered system + user prompt pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    pub system: String,
    pub user: String,
}

/// Wraps the completion provider with tag extraction, schema validation,
/// one corrective retry and leak detection.
#[derive(Clone)]
pub struct StructuredOutputClient {
    provider: Arc<dyn CompletionProvider>,
}

impl StructuredOutputClient {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self { provider }
    }

    /// Runs the prompt and returns the validated items in reply order.
    ///
    /// Transport and provider errors propagate on the first occurrence.
    /// Content that fails extraction or validation is retried exactly once
    /// with a corrective instruction; a leak marker fails immediately.
    pub async fn complete<S: OutputSchema>(
        &self,
        prompt: &PromptSpec,
        schema: &S,
    ) -> Result<Vec<S::Item>, LlmError> {
        let mut messages = vec![
            ChatMessage::system(prompt.system.as_str()),
            ChatMessage::user(prompt.user.as_str()),
        ];
        let mut attempt = 1;

        loop {
            let reply = self.provider.complete(&messages).await?;

            if reply.contains(LEAK_MARKER) {
                tracing::error!(
                    "Model reply for <{}> contained the leak marker; aborting without retry",
                    schema.tag()
                );
                return Err(LlmError::LeakDetected);
            }

            let parsed = extract_tagged(&reply, schema.tag())
                .ok_or_else(|| format!("no <{0}>...</{0}> block found", schema.tag()))
                .and_then(|block| schema.parse(block));

            match parsed {
                Ok(items) => return Ok(items),
                Err(detail) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        "Model reply for <{}> failed validation (attempt {}): {}",
                        schema.tag(),
                        attempt,
                        detail
                    );
                    messages.push(ChatMessage::assistant(reply));
                    messages.push(ChatMessage::user(corrective_instruction(
                        schema.tag(),
                        &detail,
                    )));
                    attempt += 1;
                }
                Err(detail) => return Err(LlmError::ValidationFailed(detail)),
            }
        }
    }
}

fn corrective_instruction(tag: &str, detail: &str) -> String {
    format!(
        "Your previous reply could not be used: {detail}. \
         Reply again with only the corrected JSON wrapped in <{tag}> and </{tag}>, \
         following the format rules exactly."
    )
}

/// Returns the trimmed text between the first `<tag>` and the next `</tag>`.
pub fn extract_tagged<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let tag = regex::escape(tag);
    let pattern = Regex::new(&format!(r"(?s)<{tag}>(.*?)</{tag}>")).ok()?;
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}
