// src/llm/mod.rs

//! Everything that talks to the language model: the raw completion provider,
//! prompt rendering, output schemas and the validating client on top.

pub mod openai;
pub mod prompts;
pub mod schema;
pub mod structured;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use structured::{PromptSpec, StructuredOutputClient};

/// Errors surfaced by the completion provider and the structured-output client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LlmError {
    #[error("completion request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model output failed validation: {0}")]
    ValidationFailed(String),

    #[error("model output echoed internal instructions")]
    LeakDetected,
}

impl LlmError {
    /// Message safe to show the end user; details stay in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            LlmError::Transport(_) | LlmError::Status { .. } => {
                "The AI service is unavailable right now. Please try again later."
            }
            LlmError::ValidationFailed(_) => {
                "The AI returned a response we could not use. Please try again."
            }
            LlmError::LeakDetected => "The AI response was rejected. Please try again.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A single request/response text-completion primitive.
///
/// Implementations return the full concatenated completion text; any
/// provider-side streaming is consumed internally.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;
}
