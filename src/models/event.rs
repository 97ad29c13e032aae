// src/models/event.rs

use serde::Serialize;

use crate::models::question::PublicQuestion;

/// One frame on a generation or grading event stream.
///
/// `Complete` and `Error` are terminal; exactly one of them ends a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Progress { message: String },
    Item { data: PublicQuestion },
    Graded { data: GradedAnswer },
    Complete { data: CompletionData },
    Error { message: String },
}

impl StreamEvent {
    pub fn progress(message: impl Into<String>) -> Self {
        StreamEvent::Progress {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradedAnswer {
    pub question_number: i32,
    pub score: f64,
    pub is_correct: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionData {
    pub quiz_attempt_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}
