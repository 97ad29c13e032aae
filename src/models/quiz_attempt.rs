// src/models/quiz_attempt.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::config::{MAX_QUESTION_COUNT, MIN_QUESTION_COUNT};
use crate::models::question::QuestionType;

/// Raised when a stored text column holds a value no enum variant maps to.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle of a quiz attempt.
///
/// `generating → in_progress → grading → completed | submitted_ungraded`,
/// with `submitted_ungraded → grading` on regrade. `failed` is only set by the
/// stale-generation sweep for attempts that never produced a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Generating,
    InProgress,
    Grading,
    SubmittedUngraded,
    Completed,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Generating => "generating",
            AttemptStatus::InProgress => "in_progress",
            AttemptStatus::Grading => "grading",
            AttemptStatus::SubmittedUngraded => "submitted_ungraded",
            AttemptStatus::Completed => "completed",
            AttemptStatus::Failed => "failed",
        }
    }

    /// Whether canonical answers may be shown to the taker.
    pub fn reveals_solutions(self) -> bool {
        matches!(
            self,
            AttemptStatus::Completed | AttemptStatus::SubmittedUngraded
        )
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AttemptStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "generating" => Ok(AttemptStatus::Generating),
            "in_progress" => Ok(AttemptStatus::InProgress),
            "grading" => Ok(AttemptStatus::Grading),
            "submitted_ungraded" => Ok(AttemptStatus::SubmittedUngraded),
            "completed" => Ok(AttemptStatus::Completed),
            "failed" => Ok(AttemptStatus::Failed),
            _ => Err(UnknownVariant {
                kind: "attempt status",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl TryFrom<String> for Difficulty {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(UnknownVariant {
                kind: "difficulty",
                value,
            }),
        }
    }
}

/// Which question kinds a generation request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerFormat {
    MultipleChoice,
    FreeText,
    Mixed,
}

impl AnswerFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerFormat::MultipleChoice => "multiple_choice",
            AnswerFormat::FreeText => "free_text",
            AnswerFormat::Mixed => "mixed",
        }
    }

    pub fn allows(self, question_type: QuestionType) -> bool {
        match self {
            AnswerFormat::MultipleChoice => question_type == QuestionType::MultipleChoice,
            AnswerFormat::FreeText => question_type == QuestionType::FreeText,
            AnswerFormat::Mixed => true,
        }
    }
}

impl TryFrom<String> for AnswerFormat {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "multiple_choice" => Ok(AnswerFormat::MultipleChoice),
            "free_text" => Ok(AnswerFormat::FreeText),
            "mixed" => Ok(AnswerFormat::Mixed),
            _ => Err(UnknownVariant {
                kind: "answer format",
                value,
            }),
        }
    }
}

/// Represents the 'quiz_attempts' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttempt {
    pub id: i64,
    pub session_id: i64,
    pub user_id: i64,

    #[sqlx(try_from = "String")]
    pub difficulty: Difficulty,

    #[sqlx(try_from = "String")]
    pub answer_format: AnswerFormat,

    /// Number of questions the caller asked for.
    pub requested_count: i32,

    /// Number of questions actually produced (may be lower than requested).
    pub question_count: i32,

    pub used_materials: bool,

    #[sqlx(try_from = "String")]
    pub status: AttemptStatus,

    /// Aggregate score 0-100. Only set once the attempt is `completed`.
    pub score: Option<f64>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Values needed to open a new attempt in `generating`.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub session_id: i64,
    pub user_id: i64,
    pub difficulty: Difficulty,
    pub answer_format: AnswerFormat,
    pub requested_count: i32,
    pub used_materials: bool,
}

/// DTO for requesting a new quiz.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateQuizRequest {
    pub difficulty: Difficulty,
    pub answer_format: AnswerFormat,
    #[validate(range(
        min = MIN_QUESTION_COUNT,
        max = MAX_QUESTION_COUNT,
        message = "questionCount must be between 1 and 20."
    ))]
    pub question_count: u32,
}
