// src/models/answer.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::config::MAX_ANSWER_LENGTH;

/// Represents the 'answers' table in the database.
/// One row per question, created empty at generation time.
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub attempt_id: i64,
    pub user_answer: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,

    /// One of 0, 0.5 or 1 once graded. Set together with `is_correct`.
    pub score: Option<f64>,
    pub is_correct: Option<bool>,
    pub feedback: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl Answer {
    pub fn is_answered(&self) -> bool {
        self.user_answer
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

/// A grade ready to be written to an answer row.
///
/// The correctness flag is always derived from the score, never accepted
/// from the grader.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerGrade {
    pub score: f64,
    pub feedback: Option<String>,
}

impl AnswerGrade {
    pub fn new(score: f64, feedback: Option<String>) -> Self {
        Self { score, feedback }
    }

    pub fn is_correct(&self) -> bool {
        self.score == 1.0
    }
}

/// DTO for saving a draft answer while the quiz is being taken.
#[derive(Debug, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    #[validate(length(max = MAX_ANSWER_LENGTH, message = "Answer is too long."))]
    pub answer: String,
}

/// One last-moment answer edit sent along with a submission.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEdit {
    pub question_id: i64,
    #[validate(length(max = MAX_ANSWER_LENGTH, message = "Answer is too long."))]
    pub answer: String,
}

/// DTO for submitting a quiz attempt for grading.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct SubmitQuizRequest {
    #[serde(default)]
    #[validate(nested)]
    pub answers: Vec<AnswerEdit>,
}
