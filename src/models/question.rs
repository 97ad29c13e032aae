// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};

use crate::error::AppError;
use crate::models::quiz_attempt::{Difficulty, UnknownVariant};

/// Closed-form (multiple choice) or open-form (free text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    FreeText,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::FreeText => "free_text",
        }
    }
}

impl TryFrom<String> for QuestionType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "free_text" => Ok(QuestionType::FreeText),
            _ => Err(UnknownVariant {
                kind: "question type",
                value,
            }),
        }
    }
}

/// What the taker sees: the prompt text plus, for closed-form questions,
/// the four options.
#[derive(Debug, Clone, PartialEq)]
pub enum QuestionPrompt {
    MultipleChoice { text: String, options: Vec<String> },
    FreeText { text: String },
}

impl QuestionPrompt {
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionPrompt::MultipleChoice { .. } => QuestionType::MultipleChoice,
            QuestionPrompt::FreeText { .. } => QuestionType::FreeText,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            QuestionPrompt::MultipleChoice { text, .. } | QuestionPrompt::FreeText { text } => text,
        }
    }

    pub fn options(&self) -> Option<&[String]> {
        match self {
            QuestionPrompt::MultipleChoice { options, .. } => Some(options),
            QuestionPrompt::FreeText { .. } => None,
        }
    }
}

/// One generated exercise. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: i64,
    pub attempt_id: i64,
    /// 1-based position in generation order.
    pub question_number: i32,
    pub prompt: QuestionPrompt,
    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub concept_tags: Vec<String>,
}

/// A validated question ready to be persisted; the number is assigned by the
/// generation pipeline, not by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQuestion {
    pub question_number: i32,
    pub prompt: QuestionPrompt,
    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: Difficulty,
    pub concept_tags: Vec<String>,
}

/// Represents the 'questions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct QuestionRecord {
    pub id: i64,
    pub attempt_id: i64,
    pub question_number: i32,

    /// Mapped from the database column 'type' since `type` is a reserved keyword in Rust.
    #[sqlx(rename = "type")]
    pub question_type: String,

    pub question_text: String,

    /// NULL for free-text questions, never an empty array.
    pub options: Option<Json<Vec<String>>>,

    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: String,
    pub concept_tags: Json<Vec<String>>,
}

impl TryFrom<QuestionRecord> for Question {
    type Error = AppError;

    fn try_from(record: QuestionRecord) -> Result<Self, Self::Error> {
        let question_type = QuestionType::try_from(record.question_type)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        let prompt = match (question_type, record.options) {
            (QuestionType::MultipleChoice, Some(Json(options))) => QuestionPrompt::MultipleChoice {
                text: record.question_text,
                options,
            },
            (QuestionType::FreeText, None) => QuestionPrompt::FreeText {
                text: record.question_text,
            },
            (question_type, _) => {
                return Err(AppError::InternalServerError(format!(
                    "question {} has options inconsistent with type {}",
                    record.id,
                    question_type.as_str()
                )));
            }
        };

        Ok(Question {
            id: record.id,
            attempt_id: record.attempt_id,
            question_number: record.question_number,
            prompt,
            correct_answer: record.correct_answer,
            explanation: record.explanation,
            difficulty: Difficulty::try_from(record.difficulty)
                .map_err(|e| AppError::InternalServerError(e.to_string()))?,
            concept_tags: record.concept_tags.0,
        })
    }
}

/// DTO for sending a question to the taker (excludes answer, explanation and tags).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicQuestion {
    pub id: i64,
    pub question_number: i32,
    pub question_type: QuestionType,
    pub question_text: String,
    /// Serialized as `null` for free-text questions.
    pub options: Option<Vec<String>>,
}

impl From<&Question> for PublicQuestion {
    fn from(question: &Question) -> Self {
        PublicQuestion {
            id: question.id,
            question_number: question.question_number,
            question_type: question.prompt.question_type(),
            question_text: question.prompt.text().to_string(),
            options: question.prompt.options().map(<[String]>::to_vec),
        }
    }
}

/// Full question view, only served once solutions may be revealed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealedQuestion {
    #[serde(flatten)]
    pub question: PublicQuestion,
    pub correct_answer: String,
    pub explanation: String,
    pub concept_tags: Vec<String>,
}

impl From<&Question> for RevealedQuestion {
    fn from(question: &Question) -> Self {
        RevealedQuestion {
            question: PublicQuestion::from(question),
            correct_answer: question.correct_answer.clone(),
            explanation: question.explanation.clone(),
            concept_tags: question.concept_tags.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(question_type: &str, options: Option<Vec<String>>) -> QuestionRecord {
        QuestionRecord {
            id: 7,
            attempt_id: 1,
            question_number: 1,
            question_type: question_type.to_string(),
            question_text: "Which keyword declares a constant?".to_string(),
            options: options.map(Json),
            correct_answer: "const".to_string(),
            explanation: "const binds an immutable value".to_string(),
            difficulty: "easy".to_string(),
            concept_tags: Json(vec!["bindings".to_string()]),
        }
    }

    #[test]
    fn public_projection_hides_solution_and_nulls_free_text_options() {
        let question = Question::try_from(record("free_text", None)).unwrap();
        let value = serde_json::to_value(PublicQuestion::from(&question)).unwrap();

        assert_eq!(value["questionType"], "free_text");
        assert!(value["options"].is_null());
        assert!(value.get("correctAnswer").is_none());
        assert!(value.get("explanation").is_none());
    }

    #[test]
    fn record_with_mismatched_options_is_rejected() {
        assert!(Question::try_from(record("free_text", Some(vec!["a".into()]))).is_err());
        assert!(Question::try_from(record("multiple_choice", None)).is_err());
    }
}
