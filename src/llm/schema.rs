// src/llm/schema.rs

use std::collections::HashSet;

use serde::Deserialize;

use crate::models::question::{NewQuestion, QuestionPrompt, QuestionType};
use crate::models::quiz_attempt::{AnswerFormat, Difficulty};

/// Shape a model reply must have, between `<tag>` and `</tag>`.
pub trait OutputSchema: Send + Sync {
    type Item: Send;

    /// Delimiter tag wrapping the structured block.
    fn tag(&self) -> &'static str;

    /// Parses and validates the extracted block. The error string is fed back
    /// to the model in the corrective retry.
    fn parse(&self, raw: &str) -> Result<Vec<Self::Item>, String>;
}

pub const OPTIONS_PER_QUESTION: usize = 4;
pub const MAX_CONCEPT_TAGS: usize = 3;

/// Snaps a grader's raw score onto {0, 0.5, 1}.
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() || raw < 0.25 {
        0.0
    } else if raw < 0.75 {
        0.5
    } else {
        1.0
    }
}

/// Models often wrap JSON in a markdown fence even when told not to.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// A question as the model proposes it. Numbered later, in array order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratedQuestion {
    #[serde(rename_all = "camelCase")]
    MultipleChoice {
        question: String,
        options: Vec<String>,
        correct_answer: String,
        explanation: String,
        #[serde(default)]
        concept_tags: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    FreeText {
        question: String,
        correct_answer: String,
        explanation: String,
        #[serde(default)]
        concept_tags: Vec<String>,
    },
}

impl GeneratedQuestion {
    pub fn question_type(&self) -> QuestionType {
        match self {
            GeneratedQuestion::MultipleChoice { .. } => QuestionType::MultipleChoice,
            GeneratedQuestion::FreeText { .. } => QuestionType::FreeText,
        }
    }

    fn validate(&self, format: AnswerFormat) -> Result<(), String> {
        if !format.allows(self.question_type()) {
            return Err(format!(
                "type {} is not allowed for answer format {}",
                self.question_type().as_str(),
                format.as_str()
            ));
        }

        let (question, correct_answer, explanation, concept_tags) = match self {
            GeneratedQuestion::MultipleChoice {
                question,
                options,
                correct_answer,
                explanation,
                concept_tags,
            } => {
                if options.len() != OPTIONS_PER_QUESTION {
                    return Err(format!(
                        "expected exactly {} options, got {}",
                        OPTIONS_PER_QUESTION,
                        options.len()
                    ));
                }
                if options.iter().any(|o| o.trim().is_empty()) {
                    return Err("options must not be empty".to_string());
                }
                let distinct: HashSet<&str> = options.iter().map(|o| o.trim()).collect();
                if distinct.len() != options.len() {
                    return Err("options must be distinct".to_string());
                }
                if !options.contains(correct_answer) {
                    return Err("correctAnswer must equal one of the options verbatim".to_string());
                }
                (question, correct_answer, explanation, concept_tags)
            }
            GeneratedQuestion::FreeText {
                question,
                correct_answer,
                explanation,
                concept_tags,
            } => (question, correct_answer, explanation, concept_tags),
        };

        if question.trim().is_empty() {
            return Err("question must not be empty".to_string());
        }
        if correct_answer.trim().is_empty() {
            return Err("correctAnswer must not be empty".to_string());
        }
        if explanation.trim().is_empty() {
            return Err("explanation must not be empty".to_string());
        }
        if concept_tags.is_empty() || concept_tags.len() > MAX_CONCEPT_TAGS {
            return Err(format!(
                "conceptTags must hold 1 to {} entries, got {}",
                MAX_CONCEPT_TAGS,
                concept_tags.len()
            ));
        }
        if concept_tags.iter().any(|t| t.trim().is_empty()) {
            return Err("conceptTags must not contain empty entries".to_string());
        }
        Ok(())
    }

    pub fn into_new_question(self, question_number: i32, difficulty: Difficulty) -> NewQuestion {
        let (prompt, correct_answer, explanation, concept_tags) = match self {
            GeneratedQuestion::MultipleChoice {
                question,
                options,
                correct_answer,
                explanation,
                concept_tags,
            } => (
                QuestionPrompt::MultipleChoice {
                    text: question,
                    options,
                },
                correct_answer,
                explanation,
                concept_tags,
            ),
            GeneratedQuestion::FreeText {
                question,
                correct_answer,
                explanation,
                concept_tags,
            } => (
                QuestionPrompt::FreeText { text: question },
                correct_answer,
                explanation,
                concept_tags,
            ),
        };

        NewQuestion {
            question_number,
            prompt,
            correct_answer,
            explanation,
            difficulty,
            concept_tags,
        }
    }
}

#[derive(Debug, Deserialize)]
struct QuestionPayload {
    questions: Vec<GeneratedQuestion>,
}

/// Output contract for quiz generation.
#[derive(Debug, Clone)]
pub struct QuestionSchema {
    pub answer_format: AnswerFormat,
    /// Items past this count are dropped.
    pub max_items: usize,
}

impl OutputSchema for QuestionSchema {
    type Item = GeneratedQuestion;

    fn tag(&self) -> &'static str {
        "quiz_output"
    }

    fn parse(&self, raw: &str) -> Result<Vec<GeneratedQuestion>, String> {
        let payload: QuestionPayload = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| format!("invalid JSON: {}", e))?;

        if payload.questions.is_empty() {
            return Err("questions must not be empty".to_string());
        }

        let mut questions = payload.questions;
        questions.truncate(self.max_items);
        for (index, question) in questions.iter().enumerate() {
            question
                .validate(self.answer_format)
                .map_err(|e| format!("question {}: {}", index + 1, e))?;
        }
        Ok(questions)
    }
}

/// One free-text grade after clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct GradedItem {
    pub question_number: i32,
    pub score: f64,
    pub is_correct: bool,
    pub feedback: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGrade {
    question_number: i32,
    score: f64,
    #[serde(default)]
    feedback: Option<String>,
    // Any `isCorrect` the model sends is ignored; correctness comes from the score.
}

#[derive(Debug, Deserialize)]
struct GradingPayload {
    results: Vec<RawGrade>,
}

/// Output contract for batched free-text grading.
#[derive(Debug, Clone)]
pub struct GradingSchema {
    /// Question numbers sent for grading.
    pub expected: Vec<i32>,
}

impl OutputSchema for GradingSchema {
    type Item = GradedItem;

    fn tag(&self) -> &'static str {
        "grading_output"
    }

    fn parse(&self, raw: &str) -> Result<Vec<GradedItem>, String> {
        let payload: GradingPayload = serde_json::from_str(strip_code_fence(raw))
            .map_err(|e| format!("invalid JSON: {}", e))?;

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(payload.results.len());
        for grade in payload.results {
            if !self.expected.contains(&grade.question_number) {
                return Err(format!(
                    "questionNumber {} was not submitted for grading",
                    grade.question_number
                ));
            }
            if !seen.insert(grade.question_number) {
                return Err(format!(
                    "questionNumber {} graded more than once",
                    grade.question_number
                ));
            }
            if !grade.score.is_finite() {
                return Err(format!(
                    "questionNumber {} has a non-numeric score",
                    grade.question_number
                ));
            }

            let score = clamp_score(grade.score);
            items.push(GradedItem {
                question_number: grade.question_number,
                score,
                is_correct: score == 1.0,
                feedback: grade
                    .feedback
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty()),
            });
        }
        Ok(items)
    }
}
