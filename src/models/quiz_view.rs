// src/models/quiz_view.rs

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{
    answer::Answer,
    question::{PublicQuestion, Question, RevealedQuestion},
    quiz_attempt::QuizAttempt,
};

/// Question projection chosen by attempt status.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QuestionView {
    Hidden(PublicQuestion),
    Revealed(RevealedQuestion),
}

/// One question of the polling view together with the taker's answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizItemView {
    #[serde(flatten)]
    pub question: QuestionView,
    pub user_answer: Option<String>,
    pub score: Option<f64>,
    pub is_correct: Option<bool>,
    pub feedback: Option<String>,
}

/// Response for `GET /api/quizzes/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizDetail {
    pub attempt: QuizAttempt,
    pub questions: Vec<QuizItemView>,
}

impl QuizDetail {
    /// Canonical answers, explanations and tags only appear once the attempt
    /// has been submitted and left grading.
    pub fn build(attempt: QuizAttempt, questions: &[Question], answers: Vec<Answer>) -> Self {
        let reveal = attempt.status.reveals_solutions();
        let mut answers: HashMap<i64, Answer> = answers
            .into_iter()
            .map(|answer| (answer.question_id, answer))
            .collect();

        let questions = questions
            .iter()
            .map(|question| {
                let view = if reveal {
                    QuestionView::Revealed(RevealedQuestion::from(question))
                } else {
                    QuestionView::Hidden(PublicQuestion::from(question))
                };
                let answer = answers.remove(&question.id);

                QuizItemView {
                    question: view,
                    user_answer: answer.as_ref().and_then(|a| a.user_answer.clone()),
                    score: answer.as_ref().and_then(|a| a.score),
                    is_correct: answer.as_ref().and_then(|a| a.is_correct),
                    feedback: answer.and_then(|a| a.feedback),
                }
            })
            .collect();

        Self { attempt, questions }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::{
        question::QuestionPrompt,
        quiz_attempt::{AnswerFormat, AttemptStatus, Difficulty},
    };

    fn attempt(status: AttemptStatus) -> QuizAttempt {
        QuizAttempt {
            id: 1,
            session_id: 1,
            user_id: 1,
            difficulty: Difficulty::Medium,
            answer_format: AnswerFormat::MultipleChoice,
            requested_count: 1,
            question_count: 1,
            used_materials: false,
            status,
            score: None,
            started_at: Utc::now(),
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    fn question() -> Question {
        Question {
            id: 10,
            attempt_id: 1,
            question_number: 1,
            prompt: QuestionPrompt::MultipleChoice {
                text: "Which trait enables `?` conversions?".to_string(),
                options: vec![
                    "From".to_string(),
                    "Into".to_string(),
                    "AsRef".to_string(),
                    "Deref".to_string(),
                ],
            },
            correct_answer: "From".to_string(),
            explanation: "`?` calls From::from on the error".to_string(),
            difficulty: Difficulty::Medium,
            concept_tags: vec!["errors".to_string()],
        }
    }

    #[test]
    fn solutions_hidden_while_taking_the_quiz() {
        let detail = QuizDetail::build(attempt(AttemptStatus::InProgress), &[question()], vec![]);
        let value = serde_json::to_value(&detail).unwrap();

        let item = &value["questions"][0];
        assert_eq!(item["questionNumber"], 1);
        assert!(item.get("correctAnswer").is_none());
        assert!(item["userAnswer"].is_null());
    }

    #[test]
    fn solutions_revealed_after_grading() {
        let detail = QuizDetail::build(attempt(AttemptStatus::Completed), &[question()], vec![]);
        let value = serde_json::to_value(&detail).unwrap();

        assert_eq!(value["questions"][0]["correctAnswer"], "From");
        assert_eq!(value["attempt"]["status"], "completed");
    }
}
