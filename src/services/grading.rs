// src/services/grading.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    error::AppError,
    llm::{
        StructuredOutputClient,
        prompts::{FreeTextSubmission, grading_prompt},
        schema::GradingSchema,
    },
    models::{
        answer::{Answer, AnswerEdit, AnswerGrade},
        event::{CompletionData, GradedAnswer, StreamEvent},
        question::{Question, QuestionPrompt},
        quiz_attempt::{AttemptStatus, QuizAttempt},
    },
    repository::{AnswerWrite, AttemptRepository, SessionProvider},
    services::stream::StreamChannel,
};

/// A question paired with its answer row.
#[derive(Debug, Clone)]
pub struct GradingItem {
    pub question: Question,
    pub answer: Answer,
}

/// Snapshot phase 2 works from. Holds no database handle, so a regrade can
/// replay phase 2 from a freshly built context.
#[derive(Debug, Clone)]
pub struct GradingContext {
    pub attempt_id: i64,
    pub subject: String,
    /// Ordered by question number.
    pub items: Vec<GradingItem>,
}

/// Case-insensitive, whitespace-trimmed comparison against the canonical option.
pub fn is_closed_form_match(answer: &str, canonical: &str) -> bool {
    answer.trim().to_lowercase() == canonical.trim().to_lowercase()
}

/// Percentage of available points, 0-100.
pub fn aggregate_score(scores: impl IntoIterator<Item = f64>, question_count: usize) -> f64 {
    if question_count == 0 {
        return 0.0;
    }
    100.0 * scores.into_iter().sum::<f64>() / question_count as f64
}

/// Grades submitted attempts: closed-form locally, open-form in one batched
/// model call.
#[derive(Clone)]
pub struct GradingService {
    attempts: Arc<dyn AttemptRepository>,
    sessions: Arc<dyn SessionProvider>,
    client: StructuredOutputClient,
}

impl GradingService {
    pub fn new(
        attempts: Arc<dyn AttemptRepository>,
        sessions: Arc<dyn SessionProvider>,
        client: StructuredOutputClient,
    ) -> Self {
        Self {
            attempts,
            sessions,
            client,
        }
    }

    /// Phase 1 of a submission: checks, applies last-moment edits, verifies
    /// every question is answered and moves the attempt to `grading`.
    pub async fn prepare_grading(
        &self,
        attempt_id: i64,
        user_id: i64,
        edits: &[AnswerEdit],
    ) -> Result<GradingContext, AppError> {
        let attempt = self.load_owned_attempt(attempt_id, user_id).await?;

        match attempt.status {
            AttemptStatus::InProgress => {}
            AttemptStatus::Completed => {
                return Err(AppError::Conflict("Quiz has already been graded".to_string()));
            }
            AttemptStatus::Grading => {
                return Err(AppError::Conflict("Quiz is already being graded".to_string()));
            }
            other => {
                return Err(AppError::BadRequest(format!(
                    "Quiz cannot be submitted while {}",
                    other
                )));
            }
        }

        for edit in edits {
            match self
                .attempts
                .save_answer(attempt_id, edit.question_id, &edit.answer)
                .await?
            {
                AnswerWrite::Saved => {}
                AnswerWrite::UnknownQuestion => {
                    return Err(AppError::BadRequest(format!(
                        "Question {} does not belong to this quiz",
                        edit.question_id
                    )));
                }
                AnswerWrite::Locked => {
                    return Err(AppError::Conflict("Quiz is already being graded".to_string()));
                }
            }
        }

        // Answers are frozen from here on, so the snapshot below is exactly
        // what gets graded.
        self.begin_grading(attempt_id, AttemptStatus::InProgress)
            .await?;

        let context = match self.build_context(&attempt).await {
            Ok(context) => context,
            Err(e) => {
                self.reopen(attempt_id).await;
                return Err(e);
            }
        };
        if context.items.is_empty() {
            self.reopen(attempt_id).await;
            return Err(AppError::BadRequest("Quiz has no questions".to_string()));
        }
        if let Some(missing) = context.items.iter().find(|item| !item.answer.is_answered()) {
            self.reopen(attempt_id).await;
            return Err(AppError::BadRequest(format!(
                "Question {} has not been answered",
                missing.question.question_number
            )));
        }

        Ok(context)
    }

    /// Phase 1 of a regrade, only for attempts left in `submitted_ungraded`.
    pub async fn prepare_regrade(
        &self,
        attempt_id: i64,
        user_id: i64,
    ) -> Result<GradingContext, AppError> {
        let attempt = self.load_owned_attempt(attempt_id, user_id).await?;

        match attempt.status {
            AttemptStatus::SubmittedUngraded => {}
            AttemptStatus::Completed | AttemptStatus::Grading => {
                return Err(AppError::Conflict(format!(
                    "Quiz is already {}",
                    attempt.status
                )));
            }
            other => {
                return Err(AppError::BadRequest(format!(
                    "Only quizzes whose grading failed can be regraded (status is {})",
                    other
                )));
            }
        }

        let context = self.build_context(&attempt).await?;
        self.begin_grading(attempt_id, AttemptStatus::SubmittedUngraded)
            .await?;
        Ok(context)
    }

    /// Phase 2: scores every ungraded answer and finalizes the attempt.
    ///
    /// Never fails. If any answer is still unscored afterwards the attempt
    /// becomes `submitted_ungraded` and one `error` event is emitted.
    pub async fn execute_grading(&self, context: GradingContext, channel: &StreamChannel) {
        let total = context.items.len();
        channel.emit(StreamEvent::progress(format!("Grading {} answers...", total)));

        let mut scores: HashMap<i32, f64> = HashMap::with_capacity(total);
        let mut open_form = Vec::new();

        for item in &context.items {
            // Grades from an earlier pass are kept as they are.
            if let Some(score) = item.answer.score {
                scores.insert(item.question.question_number, score);
                channel.emit(StreamEvent::Graded {
                    data: GradedAnswer {
                        question_number: item.question.question_number,
                        score,
                        is_correct: score == 1.0,
                        feedback: item.answer.feedback.clone(),
                    },
                });
                continue;
            }

            match &item.question.prompt {
                QuestionPrompt::MultipleChoice { .. } => {
                    let answer = item.answer.user_answer.as_deref().unwrap_or_default();
                    let correct = is_closed_form_match(answer, &item.question.correct_answer);
                    let grade = AnswerGrade::new(
                        if correct { 1.0 } else { 0.0 },
                        Some(item.question.explanation.clone()),
                    );
                    self.store_grade(item, grade, channel, &mut scores).await;
                }
                QuestionPrompt::FreeText { .. } => open_form.push(item),
            }
        }

        if !open_form.is_empty() {
            self.grade_open_form(&context, &open_form, channel, &mut scores)
                .await;
        }

        let ungraded = total - scores.len();
        if ungraded > 0 {
            tracing::warn!(
                "Attempt {} left with {} of {} answers ungraded",
                context.attempt_id,
                ungraded,
                total
            );
            self.mark_ungraded(context.attempt_id).await;
            channel.emit(StreamEvent::error(format!(
                "{} of {} answers could not be graded. Your answers are saved; please retry grading.",
                ungraded, total
            )));
            return;
        }

        let score = aggregate_score(scores.values().copied(), total);
        if let Err(e) = self.attempts.complete_attempt(context.attempt_id, score).await {
            tracing::error!("Failed to complete attempt {}: {}", context.attempt_id, e);
            self.mark_ungraded(context.attempt_id).await;
            channel.emit(StreamEvent::error(
                "Your answers were graded but the result could not be saved. Please retry grading.",
            ));
            return;
        }

        channel.emit(StreamEvent::Complete {
            data: CompletionData {
                quiz_attempt_id: context.attempt_id,
                score: Some(score),
            },
        });
    }

    /// One model call for all free-text answers, whatever their number.
    async fn grade_open_form(
        &self,
        context: &GradingContext,
        items: &[&GradingItem],
        channel: &StreamChannel,
        scores: &mut HashMap<i32, f64>,
    ) {
        let schema = GradingSchema {
            expected: items.iter().map(|i| i.question.question_number).collect(),
        };
        let submissions: Vec<FreeTextSubmission<'_>> = items
            .iter()
            .map(|item| FreeTextSubmission {
                question_number: item.question.question_number,
                question_text: item.question.prompt.text(),
                reference_answer: &item.question.correct_answer,
                user_answer: item.answer.user_answer.as_deref().unwrap_or_default(),
            })
            .collect();
        let prompt = grading_prompt(&context.subject, &submissions, &schema);

        let results = match self.client.complete(&prompt, &schema).await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(
                    "Free-text grading failed for attempt {}: {}",
                    context.attempt_id,
                    e
                );
                return;
            }
        };

        let by_number: HashMap<i32, &GradingItem> = items
            .iter()
            .map(|item| (item.question.question_number, *item))
            .collect();

        for result in results {
            if let Some(item) = by_number.get(&result.question_number) {
                let grade = AnswerGrade::new(result.score, result.feedback);
                self.store_grade(item, grade, channel, scores).await;
            }
        }
    }

    /// Persists a grade, then streams it. A failed write leaves the answer
    /// unscored, which later routes the attempt to `submitted_ungraded`.
    async fn store_grade(
        &self,
        item: &GradingItem,
        grade: AnswerGrade,
        channel: &StreamChannel,
        scores: &mut HashMap<i32, f64>,
    ) {
        let question_number = item.question.question_number;
        if let Err(e) = self.attempts.record_grade(item.answer.id, &grade).await {
            tracing::error!(
                "Failed to store grade for question {} of attempt {}: {}",
                question_number,
                item.question.attempt_id,
                e
            );
            return;
        }

        scores.insert(question_number, grade.score);
        channel.emit(StreamEvent::Graded {
            data: GradedAnswer {
                question_number,
                score: grade.score,
                is_correct: grade.is_correct(),
                feedback: grade.feedback,
            },
        });
    }

    async fn mark_ungraded(&self, attempt_id: i64) {
        match self
            .attempts
            .transition_status(attempt_id, AttemptStatus::Grading, AttemptStatus::SubmittedUngraded)
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "Attempt {} was not in grading when marking it ungraded",
                attempt_id
            ),
            Err(e) => tracing::error!("Failed to mark attempt {} ungraded: {}", attempt_id, e),
        }
    }

    /// Hands a rejected submission back to the taker.
    async fn reopen(&self, attempt_id: i64) {
        if let Err(e) = self
            .attempts
            .transition_status(attempt_id, AttemptStatus::Grading, AttemptStatus::InProgress)
            .await
        {
            tracing::error!("Failed to reopen attempt {}: {}", attempt_id, e);
        }
    }

    async fn begin_grading(&self, attempt_id: i64, from: AttemptStatus) -> Result<(), AppError> {
        if !self
            .attempts
            .transition_status(attempt_id, from, AttemptStatus::Grading)
            .await?
        {
            return Err(AppError::Conflict("Quiz is already being graded".to_string()));
        }
        Ok(())
    }

    async fn load_owned_attempt(
        &self,
        attempt_id: i64,
        user_id: i64,
    ) -> Result<QuizAttempt, AppError> {
        let attempt = self
            .attempts
            .get_attempt(attempt_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Quiz not found".to_string()))?;

        if attempt.user_id != user_id {
            return Err(AppError::Forbidden(
                "You do not have access to this quiz".to_string(),
            ));
        }
        Ok(attempt)
    }

    async fn build_context(&self, attempt: &QuizAttempt) -> Result<GradingContext, AppError> {
        let subject = self
            .sessions
            .get_session_owner(attempt.session_id)
            .await?
            .map(|session| session.subject)
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        let questions = self.attempts.list_questions(attempt.id).await?;
        let mut answers: HashMap<i64, Answer> = self
            .attempts
            .list_answers(attempt.id)
            .await?
            .into_iter()
            .map(|answer| (answer.question_id, answer))
            .collect();

        let items = questions
            .into_iter()
            .map(|question| {
                let answer = answers.remove(&question.id).ok_or_else(|| {
                    AppError::InternalServerError(format!(
                        "Question {} has no answer row",
                        question.id
                    ))
                })?;
                Ok(GradingItem { question, answer })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(GradingContext {
            attempt_id: attempt.id,
            subject,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_form_match_ignores_case_and_surrounding_whitespace() {
        assert!(is_closed_form_match("  TypeScript ", "TypeScript"));
        assert!(is_closed_form_match("typescript", "TypeScript"));
        assert!(!is_closed_form_match("Type Script", "TypeScript"));
        assert!(!is_closed_form_match("", "TypeScript"));
    }

    #[test]
    fn aggregate_is_percentage_of_question_count() {
        assert_eq!(aggregate_score([1.0], 1), 100.0);
        assert_eq!(aggregate_score([1.0, 0.5, 0.0, 0.5], 4), 50.0);
        assert_eq!(aggregate_score([], 0), 0.0);
    }
}
