// src/services/generation.rs

use std::sync::Arc;

use crate::{
    error::AppError,
    llm::{
        StructuredOutputClient,
        prompts::{QuizBrief, generation_prompt},
        schema::{GeneratedQuestion, QuestionSchema},
    },
    models::{
        event::{CompletionData, StreamEvent},
        question::PublicQuestion,
        quiz_attempt::{AnswerFormat, Difficulty, GenerateQuizRequest, NewAttempt},
    },
    repository::{AttemptRepository, MaterialProvider, SessionProvider},
    services::stream::StreamChannel,
};

/// Everything phase 2 needs, resolved by `prepare`.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub session_id: i64,
    pub user_id: i64,
    pub subject: String,
    pub goal: Option<String>,
    pub difficulty: Difficulty,
    pub answer_format: AnswerFormat,
    pub question_count: u32,
    /// Ready materials joined by a blank line; empty when there are none.
    pub material_context: String,
}

impl GenerationParams {
    pub fn used_materials(&self) -> bool {
        !self.material_context.is_empty()
    }

    fn brief(&self) -> QuizBrief<'_> {
        QuizBrief {
            subject: &self.subject,
            goal: self.goal.as_deref(),
            difficulty: self.difficulty,
            answer_format: self.answer_format,
            question_count: self.question_count,
            material_context: &self.material_context,
        }
    }
}

/// Turns a quiz request into streamed questions and persisted rows.
#[derive(Clone)]
pub struct GenerationService {
    attempts: Arc<dyn AttemptRepository>,
    sessions: Arc<dyn SessionProvider>,
    materials: Arc<dyn MaterialProvider>,
    client: StructuredOutputClient,
}

impl GenerationService {
    pub fn new(
        attempts: Arc<dyn AttemptRepository>,
        sessions: Arc<dyn SessionProvider>,
        materials: Arc<dyn MaterialProvider>,
        client: StructuredOutputClient,
    ) -> Self {
        Self {
            attempts,
            sessions,
            materials,
            client,
        }
    }

    /// Phase 1: precondition checks, before any stream is opened.
    ///
    /// The generating-attempt check is query-then-insert; the partial unique
    /// index on `quiz_attempts` closes the remaining race at insert time.
    pub async fn prepare(
        &self,
        session_id: i64,
        user_id: i64,
        request: &GenerateQuizRequest,
    ) -> Result<GenerationParams, AppError> {
        let session = self
            .sessions
            .get_session_owner(session_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        if session.owner_id != user_id {
            return Err(AppError::Forbidden(
                "You do not have access to this session".to_string(),
            ));
        }

        if let Some(existing) = self.attempts.find_generating_attempt(session_id).await? {
            return Err(AppError::Conflict(format!(
                "Quiz {} is already being generated for this session",
                existing
            )));
        }

        let material_context = self
            .materials
            .list_ready_material_texts(session_id)
            .await?
            .join("\n\n");

        Ok(GenerationParams {
            session_id,
            user_id,
            subject: session.subject,
            goal: session.goal,
            difficulty: request.difficulty,
            answer_format: request.answer_format,
            question_count: request.question_count,
            material_context,
        })
    }

    /// Phase 2: runs the generation and reports everything through `channel`.
    ///
    /// Never fails; every error path ends in one `error` event and a log record.
    pub async fn execute(&self, params: GenerationParams, channel: &StreamChannel) {
        let new_attempt = NewAttempt {
            session_id: params.session_id,
            user_id: params.user_id,
            difficulty: params.difficulty,
            answer_format: params.answer_format,
            requested_count: params.question_count as i32,
            used_materials: params.used_materials(),
        };

        let attempt = match self.attempts.create_attempt(&new_attempt).await {
            Ok(attempt) => attempt,
            Err(e) => {
                tracing::error!(
                    "Failed to open quiz attempt for session {}: {}",
                    params.session_id,
                    e
                );
                let message = match e {
                    AppError::Conflict(msg) => msg,
                    _ => "Could not start quiz generation. Please try again.".to_string(),
                };
                channel.emit(StreamEvent::error(message));
                return;
            }
        };

        channel.emit(StreamEvent::progress(format!(
            "Generating {} questions...",
            params.question_count
        )));

        let schema = QuestionSchema {
            answer_format: params.answer_format,
            max_items: params.question_count as usize,
        };
        let prompt = generation_prompt(&params.brief(), &schema);

        let generated = match self.client.complete(&prompt, &schema).await {
            Ok(questions) => questions,
            Err(e) => {
                // The attempt stays in `generating` until the stale sweep picks it up.
                tracing::error!("Quiz generation failed for attempt {}: {}", attempt.id, e);
                channel.emit(StreamEvent::error(e.user_message()));
                return;
            }
        };

        let mut produced: i32 = 0;
        let mut interrupted = false;
        for question in generated {
            let number = produced + 1;
            match self
                .record_question(attempt.id, number, question, params.difficulty, channel)
                .await
            {
                Ok(()) => produced = number,
                Err(e) => {
                    tracing::error!(
                        "Failed to persist question {} of attempt {}: {}",
                        number,
                        attempt.id,
                        e
                    );
                    interrupted = true;
                    break;
                }
            }
        }

        if produced > 0 {
            if let Err(e) = self.attempts.finish_generation(attempt.id, produced).await {
                tracing::error!("Failed to finalize attempt {}: {}", attempt.id, e);
                channel.emit(StreamEvent::error(
                    "Could not finish saving the quiz. Please refresh.",
                ));
                return;
            }
        }

        if interrupted {
            channel.emit(StreamEvent::error(format!(
                "Quiz generation stopped after {} questions. Please try again.",
                produced
            )));
            return;
        }

        if produced < params.question_count as i32 {
            tracing::info!(
                "Attempt {} produced {} of {} requested questions",
                attempt.id,
                produced,
                params.question_count
            );
        }

        channel.emit(StreamEvent::Complete {
            data: CompletionData {
                quiz_attempt_id: attempt.id,
                score: None,
            },
        });
    }

    /// Persists one question (with its empty answer), then streams its
    /// taker-safe projection. The event for question k never precedes its row.
    async fn record_question(
        &self,
        attempt_id: i64,
        question_number: i32,
        question: GeneratedQuestion,
        difficulty: Difficulty,
        channel: &StreamChannel,
    ) -> Result<(), AppError> {
        let new_question = question.into_new_question(question_number, difficulty);
        let stored = self.attempts.insert_question(attempt_id, &new_question).await?;

        channel.emit(StreamEvent::Item {
            data: PublicQuestion::from(&stored),
        });
        Ok(())
    }
}
