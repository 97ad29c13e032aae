// src/repository/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, types::Json};

use crate::error::AppError;
use crate::models::{
    answer::{Answer, AnswerGrade},
    question::{NewQuestion, Question, QuestionRecord},
    quiz_attempt::{AttemptStatus, NewAttempt, QuizAttempt},
    session::SessionOwner,
};
use crate::repository::{
    AnswerWrite, AttemptRepository, MaterialProvider, SessionProvider, SweepReport,
};

/// Postgres-backed implementation of every persistence seam.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionProvider for PgStore {
    async fn get_session_owner(&self, session_id: i64) -> Result<Option<SessionOwner>, AppError> {
        sqlx::query_as::<_, SessionOwner>(
            "SELECT user_id AS owner_id, subject, goal FROM study_sessions WHERE id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load session {}: {:?}", session_id, e);
            AppError::from(e)
        })
    }
}

#[async_trait]
impl MaterialProvider for PgStore {
    async fn list_ready_material_texts(&self, session_id: i64) -> Result<Vec<String>, AppError> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT extracted_text
            FROM materials
            WHERE session_id = $1
              AND status = 'ready'
              AND extracted_text IS NOT NULL
              AND extracted_text <> ''
            ORDER BY created_at, id
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load materials for session {}: {:?}", session_id, e);
            AppError::from(e)
        })
    }
}

#[async_trait]
impl AttemptRepository for PgStore {
    async fn find_generating_attempt(&self, session_id: i64) -> Result<Option<i64>, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM quiz_attempts WHERE session_id = $1 AND status = 'generating' LIMIT 1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn create_attempt(&self, attempt: &NewAttempt) -> Result<QuizAttempt, AppError> {
        sqlx::query_as::<_, QuizAttempt>(
            r#"
            INSERT INTO quiz_attempts
                (session_id, user_id, difficulty, answer_format, requested_count, used_materials, status)
            VALUES ($1, $2, $3, $4, $5, $6, 'generating')
            RETURNING
                id, session_id, user_id, difficulty, answer_format, requested_count,
                question_count, used_materials, status, score, started_at, completed_at, created_at
            "#,
        )
        .bind(attempt.session_id)
        .bind(attempt.user_id)
        .bind(attempt.difficulty.as_str())
        .bind(attempt.answer_format.as_str())
        .bind(attempt.requested_count)
        .bind(attempt.used_materials)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            // The partial unique index backs the query-then-insert guard.
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return AppError::Conflict(
                        "A quiz is already being generated for this session".to_string(),
                    );
                }
            }
            tracing::error!("Failed to create quiz attempt: {:?}", e);
            AppError::from(e)
        })
    }

    async fn insert_question(
        &self,
        attempt_id: i64,
        question: &NewQuestion,
    ) -> Result<Question, AppError> {
        let mut tx = self.pool.begin().await?;

        let record = sqlx::query_as::<_, QuestionRecord>(
            r#"
            INSERT INTO questions
                (attempt_id, question_number, type, question_text, options,
                 correct_answer, explanation, difficulty, concept_tags)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING
                id, attempt_id, question_number, type, question_text, options,
                correct_answer, explanation, difficulty, concept_tags
            "#,
        )
        .bind(attempt_id)
        .bind(question.question_number)
        .bind(question.prompt.question_type().as_str())
        .bind(question.prompt.text())
        .bind(question.prompt.options().map(|o| Json(o.to_vec())))
        .bind(&question.correct_answer)
        .bind(&question.explanation)
        .bind(question.difficulty.as_str())
        .bind(Json(question.concept_tags.clone()))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO answers (question_id, attempt_id) VALUES ($1, $2)")
            .bind(record.id)
            .bind(attempt_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Question::try_from(record)
    }

    async fn finish_generation(
        &self,
        attempt_id: i64,
        question_count: i32,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = 'in_progress', question_count = $2, status_changed_at = NOW()
            WHERE id = $1 AND status = 'generating'
            "#,
        )
        .bind(attempt_id)
        .bind(question_count)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Attempt {} is no longer generating",
                attempt_id
            )));
        }
        Ok(())
    }

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<QuizAttempt>, AppError> {
        let attempt = sqlx::query_as::<_, QuizAttempt>(
            r#"
            SELECT
                id, session_id, user_id, difficulty, answer_format, requested_count,
                question_count, used_materials, status, score, started_at, completed_at, created_at
            FROM quiz_attempts
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    async fn list_questions(&self, attempt_id: i64) -> Result<Vec<Question>, AppError> {
        let records = sqlx::query_as::<_, QuestionRecord>(
            r#"
            SELECT
                id, attempt_id, question_number, type, question_text, options,
                correct_answer, explanation, difficulty, concept_tags
            FROM questions
            WHERE attempt_id = $1
            ORDER BY question_number
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(Question::try_from).collect()
    }

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<Answer>, AppError> {
        let answers = sqlx::query_as::<_, Answer>(
            r#"
            SELECT
                a.id, a.question_id, a.attempt_id, a.user_answer, a.submitted_at,
                a.score, a.is_correct, a.feedback, a.graded_at
            FROM answers a
            JOIN questions q ON q.id = a.question_id
            WHERE a.attempt_id = $1
            ORDER BY q.question_number
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(answers)
    }

    async fn save_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        text: &str,
    ) -> Result<AnswerWrite, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE answers
            SET user_answer = $3, submitted_at = NOW()
            WHERE attempt_id = $1 AND question_id = $2
              AND EXISTS (
                  SELECT 1 FROM quiz_attempts WHERE id = $1 AND status = 'in_progress'
              )
            "#,
        )
        .bind(attempt_id)
        .bind(question_id)
        .bind(text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(AnswerWrite::Saved);
        }

        let known = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM answers WHERE attempt_id = $1 AND question_id = $2)",
        )
        .bind(attempt_id)
        .bind(question_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(if known {
            AnswerWrite::Locked
        } else {
            AnswerWrite::UnknownQuestion
        })
    }

    async fn transition_status(
        &self,
        attempt_id: i64,
        from: AttemptStatus,
        to: AttemptStatus,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = $3, status_changed_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(attempt_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_grade(&self, answer_id: i64, grade: &AnswerGrade) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE answers
            SET score = $2, is_correct = $3, feedback = $4, graded_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(answer_id)
        .bind(grade.score)
        .bind(grade.is_correct())
        .bind(grade.feedback.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_attempt(&self, attempt_id: i64, score: f64) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = 'completed', score = $2, completed_at = NOW(), status_changed_at = NOW()
            WHERE id = $1 AND status = 'grading'
            "#,
        )
        .bind(attempt_id)
        .bind(score)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Attempt {} is not being graded",
                attempt_id
            )));
        }
        Ok(())
    }

    async fn sweep_stale_attempts(&self, cutoff: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let mut tx = self.pool.begin().await?;

        let resumed = sqlx::query(
            r#"
            UPDATE quiz_attempts a
            SET status = 'in_progress',
                status_changed_at = NOW(),
                question_count = (SELECT COUNT(*) FROM questions q WHERE q.attempt_id = a.id)
            WHERE a.status = 'generating'
              AND a.created_at < $1
              AND EXISTS (SELECT 1 FROM questions q WHERE q.attempt_id = a.id)
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = 'failed', status_changed_at = NOW()
            WHERE status = 'generating' AND created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // Grading that outlived the cutoff belongs to a process that went away.
        let ungraded = sqlx::query(
            r#"
            UPDATE quiz_attempts
            SET status = 'submitted_ungraded', status_changed_at = NOW()
            WHERE status = 'grading' AND status_changed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        Ok(SweepReport {
            resumed,
            failed,
            ungraded,
        })
    }
}
