// src/repository/mod.rs

//! Persistence seams used by the orchestrators.
//!
//! `PgStore` implements all three traits against Postgres; tests substitute
//! in-memory implementations.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{
    answer::{Answer, AnswerGrade},
    question::{NewQuestion, Question},
    quiz_attempt::{AttemptStatus, NewAttempt, QuizAttempt},
    session::SessionOwner,
};

pub use postgres::PgStore;

/// Ownership/session lookup, owned by the session collaborator.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// `None` when the session does not exist.
    async fn get_session_owner(&self, session_id: i64) -> Result<Option<SessionOwner>, AppError>;
}

/// Extracted text of study materials that finished processing.
#[async_trait]
pub trait MaterialProvider: Send + Sync {
    async fn list_ready_material_texts(&self, session_id: i64) -> Result<Vec<String>, AppError>;
}

/// Outcome of the stale-attempt sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Stale generating attempts with at least one question, moved to `in_progress`.
    pub resumed: u64,
    /// Stale generating attempts without questions, moved to `failed`.
    pub failed: u64,
    /// Attempts stuck in `grading`, moved to `submitted_ungraded`.
    pub ungraded: u64,
}

/// Outcome of writing a taker's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerWrite {
    Saved,
    /// The question does not belong to the attempt.
    UnknownQuestion,
    /// The attempt has left `in_progress`; answers are frozen.
    Locked,
}

/// Durable storage for attempts, questions and answers.
#[async_trait]
pub trait AttemptRepository: Send + Sync {
    /// Id of the attempt currently `generating` for the session, if any.
    async fn find_generating_attempt(&self, session_id: i64) -> Result<Option<i64>, AppError>;

    /// Inserts an attempt in `generating`. Fails with `Conflict` when another
    /// attempt of the session is already generating.
    async fn create_attempt(&self, attempt: &NewAttempt) -> Result<QuizAttempt, AppError>;

    /// Inserts a question together with its empty answer row.
    async fn insert_question(
        &self,
        attempt_id: i64,
        question: &NewQuestion,
    ) -> Result<Question, AppError>;

    /// Moves a `generating` attempt to `in_progress` with the produced count.
    async fn finish_generation(&self, attempt_id: i64, question_count: i32)
    -> Result<(), AppError>;

    async fn get_attempt(&self, attempt_id: i64) -> Result<Option<QuizAttempt>, AppError>;

    /// Questions ordered by question number.
    async fn list_questions(&self, attempt_id: i64) -> Result<Vec<Question>, AppError>;

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<Answer>, AppError>;

    /// Stores the taker's text for one question. The write only lands while
    /// the attempt is `in_progress`, checked in the same statement.
    async fn save_answer(
        &self,
        attempt_id: i64,
        question_id: i64,
        text: &str,
    ) -> Result<AnswerWrite, AppError>;

    /// Compare-and-set status change. Returns `false` if the attempt was not in `from`.
    async fn transition_status(
        &self,
        attempt_id: i64,
        from: AttemptStatus,
        to: AttemptStatus,
    ) -> Result<bool, AppError>;

    /// Writes score, derived correctness and feedback in one update.
    async fn record_grade(&self, answer_id: i64, grade: &AnswerGrade) -> Result<(), AppError>;

    /// Moves a `grading` attempt to `completed` with its aggregate score.
    async fn complete_attempt(&self, attempt_id: i64, score: f64) -> Result<(), AppError>;

    /// Reconciles attempts stuck in `generating` since before `cutoff` and
    /// attempts that entered `grading` before `cutoff`.
    async fn sweep_stale_attempts(&self, cutoff: DateTime<Utc>)
    -> Result<SweepReport, AppError>;
}
