// src/handlers/quiz.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        answer::{SaveAnswerRequest, SubmitQuizRequest},
        quiz_attempt::{AttemptStatus, GenerateQuizRequest, QuizAttempt},
        quiz_view::QuizDetail,
    },
    repository::AnswerWrite,
    services::{
        grading::GradingContext,
        stream::{StreamChannel, sse_response},
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Generates a quiz for a study session and streams it question by question.
///
/// Precondition failures (missing or foreign session, generation already
/// running, invalid body) come back as plain JSON errors. Everything after
/// that is reported on the event stream.
pub async fn generate_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<i64>,
    Json(payload): Json<GenerateQuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    let user_id = claims.user_id()?;

    let params = state
        .generation
        .prepare(session_id, user_id, &payload)
        .await?;

    tracing::info!(
        "User {} generating {} questions for session {}",
        user_id,
        params.question_count,
        session_id
    );

    let (channel, events) = StreamChannel::open(state.config.stream_deadline());
    let service = state.generation.clone();
    tokio::spawn(async move {
        service.execute(params, &channel).await;
    });

    Ok(sse_response(events))
}

/// Polling view of an attempt. Solutions stay hidden until grading is over.
pub async fn get_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = load_owned_attempt(&state, attempt_id, claims.user_id()?).await?;

    let questions = state.attempts.list_questions(attempt_id).await?;
    let answers = state.attempts.list_answers(attempt_id).await?;

    Ok(Json(QuizDetail::build(attempt, &questions, answers)))
}

/// Saves a draft answer while the quiz is being taken.
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((attempt_id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let attempt = load_owned_attempt(&state, attempt_id, claims.user_id()?).await?;
    match attempt.status {
        AttemptStatus::InProgress => {}
        AttemptStatus::Grading | AttemptStatus::Completed => {
            return Err(AppError::Conflict(
                "Answers can no longer be changed".to_string(),
            ));
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "Answers cannot be saved while the quiz is {}",
                other
            )));
        }
    }

    match state
        .attempts
        .save_answer(attempt_id, question_id, &payload.answer)
        .await?
    {
        AnswerWrite::Saved => Ok(StatusCode::NO_CONTENT),
        AnswerWrite::UnknownQuestion => Err(AppError::NotFound("Question not found".to_string())),
        // Submitted between the status read above and the write.
        AnswerWrite::Locked => Err(AppError::Conflict(
            "Answers can no longer be changed".to_string(),
        )),
    }
}

/// Submits an attempt and streams the grading.
pub async fn submit_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    payload: Option<Json<SubmitQuizRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    payload
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let context = state
        .grading
        .prepare_grading(attempt_id, claims.user_id()?, &payload.answers)
        .await?;

    tracing::info!("Grading attempt {}", attempt_id);
    Ok(stream_grading(state, context))
}

/// Re-runs grading for an attempt whose previous grading did not finish.
pub async fn regrade_quiz(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let context = state
        .grading
        .prepare_regrade(attempt_id, claims.user_id()?)
        .await?;

    tracing::info!("Regrading attempt {}", attempt_id);
    Ok(stream_grading(state, context))
}

fn stream_grading(state: AppState, context: GradingContext) -> impl IntoResponse {
    let (channel, events) = StreamChannel::open(state.config.stream_deadline());
    let service = state.grading;
    tokio::spawn(async move {
        service.execute_grading(context, &channel).await;
    });

    sse_response(events)
}

async fn load_owned_attempt(
    state: &AppState,
    attempt_id: i64,
    user_id: i64,
) -> Result<QuizAttempt, AppError> {
    let attempt = state
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
