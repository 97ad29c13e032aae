// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{handlers::quiz, state::AppState, utils::jwt::auth_middleware};

/// Assembles the main application router.
///
/// * Every quiz route sits behind the auth middleware.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let quiz_routes = Router::new()
        .route("/sessions/{session_id}/quizzes", post(quiz::generate_quiz))
        .route("/quizzes/{attempt_id}", get(quiz::get_quiz))
        .route(
            "/quizzes/{attempt_id}/answers/{question_id}",
            put(quiz::save_answer),
        )
        .route("/quizzes/{attempt_id}/submit", post(quiz::submit_quiz))
        .route("/quizzes/{attempt_id}/regrade", post(quiz::regrade_quiz))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", quiz_routes)
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
