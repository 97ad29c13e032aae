// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    llm::{CompletionProvider, StructuredOutputClient},
    repository::{AttemptRepository, MaterialProvider, SessionProvider},
    services::{GenerationService, GradingService},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub attempts: Arc<dyn AttemptRepository>,
    pub generation: GenerationService,
    pub grading: GradingService,
}

impl AppState {
    /// Wires the orchestrators onto the given persistence seams and provider.
    pub fn new(
        config: Config,
        attempts: Arc<dyn AttemptRepository>,
        sessions: Arc<dyn SessionProvider>,
        materials: Arc<dyn MaterialProvider>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        let client = StructuredOutputClient::new(provider);

        Self {
            generation: GenerationService::new(
                Arc::clone(&attempts),
                Arc::clone(&sessions),
                materials,
                client.clone(),
            ),
            grading: GradingService::new(Arc::clone(&attempts), sessions, client),
            attempts,
            config,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
