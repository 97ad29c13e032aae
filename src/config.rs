// src/config.rs

use std::env;
use std::time::Duration;

use dotenvy::dotenv;

/// Bounds for the number of questions a single generation may request.
pub const MIN_QUESTION_COUNT: u32 = 1;
pub const MAX_QUESTION_COUNT: u32 = 20;

/// Longest free-text answer accepted from the taker.
pub const MAX_ANSWER_LENGTH: u64 = 5000;

/// Settings for the OpenAI-compatible completion provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub server_port: u16,
    pub llm: LlmConfig,
    /// Soft deadline for a single event stream.
    pub stream_deadline_secs: u64,
    /// Age after which a `generating` or `grading` attempt is handed to the reconciliation sweep.
    pub stale_generation_minutes: i64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET")
            .expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG")
            .unwrap_or_else(|_| "info".to_string());

        let llm = LlmConfig {
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: env::var("LLM_API_KEY").expect("LLM_API_KEY must be set"),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: parse_or("LLM_TEMPERATURE", 0.4),
            timeout_secs: parse_or("LLM_TIMEOUT_SECS", 120),
        };

        Self {
            database_url,
            jwt_secret,
            rust_log,
            server_port: parse_or("SERVER_PORT", 3000),
            llm,
            stream_deadline_secs: parse_or("STREAM_DEADLINE_SECS", 240),
            stale_generation_minutes: parse_or("STALE_GENERATION_MINUTES", 15),
        }
    }

    pub fn stream_deadline(&self) -> Duration {
        Duration::from_secs(self.stream_deadline_secs)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
