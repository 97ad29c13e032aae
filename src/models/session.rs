// src/models/session.rs

use sqlx::FromRow;

/// Ownership and topic of a study session, as exposed by the session provider.
#[derive(Debug, Clone, FromRow)]
pub struct SessionOwner {
    pub owner_id: i64,
    pub subject: String,
    pub goal: Option<String>,
}
