// src/services/reconcile.rs

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::{
    error::AppError,
    repository::{AttemptRepository, SweepReport},
};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Settles attempts left behind by a run that never finished.
///
/// Attempts `generating` for longer than `stale_after` become `in_progress`
/// when they have persisted questions and `failed` otherwise, which releases
/// the session for a new generation. Attempts in `grading` for that long
/// become `submitted_ungraded` so the taker can ask for a regrade.
pub async fn sweep_stale_attempts(
    attempts: &dyn AttemptRepository,
    stale_after: chrono::Duration,
) -> Result<SweepReport, AppError> {
    let cutoff = Utc::now() - stale_after;
    let report = attempts.sweep_stale_attempts(cutoff).await?;

    if report != SweepReport::default() {
        tracing::info!(
            "Stale attempt sweep: {} resumed, {} failed, {} left ungraded",
            report.resumed,
            report.failed,
            report.ungraded
        );
    }
    Ok(report)
}

/// Runs the sweep once a minute for the lifetime of the process.
pub fn spawn_sweeper(attempts: Arc<dyn AttemptRepository>, stale_after_minutes: i64) -> JoinHandle<()> {
    let stale_after = chrono::Duration::minutes(stale_after_minutes);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = sweep_stale_attempts(attempts.as_ref(), stale_after).await {
                tracing::error!("Stale attempt sweep failed: {}", e);
            }
        }
    })
}
