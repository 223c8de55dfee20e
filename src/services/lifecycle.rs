// src/services/lifecycle.rs

use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::watch;
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PredictionStatus {
    Draft,
    Scheduled,
    Active,
    Closed,
    Resolved,
}

impl PredictionStatus {
    pub const ALL: [PredictionStatus; 5] = [
        PredictionStatus::Draft,
        PredictionStatus::Scheduled,
        PredictionStatus::Active,
        PredictionStatus::Closed,
        PredictionStatus::Resolved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionStatus::Draft => "draft",
            PredictionStatus::Scheduled => "scheduled",
            PredictionStatus::Active => "active",
            PredictionStatus::Closed => "closed",
            PredictionStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PredictionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown prediction status '{}'", s)))
    }
}

/// How a prediction collects votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DisplayTemplate {
    /// Pick exactly one option; one vote per user per prediction.
    Standard,
    /// Answer yes or no on every option; one vote per user per option.
    MultiYesNo,
}

impl DisplayTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayTemplate::Standard => "standard",
            DisplayTemplate::MultiYesNo => "multi_yes_no",
        }
    }
}

impl FromStr for DisplayTemplate {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(DisplayTemplate::Standard),
            "multi_yes_no" => Ok(DisplayTemplate::MultiYesNo),
            other => Err(AppError::BadRequest(format!(
                "Unknown display template '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoteSide {
    Yes,
    No,
}

impl VoteSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteSide::Yes => "yes",
            VoteSide::No => "no",
        }
    }
}

impl FromStr for VoteSide {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(VoteSide::Yes),
            "no" => Ok(VoteSide::No),
            other => Err(AppError::BadRequest(format!("Unknown vote side '{}'", other))),
        }
    }
}

/// The status a prediction is in at `now`, taking its schedule into account.
///
/// The stored status lags behind the clock until the sweeper catches up, so
/// every read path goes through this.
pub fn effective_status(
    stored: PredictionStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> PredictionStatus {
    match stored {
        PredictionStatus::Scheduled | PredictionStatus::Active if end_time <= now => {
            PredictionStatus::Closed
        }
        PredictionStatus::Scheduled if start_time.is_none_or(|start| start <= now) => {
            PredictionStatus::Active
        }
        other => other,
    }
}

pub fn accepts_votes(
    stored: PredictionStatus,
    start_time: Option<DateTime<Utc>>,
    end_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    effective_status(stored, start_time, end_time, now) == PredictionStatus::Active
}

/// Validates an admin-requested status change.
/// Resolution has its own operation and is rejected here.
pub fn check_transition(from: PredictionStatus, to: PredictionStatus) -> Result<(), AppError> {
    use PredictionStatus::*;

    if from == to {
        return Ok(());
    }

    let allowed = matches!(
        (from, to),
        (Draft, Scheduled)
            | (Draft, Active)
            | (Scheduled, Draft)
            | (Scheduled, Active)
            | (Active, Closed)
            | (Closed, Active)
    );

    if allowed {
        Ok(())
    } else if to == Resolved {
        Err(AppError::BadRequest(
            "Use the resolve operation to resolve a prediction".to_string(),
        ))
    } else {
        Err(AppError::BadRequest(format!(
            "Cannot move a prediction from {} to {}",
            from, to
        )))
    }
}

/// Resolution is allowed once voting has started.
pub fn can_resolve(effective: PredictionStatus) -> bool {
    matches!(effective, PredictionStatus::Active | PredictionStatus::Closed)
}

/// Whether a vote turned out right once `winning_option_id` is known.
///
/// A plain vote is right when it picked the winner. In the yes/no template a
/// "yes" is right on the winner and a "no" is right on every other option.
pub fn is_vote_correct(side: Option<VoteSide>, option_id: i64, winning_option_id: i64) -> bool {
    match side {
        None | Some(VoteSide::Yes) => option_id == winning_option_id,
        Some(VoteSide::No) => option_id != winning_option_id,
    }
}

/// Moves stored statuses forward to match the clock.
/// Returns (activated, closed) row counts.
pub async fn sweep_statuses(pool: &PgPool) -> Result<(u64, u64), sqlx::Error> {
    let closed = sqlx::query(
        r#"
        UPDATE predictions
        SET status = 'closed', updated_at = NOW()
        WHERE status IN ('scheduled', 'active') AND end_time <= NOW()
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();

    let activated = sqlx::query(
        r#"
        UPDATE predictions
        SET status = 'active', updated_at = NOW()
        WHERE status = 'scheduled' AND (start_time IS NULL OR start_time <= NOW())
        "#,
    )
    .execute(pool)
    .await?
    .rows_affected();

    Ok((activated, closed))
}

/// Delay before the next sweep, doubling after each consecutive failure up to 8x.
pub fn next_sweep_delay(period: Duration, consecutive_failures: u32) -> Duration {
    period * 2u32.pow(consecutive_failures.min(3))
}

/// Runs [`sweep_statuses`] every `period` until `shutdown` flips to true.
pub fn spawn_status_sweeper(
    pool: PgPool,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut failures = 0u32;
        loop {
            let delay = next_sweep_delay(period, failures);
            let sender_gone = tokio::select! {
                _ = tokio::time::sleep(delay) => false,
                changed = shutdown.changed() => changed.is_err(),
            };
            if sender_gone || *shutdown.borrow() {
                tracing::info!("Status sweeper stopped");
                break;
            }

            match sweep_statuses(&pool).await {
                Ok((activated, closed)) => {
                    failures = 0;
                    if activated + closed > 0 {
                        tracing::info!(activated, closed, "Prediction statuses swept");
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!("Status sweep failed (attempt {}): {}", failures, e);
                }
            }
        }
    })
}
