// src/services/rank_service.rs

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use utoipa::ToSchema;

use crate::{
    config::{ACTIVITY_WINDOW_DAYS, MAX_REWIND_DAYS},
    error::AppError,
    services::rank_engine::{
        BreakdownItem, Rank, RankBlocker, UserStats, calculate_rank_percentage, evaluate_upgrade,
    },
};

/// Attempts of one recalculation before it gives up on a busy user.
const SAVE_ATTEMPTS: usize = 3;

/// Rank state written back after a recalculation.
#[derive(Debug, Clone, PartialEq)]
pub struct RankSnapshot {
    /// Rank and last recalculation time the stats were loaded with. The save
    /// only applies while the stored row still has both.
    pub expected_rank: Rank,
    pub expected_updated_at: Option<DateTime<Utc>>,
    pub rank: Rank,
    pub percentage: u32,
    pub total_predictions: i64,
    pub total_resolved_predictions: i64,
    pub correct_predictions: i64,
    pub accuracy_rate: f64,
    pub weekly_activity_count: i64,
    pub rank_start_date: DateTime<Utc>,
    pub recalculated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankUpgrade {
    pub from_rank: Rank,
    pub to_rank: Rank,
    pub percentage_at_upgrade: u32,
    pub upgraded_at: DateTime<Utc>,
}

/// Where rank inputs come from and where results go.
#[async_trait]
pub trait RankStore: Send + Sync {
    async fn load_stats(&self, user_id: i64, now: DateTime<Utc>)
    -> Result<Option<UserStats>, AppError>;

    /// Persists the snapshot, and the upgrade when there is one, atomically.
    ///
    /// Returns `false` and writes nothing when the stored rank or recalculation
    /// time moved away from the expected ones, i.e. another recalculation got
    /// there first.
    async fn save_progress(
        &self,
        user_id: i64,
        snapshot: &RankSnapshot,
        upgrade: Option<&RankUpgrade>,
    ) -> Result<bool, AppError>;
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RankRecalculation {
    pub user_id: i64,
    pub rank: Rank,
    pub percentage: u32,
    pub breakdown: Vec<BreakdownItem>,
    pub eligible_for_upgrade: bool,
    pub next_rank: Option<Rank>,
    pub blockers: Vec<RankBlocker>,
    /// Set when this call moved the user up a tier.
    pub promoted_to: Option<Rank>,
    /// True when nothing was persisted (read-only view or cooldown).
    pub cached: bool,
}

fn assemble(
    user_id: i64,
    stats: &UserStats,
    now: DateTime<Utc>,
    promoted_to: Option<Rank>,
    cached: bool,
) -> RankRecalculation {
    let progress = calculate_rank_percentage(stats, now);
    let evaluation = evaluate_upgrade(stats, now);
    RankRecalculation {
        user_id,
        rank: stats.current_rank,
        percentage: progress.percentage,
        breakdown: progress.breakdown,
        eligible_for_upgrade: evaluation.eligible,
        next_rank: evaluation.next_rank,
        blockers: evaluation.blockers,
        promoted_to,
        cached,
    }
}

/// Computes the rank view from live stats without persisting anything.
pub async fn current_rank_view<S>(
    store: &S,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<RankRecalculation, AppError>
where
    S: RankStore + ?Sized,
{
    let stats = store
        .load_stats(user_id, now)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;
    Ok(assemble(user_id, &stats, now, None, true))
}

/// Recomputes a user's rank progress and promotes them when eligible.
///
/// Promotion moves exactly one tier and restarts the time-in-rank clock; a
/// user is never demoted. Without `force`, a call within `cooldown` of the
/// previous recalculation only reports the current view.
///
/// The save is conditional on the state that was read, so two concurrent
/// recalculations cannot overwrite each other; the loser starts over from
/// fresh stats.
pub async fn recalculate_user_rank<S>(
    store: &S,
    user_id: i64,
    force: bool,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Result<RankRecalculation, AppError>
where
    S: RankStore + ?Sized,
{
    for attempt in 1..=SAVE_ATTEMPTS {
        let mut stats = store
            .load_stats(user_id, now)
            .await?
            .ok_or(AppError::NotFound("User not found".to_string()))?;

        let throttled = !force
            && stats
                .rank_updated_at
                .is_some_and(|last| now - last < cooldown);
        if throttled {
            return Ok(assemble(user_id, &stats, now, None, true));
        }

        let expected_rank = stats.current_rank;
        let expected_updated_at = stats.rank_updated_at;

        let evaluation = evaluate_upgrade(&stats, now);
        let mut upgrade = None;
        if let (true, Some(next)) = (evaluation.eligible, evaluation.next_rank) {
            upgrade = Some(RankUpgrade {
                from_rank: stats.current_rank,
                to_rank: next,
                percentage_at_upgrade: calculate_rank_percentage(&stats, now).percentage,
                upgraded_at: now,
            });
            stats.current_rank = next;
            stats.current_rank_start_date = now;
        }

        let result = assemble(
            user_id,
            &stats,
            now,
            upgrade.as_ref().map(|u| u.to_rank),
            false,
        );

        let snapshot = RankSnapshot {
            expected_rank,
            expected_updated_at,
            rank: stats.current_rank,
            percentage: result.percentage,
            total_predictions: stats.total_predictions,
            total_resolved_predictions: stats.total_resolved_predictions,
            correct_predictions: stats.correct_predictions,
            accuracy_rate: stats.accuracy_rate(),
            weekly_activity_count: stats.weekly_activity_count,
            rank_start_date: stats.current_rank_start_date,
            recalculated_at: now,
        };
        if !store
            .save_progress(user_id, &snapshot, upgrade.as_ref())
            .await?
        {
            tracing::debug!(user_id, attempt, "Rank changed during recalculation, retrying");
            continue;
        }

        if let Some(upgrade) = &upgrade {
            tracing::info!(
                user_id,
                from = upgrade.from_rank.as_str(),
                to = upgrade.to_rank.as_str(),
                "User promoted"
            );
        }
        return Ok(result);
    }

    // Others kept winning; what they stored is at least as fresh as ours.
    tracing::warn!(user_id, "Rank recalculation kept losing to concurrent updates");
    current_rank_view(store, user_id, now).await
}

/// PostgreSQL-backed [`RankStore`]. Counters are derived from the `votes` table.
#[derive(Clone)]
pub struct PgRankStore {
    pool: PgPool,
}

impl PgRankStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Counters are per prediction, not per vote row; weekly activity counts votes.
#[derive(FromRow)]
struct StatsRow {
    created_at: DateTime<Utc>,
    current_rank: Rank,
    current_rank_start_date: DateTime<Utc>,
    rank_updated_at: Option<DateTime<Utc>>,
    total_predictions: i64,
    total_resolved_predictions: i64,
    correct_predictions: i64,
    weekly_activity_count: i64,
}

#[async_trait]
impl RankStore for PgRankStore {
    async fn load_stats(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<UserStats>, AppError> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                u.created_at, u.current_rank, u.current_rank_start_date, u.rank_updated_at,
                COUNT(pp.prediction_id) AS total_predictions,
                COUNT(pp.prediction_id) FILTER (WHERE pp.resolved) AS total_resolved_predictions,
                COUNT(pp.prediction_id) FILTER (WHERE pp.resolved AND pp.all_correct) AS correct_predictions,
                (SELECT COUNT(*) FROM votes w WHERE w.user_id = u.id AND w.created_at >= $2)
                    AS weekly_activity_count
            FROM users u
            LEFT JOIN (
                SELECT
                    user_id,
                    prediction_id,
                    bool_and(is_correct IS NOT NULL) AS resolved,
                    bool_and(COALESCE(is_correct, FALSE)) AS all_correct
                FROM votes
                WHERE user_id = $1
                GROUP BY user_id, prediction_id
            ) pp ON pp.user_id = u.id
            WHERE u.id = $1
            GROUP BY u.id
            "#,
        )
        .bind(user_id)
        .bind(now - Duration::days(ACTIVITY_WINDOW_DAYS))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| UserStats {
            total_predictions: r.total_predictions,
            total_resolved_predictions: r.total_resolved_predictions,
            correct_predictions: r.correct_predictions,
            weekly_activity_count: r.weekly_activity_count,
            account_created_at: r.created_at,
            current_rank: r.current_rank,
            current_rank_start_date: r.current_rank_start_date,
            rank_updated_at: r.rank_updated_at,
        }))
    }

    async fn save_progress(
        &self,
        user_id: i64,
        snapshot: &RankSnapshot,
        upgrade: Option<&RankUpgrade>,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;

        let applied = sqlx::query(
            r#"
            UPDATE users SET
                current_rank = $2,
                rank_percentage = $3,
                total_predictions = $4,
                total_resolved_predictions = $5,
                correct_predictions = $6,
                accuracy_rate = $7,
                weekly_activity_count = $8,
                current_rank_start_date = $9,
                rank_updated_at = $10
            WHERE id = $1
              AND current_rank = $11
              AND rank_updated_at IS NOT DISTINCT FROM $12
            "#,
        )
        .bind(user_id)
        .bind(snapshot.rank)
        .bind(snapshot.percentage as i32)
        .bind(snapshot.total_predictions)
        .bind(snapshot.total_resolved_predictions)
        .bind(snapshot.correct_predictions)
        .bind(snapshot.accuracy_rate)
        .bind(snapshot.weekly_activity_count)
        .bind(snapshot.rank_start_date)
        .bind(snapshot.recalculated_at)
        .bind(snapshot.expected_rank)
        .bind(snapshot.expected_updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !applied {
            return Ok(false);
        }

        if let Some(upgrade) = upgrade {
            sqlx::query(
                r#"
                INSERT INTO rank_upgrades (user_id, from_rank, to_rank, percentage_at_upgrade, upgraded_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(user_id)
            .bind(upgrade.from_rank)
            .bind(upgrade.to_rank)
            .bind(upgrade.percentage_at_upgrade as i32)
            .bind(upgrade.upgraded_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }
}

/// Debug "time travel": pretends the account and the current rank started
/// `days` earlier, and clears the cooldown so the next recalculation runs.
pub async fn rewind_user_clock(
    conn: &mut PgConnection,
    user_id: i64,
    days: i64,
) -> Result<(), AppError> {
    if !(1..=MAX_REWIND_DAYS).contains(&days) {
        return Err(AppError::BadRequest(format!(
            "days must be between 1 and {}",
            MAX_REWIND_DAYS
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE users SET
            created_at = created_at - make_interval(days => $2),
            current_rank_start_date = current_rank_start_date - make_interval(days => $2),
            rank_updated_at = NULL
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .bind(days as i32)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::warn!(user_id, days, "Rewound user rank clock");
    Ok(())
}
