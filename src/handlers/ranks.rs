// src/handlers/ranks.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    handlers::{admin::record_admin_action, page_limit},
    models::rank::{
        LeaderboardEntry, LeaderboardParams, PublicRank, RankTier, RankUpgradeEntry,
        RewindRequest,
    },
    services::rank_service::{
        PgRankStore, current_rank_view, recalculate_user_rank, rewind_user_clock,
    },
    utils::jwt::Claims,
};

fn cooldown(config: &Config) -> Duration {
    Duration::seconds(config.rank_recalc_cooldown_secs)
}

/// The tier table: display attributes and entry requirements.
pub async fn list_rank_tiers() -> impl IntoResponse {
    Json(RankTier::all())
}

/// Live rank progress of the caller. Read-only.
pub async fn get_my_rank(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let store = PgRankStore::new(pool);
    let view = current_rank_view(&store, claims.user_id()?, Utc::now()).await?;
    Ok(Json(view))
}

/// Recalculates the caller's rank, promoting them when eligible.
/// Throttled by the recalculation cooldown.
pub async fn recalculate_my_rank(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let store = PgRankStore::new(pool);
    let result = recalculate_user_rank(
        &store,
        claims.user_id()?,
        false,
        Utc::now(),
        cooldown(&config),
    )
    .await?;
    Ok(Json(result))
}

/// Public rank card of a user, with upgrade history.
pub async fn get_user_rank(
    State(pool): State<PgPool>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut rank = sqlx::query_as::<_, PublicRank>(
        r#"
        SELECT
            id AS user_id, username, current_rank, rank_percentage, current_rank_start_date,
            total_predictions, total_resolved_predictions, correct_predictions, accuracy_rate
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    rank.upgrades = sqlx::query_as::<_, RankUpgradeEntry>(
        r#"
        SELECT from_rank, to_rank, percentage_at_upgrade, upgraded_at
        FROM rank_upgrades
        WHERE user_id = $1
        ORDER BY upgraded_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(rank))
}

/// Top users by tier, then progress, then accuracy.
pub async fn get_leaderboard(
    State(pool): State<PgPool>,
    Query(params): Query<LeaderboardParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = page_limit(params.limit);

    let entries = sqlx::query_as::<_, LeaderboardEntry>(
        r#"
        SELECT
            id AS user_id, username, current_rank, rank_percentage, accuracy_rate,
            total_predictions, correct_predictions
        FROM users
        ORDER BY current_rank DESC, rank_percentage DESC, accuracy_rate DESC, id ASC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&pool)
    .await?;

    Ok(Json(entries))
}

/// Recalculates a user's rank, ignoring the cooldown.
/// Admin only.
pub async fn admin_recalculate_rank(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = claims.user_id()?;
    let store = PgRankStore::new(pool.clone());
    let result = recalculate_user_rank(&store, user_id, true, Utc::now(), cooldown(&config)).await?;

    let mut conn = pool.acquire().await?;
    record_admin_action(
        &mut conn,
        admin_id,
        "recalculate_rank",
        "user",
        Some(user_id),
        json!({ "rank": result.rank, "percentage": result.percentage, "promoted_to": result.promoted_to }),
    )
    .await?;

    Ok(Json(result))
}

/// Debug "time travel": moves the user's account and rank clocks back by
/// `days`, then recalculates.
/// Admin only.
pub async fn admin_rewind_rank(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Path(user_id): Path<i64>,
    Json(payload): Json<RewindRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let admin_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    rewind_user_clock(&mut tx, user_id, payload.days).await?;
    record_admin_action(
        &mut tx,
        admin_id,
        "rewind_rank_clock",
        "user",
        Some(user_id),
        json!({ "days": payload.days }),
    )
    .await?;
    tx.commit().await?;

    let store = PgRankStore::new(pool);
    let result = recalculate_user_rank(&store, user_id, true, Utc::now(), cooldown(&config)).await?;

    Ok(Json(result))
}
