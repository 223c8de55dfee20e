// src/handlers/votes.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use sqlx::PgPool;

use crate::{
    config::Config,
    error::{AppError, is_unique_violation},
    events::{EventSender, PredictionEvent, publish},
    handlers::predictions::fetch_prediction_row,
    models::{
        prediction::PredictionOptionRow,
        vote::{CastVoteRequest, CastVoteResponse, Vote},
    },
    services::{
        lifecycle::{DisplayTemplate, VoteSide, accepts_votes},
        rank_service::{PgRankStore, recalculate_user_rank},
    },
    utils::jwt::Claims,
};

/// Casts the caller's vote.
///
/// The prediction row is locked while the vote row and the counters change,
/// so concurrent votes never lose an increment. The partial unique indexes on
/// `votes` turn a second vote for the same selection into 409.
pub async fn cast_vote(
    State(pool): State<PgPool>,
    State(events): State<EventSender>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Path(prediction_id): Path<i64>,
    Json(payload): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let prediction = fetch_prediction_row(&mut tx, prediction_id, true)
        .await?
        .ok_or(AppError::NotFound("Prediction not found".to_string()))?;

    if !accepts_votes(
        prediction.stored_status()?,
        prediction.start_time,
        prediction.end_time,
        now,
    ) {
        return Err(AppError::BadRequest(
            "This prediction is not accepting votes".to_string(),
        ));
    }

    match (prediction.template()?, payload.side) {
        (DisplayTemplate::Standard, Some(_)) => {
            return Err(AppError::BadRequest(
                "This prediction takes a single choice, not yes/no".to_string(),
            ));
        }
        (DisplayTemplate::MultiYesNo, None) => {
            return Err(AppError::BadRequest(
                "Answer yes or no for the chosen option".to_string(),
            ));
        }
        _ => {}
    }

    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM prediction_options WHERE id = $1 AND prediction_id = $2",
    )
    .bind(payload.option_id)
    .bind(prediction_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Option not found in this prediction".to_string()))?;

    let vote = sqlx::query_as::<_, Vote>(
        r#"
        INSERT INTO votes (user_id, prediction_id, option_id, side)
        VALUES ($1, $2, $3, $4)
        RETURNING id, user_id, prediction_id, option_id, side, is_correct, created_at
        "#,
    )
    .bind(user_id)
    .bind(prediction_id)
    .bind(payload.option_id)
    .bind(payload.side.map(|side| side.as_str()))
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            let scope = if payload.side.is_some() {
                "this option"
            } else {
                "this prediction"
            };
            AppError::Conflict(format!("You have already voted on {}", scope))
        } else {
            AppError::from(e)
        }
    })?;

    let (yes, no) = match payload.side {
        Some(VoteSide::Yes) => (1i64, 0i64),
        Some(VoteSide::No) => (0, 1),
        None => (0, 0),
    };
    let option = sqlx::query_as::<_, PredictionOptionRow>(
        r#"
        UPDATE prediction_options
        SET votes = votes + 1, votes_yes = votes_yes + $2, votes_no = votes_no + $3
        WHERE id = $1
        RETURNING id, prediction_id, label, position, votes, votes_yes, votes_no
        "#,
    )
    .bind(payload.option_id)
    .bind(yes)
    .bind(no)
    .fetch_one(&mut *tx)
    .await?;

    let total_votes = sqlx::query_scalar::<_, i64>(
        "UPDATE predictions SET total_votes = total_votes + 1 WHERE id = $1 RETURNING total_votes",
    )
    .bind(prediction_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::debug!(user_id, prediction_id, option_id = option.id, "Vote cast");
    publish(
        &events,
        PredictionEvent::VoteCast {
            prediction_id,
            option_id: option.id,
            votes: option.votes,
            votes_yes: option.votes_yes,
            votes_no: option.votes_no,
            total_votes,
        },
    );

    // The vote is recorded either way; a failed rank refresh only logs.
    let store = PgRankStore::new(pool.clone());
    let cooldown = Duration::seconds(config.rank_recalc_cooldown_secs);
    if let Err(e) = recalculate_user_rank(&store, user_id, false, now, cooldown).await {
        tracing::warn!(user_id, "Rank refresh after vote failed: {}", e);
    }

    Ok((
        StatusCode::CREATED,
        Json(CastVoteResponse {
            vote,
            option: option.tally(),
            total_votes,
        }),
    ))
}

/// The caller's votes on one prediction (several in the yes/no template).
pub async fn my_votes(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(prediction_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let votes = sqlx::query_as::<_, Vote>(
        r#"
        SELECT id, user_id, prediction_id, option_id, side, is_correct, created_at
        FROM votes
        WHERE user_id = $1 AND prediction_id = $2
        ORDER BY created_at, id
        "#,
    )
    .bind(user_id)
    .bind(prediction_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(votes))
}
