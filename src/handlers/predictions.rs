// src/handlers/predictions.rs

use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    config::Config,
    error::AppError,
    events::{EventSender, PredictionEvent, publish},
    handlers::{admin::record_admin_action, page_limit},
    models::prediction::{
        CreatePredictionRequest, EFFECTIVE_STATUS_SQL, PREDICTION_COLUMNS, PageCursor,
        PredictionListParams, PredictionOptionRow, PredictionPage, PredictionResponse,
        PredictionRow, ResolvePredictionRequest, ResolveResponse, UpdatePredictionRequest,
        check_schedule,
    },
    services::{
        lifecycle::{
            DisplayTemplate, PredictionStatus, VoteSide, can_resolve, check_transition,
            is_vote_correct,
        },
        rank_service::{PgRankStore, recalculate_user_rank},
    },
    utils::{html::sanitize_text, jwt::Claims},
};

const OPTION_COLUMNS: &str =
    "id, prediction_id, label, position, votes, votes_yes, votes_no";

/// Reads one prediction row. With `lock`, the row stays locked until the
/// surrounding transaction ends.
pub(crate) async fn fetch_prediction_row(
    conn: &mut PgConnection,
    id: i64,
    lock: bool,
) -> Result<Option<PredictionRow>, AppError> {
    let sql = format!(
        "SELECT {} FROM predictions p LEFT JOIN categories c ON c.id = p.category_id WHERE p.id = $1{}",
        PREDICTION_COLUMNS,
        if lock { " FOR UPDATE OF p" } else { "" }
    );
    let row = sqlx::query_as::<_, PredictionRow>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub(crate) async fn fetch_options(
    conn: &mut PgConnection,
    prediction_id: i64,
) -> Result<Vec<PredictionOptionRow>, AppError> {
    let sql = format!(
        "SELECT {} FROM prediction_options WHERE prediction_id = $1 ORDER BY position, id",
        OPTION_COLUMNS
    );
    let options = sqlx::query_as::<_, PredictionOptionRow>(&sql)
        .bind(prediction_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(options)
}

async fn load_response(pool: &PgPool, id: i64) -> Result<PredictionResponse, AppError> {
    let mut conn = pool.acquire().await?;
    let row = fetch_prediction_row(&mut conn, id, false)
        .await?
        .ok_or(AppError::NotFound("Prediction not found".to_string()))?;
    let options = fetch_options(&mut conn, id).await?;
    PredictionResponse::assemble(row, options, Utc::now())
}

/// List predictions, newest first. Drafts are never listed.
///
/// Filters: `status` (as seen at request time), `category` slug (including
/// its subcategories), `cursor` (keyset on creation time then id) and `limit`.
pub async fn list_predictions(
    State(pool): State<PgPool>,
    Query(params): Query<PredictionListParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = page_limit(params.limit);

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
    qb.push(PREDICTION_COLUMNS);
    qb.push(" FROM predictions p LEFT JOIN categories c ON c.id = p.category_id");
    qb.push(" WHERE p.status <> 'draft'");

    if let Some(status) = params.status {
        qb.push(" AND ");
        qb.push(EFFECTIVE_STATUS_SQL);
        qb.push(" = ");
        qb.push_bind(status.as_str());
    }
    if let Some(slug) = &params.category {
        qb.push(" AND (c.slug = ");
        qb.push_bind(slug.clone());
        qb.push(" OR c.parent_id = (SELECT id FROM categories WHERE slug = ");
        qb.push_bind(slug.clone());
        qb.push("))");
    }
    if let Some(cursor) = params.cursor {
        qb.push(" AND (p.created_at, p.id) < (");
        qb.push_bind(cursor.created_at);
        qb.push(", ");
        qb.push_bind(cursor.id);
        qb.push(")");
    }
    qb.push(" ORDER BY p.created_at DESC, p.id DESC LIMIT ");
    qb.push_bind(limit);

    let rows = qb
        .build_query_as::<PredictionRow>()
        .fetch_all(&pool)
        .await?;

    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let sql = format!(
        "SELECT {} FROM prediction_options WHERE prediction_id = ANY($1) ORDER BY position, id",
        OPTION_COLUMNS
    );
    let all_options = sqlx::query_as::<_, PredictionOptionRow>(&sql)
        .bind(&ids)
        .fetch_all(&pool)
        .await?;

    let mut by_prediction: HashMap<i64, Vec<PredictionOptionRow>> = HashMap::new();
    for option in all_options {
        by_prediction
            .entry(option.prediction_id)
            .or_default()
            .push(option);
    }

    let next_cursor = if rows.len() as i64 == limit {
        rows.last().map(PageCursor::after)
    } else {
        None
    };

    let now = Utc::now();
    let items = rows
        .into_iter()
        .map(|row| {
            let options = by_prediction.remove(&row.id).unwrap_or_default();
            PredictionResponse::assemble(row, options, now)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(PredictionPage { items, next_cursor }))
}

/// Get one prediction with its options and their percentages.
pub async fn get_prediction(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let prediction = load_response(&pool, id).await?;
    if prediction.status == PredictionStatus::Draft {
        return Err(AppError::NotFound("Prediction not found".to_string()));
    }
    Ok(Json(prediction))
}

/// Counts a share of the prediction.
pub async fn track_share(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let share_count = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE predictions SET share_count = share_count + 1
        WHERE id = $1 AND status <> 'draft'
        RETURNING share_count
        "#,
    )
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Prediction not found".to_string()))?;

    Ok(Json(json!({ "share_count": share_count })))
}

async fn ensure_category(conn: &mut PgConnection, category_id: i64) -> Result<(), AppError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM categories WHERE id = $1")
        .bind(category_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("Category not found".to_string()))?;
    Ok(())
}

/// Creates a prediction with its options.
/// Admin only.
pub async fn create_prediction(
    State(pool): State<PgPool>,
    State(events): State<EventSender>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreatePredictionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let admin_id = claims.user_id()?;
    let now = Utc::now();

    check_schedule(payload.start_time, payload.end_time)?;
    let status = payload.status.unwrap_or(PredictionStatus::Draft);
    match status {
        PredictionStatus::Draft | PredictionStatus::Active => {}
        PredictionStatus::Scheduled if payload.start_time.is_some() => {}
        PredictionStatus::Scheduled => {
            return Err(AppError::BadRequest(
                "A scheduled prediction needs a start_time".to_string(),
            ));
        }
        other => {
            return Err(AppError::BadRequest(format!(
                "A new prediction cannot start as {}",
                other
            )));
        }
    }
    if status != PredictionStatus::Draft && payload.end_time <= now {
        return Err(AppError::BadRequest(
            "end_time must be in the future".to_string(),
        ));
    }

    let template = payload.display_template.unwrap_or(DisplayTemplate::Standard);
    let description = payload.description.as_deref().and_then(sanitize_text);

    let mut tx = pool.begin().await?;

    if let Some(category_id) = payload.category_id {
        ensure_category(&mut tx, category_id).await?;
    }

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO predictions
            (question, description, category_id, status, display_template,
             image_url, start_time, end_time, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(payload.question.trim())
    .bind(&description)
    .bind(payload.category_id)
    .bind(status.as_str())
    .bind(template.as_str())
    .bind(&payload.image_url)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .bind(admin_id)
    .fetch_one(&mut *tx)
    .await?;

    for (position, label) in payload.options.iter().enumerate() {
        sqlx::query(
            "INSERT INTO prediction_options (prediction_id, label, position) VALUES ($1, $2, $3)",
        )
        .bind(id)
        .bind(label.trim())
        .bind(position as i32)
        .execute(&mut *tx)
        .await?;
    }

    record_admin_action(
        &mut tx,
        admin_id,
        "create_prediction",
        "prediction",
        Some(id),
        json!({
            "question": payload.question.trim(),
            "status": status,
            "display_template": template,
            "options": payload.options.len(),
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(prediction_id = id, admin_id, "Prediction created");
    let prediction = load_response(&pool, id).await?;
    if prediction.status != PredictionStatus::Draft {
        publish(
            &events,
            PredictionEvent::PredictionUpdated {
                prediction_id: id,
                status: prediction.status,
            },
        );
    }

    Ok((StatusCode::CREATED, Json(prediction)))
}

/// Edits a prediction. Absent fields stay unchanged.
/// Admin only.
pub async fn update_prediction(
    State(pool): State<PgPool>,
    State(events): State<EventSender>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePredictionRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let admin_id = claims.user_id()?;
    let now = Utc::now();

    let mut tx = pool.begin().await?;

    let row = fetch_prediction_row(&mut tx, id, true)
        .await?
        .ok_or(AppError::NotFound("Prediction not found".to_string()))?;

    if row.stored_status()? == PredictionStatus::Resolved {
        return Err(AppError::BadRequest(
            "Resolved predictions cannot be edited".to_string(),
        ));
    }

    let current = row.effective_status(now)?;
    let start_time = payload.start_time.or(row.start_time);
    let end_time = payload.end_time.unwrap_or(row.end_time);
    check_schedule(start_time, end_time)?;

    if let Some(to) = payload.status {
        check_transition(current, to)?;
        if to == PredictionStatus::Active && end_time <= now {
            return Err(AppError::BadRequest(
                "end_time must be in the future to accept votes".to_string(),
            ));
        }
        if to == PredictionStatus::Scheduled && start_time.is_none() {
            return Err(AppError::BadRequest(
                "A scheduled prediction needs a start_time".to_string(),
            ));
        }
    }

    if let Some(category_id) = payload.category_id {
        ensure_category(&mut tx, category_id).await?;
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE predictions SET updated_at = NOW()");
    if let Some(question) = &payload.question {
        qb.push(", question = ");
        qb.push_bind(question.trim().to_string());
    }
    if let Some(description) = &payload.description {
        qb.push(", description = ");
        qb.push_bind(sanitize_text(description));
    }
    if let Some(category_id) = payload.category_id {
        qb.push(", category_id = ");
        qb.push_bind(category_id);
    }
    if let Some(image_url) = &payload.image_url {
        qb.push(", image_url = ");
        qb.push_bind(image_url.clone());
    }
    if let Some(start) = payload.start_time {
        qb.push(", start_time = ");
        qb.push_bind(start);
    }
    if let Some(end) = payload.end_time {
        qb.push(", end_time = ");
        qb.push_bind(end);
    }
    if let Some(status) = payload.status {
        qb.push(", status = ");
        qb.push_bind(status.as_str());
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.build().execute(&mut *tx).await?;

    if let Some(labels) = &payload.option_labels {
        for option in labels {
            let updated = sqlx::query(
                "UPDATE prediction_options SET label = $1 WHERE id = $2 AND prediction_id = $3",
            )
            .bind(option.label.trim())
            .bind(option.id)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(AppError::NotFound(format!(
                    "Option {} not found in this prediction",
                    option.id
                )));
            }
        }
    }

    let mut changed = Vec::new();
    for (field, present) in [
        ("question", payload.question.is_some()),
        ("description", payload.description.is_some()),
        ("category_id", payload.category_id.is_some()),
        ("image_url", payload.image_url.is_some()),
        ("start_time", payload.start_time.is_some()),
        ("end_time", payload.end_time.is_some()),
        ("status", payload.status.is_some()),
        ("option_labels", payload.option_labels.is_some()),
    ] {
        if present {
            changed.push(field);
        }
    }

    record_admin_action(
        &mut tx,
        admin_id,
        "update_prediction",
        "prediction",
        Some(id),
        json!({ "fields": changed, "from_status": current, "to_status": payload.status }),
    )
    .await?;

    tx.commit().await?;

    let prediction = load_response(&pool, id).await?;
    if prediction.status != PredictionStatus::Draft {
        publish(
            &events,
            PredictionEvent::PredictionUpdated {
                prediction_id: id,
                status: prediction.status,
            },
        );
    }

    Ok(Json(prediction))
}

/// Deletes a prediction together with its options, votes and comments.
/// Admin only.
pub async fn delete_prediction(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = claims.user_id()?;
    let mut tx = pool.begin().await?;

    let (question, total_votes) = sqlx::query_as::<_, (String, i64)>(
        "DELETE FROM predictions WHERE id = $1 RETURNING question, total_votes",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Prediction not found".to_string()))?;

    record_admin_action(
        &mut tx,
        admin_id,
        "delete_prediction",
        "prediction",
        Some(id),
        json!({ "question": question, "votes_removed": total_votes }),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(prediction_id = id, admin_id, "Prediction deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Picks the winning option, scores every vote and closes the prediction
/// for good. Voters' ranks are refreshed in the background afterwards.
/// Admin only.
pub async fn resolve_prediction(
    State(pool): State<PgPool>,
    State(events): State<EventSender>,
    State(config): State<Config>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ResolvePredictionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = claims.user_id()?;
    let winning_option_id = payload.winning_option_id;

    let mut tx = pool.begin().await?;

    let row = fetch_prediction_row(&mut tx, id, true)
        .await?
        .ok_or(AppError::NotFound("Prediction not found".to_string()))?;

    let current = row.effective_status(Utc::now())?;
    if !can_resolve(current) {
        return Err(AppError::BadRequest(format!(
            "A {} prediction cannot be resolved",
            current
        )));
    }

    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM prediction_options WHERE id = $1 AND prediction_id = $2",
    )
    .bind(winning_option_id)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound(
        "Winning option not found in this prediction".to_string(),
    ))?;

    sqlx::query(
        r#"
        UPDATE predictions
        SET status = 'resolved', winning_option_id = $2, resolved_at = NOW(), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(winning_option_id)
    .execute(&mut *tx)
    .await?;

    let votes = sqlx::query_as::<_, (i64, i64, i64, Option<String>)>(
        "SELECT id, user_id, option_id, side FROM votes WHERE prediction_id = $1",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    let mut vote_ids = Vec::with_capacity(votes.len());
    let mut outcomes = Vec::with_capacity(votes.len());
    let mut voters = Vec::new();
    for (vote_id, user_id, option_id, side) in votes {
        let side = side.as_deref().map(str::parse::<VoteSide>).transpose()?;
        vote_ids.push(vote_id);
        outcomes.push(is_vote_correct(side, option_id, winning_option_id));
        voters.push(user_id);
    }
    voters.sort_unstable();
    voters.dedup();

    sqlx::query(
        r#"
        UPDATE votes v SET is_correct = s.correct
        FROM UNNEST($1::BIGINT[], $2::BOOL[]) AS s(id, correct)
        WHERE v.id = s.id
        "#,
    )
    .bind(&vote_ids)
    .bind(&outcomes)
    .execute(&mut *tx)
    .await?;

    let correct_votes = outcomes.iter().filter(|c| **c).count() as u64;

    record_admin_action(
        &mut tx,
        admin_id,
        "resolve_prediction",
        "prediction",
        Some(id),
        json!({
            "winning_option_id": winning_option_id,
            "votes_scored": vote_ids.len(),
            "correct_votes": correct_votes,
        }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        prediction_id = id,
        winning_option_id,
        voters = voters.len(),
        "Prediction resolved"
    );
    publish(
        &events,
        PredictionEvent::PredictionResolved {
            prediction_id: id,
            winning_option_id,
        },
    );

    // Accuracy changed for every voter; refresh their ranks off the request path.
    let store = PgRankStore::new(pool.clone());
    let cooldown = Duration::seconds(config.rank_recalc_cooldown_secs);
    tokio::spawn(async move {
        for user_id in voters {
            if let Err(e) = recalculate_user_rank(&store, user_id, true, Utc::now(), cooldown).await
            {
                tracing::warn!(user_id, "Rank refresh after resolution failed: {}", e);
            }
        }
    });

    Ok(Json(ResolveResponse {
        prediction_id: id,
        winning_option_id,
        votes_scored: vote_ids.len() as u64,
        correct_votes,
    }))
}
