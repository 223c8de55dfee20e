// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use validator::Validate;

use crate::{
    error::AppError,
    handlers::page_limit,
    models::{
        admin::{AdminAction, AdminStats, PageParams},
        user::{AdminUpdateUserRequest, AdminUserRow},
    },
    utils::jwt::Claims,
};

/// Appends an entry to the admin audit log. Callers pass their open
/// transaction so the entry commits or rolls back with the change itself.
pub(crate) async fn record_admin_action(
    conn: &mut PgConnection,
    admin_id: i64,
    action: &str,
    target_type: &str,
    target_id: Option<i64>,
    details: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO admin_actions (admin_id, action, target_type, target_id, details)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(admin_id)
    .bind(action)
    .bind(target_type)
    .bind(target_id)
    .bind(details)
    .execute(&mut *conn)
    .await?;

    tracing::info!(admin_id, action, target_type, ?target_id, "Admin action");
    Ok(())
}

/// Lists users with their rank snapshot.
/// Admin only.
pub async fn list_users(
    State(pool): State<PgPool>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let users = sqlx::query_as::<_, AdminUserRow>(
        r#"
        SELECT id, username, role, created_at, current_rank, rank_percentage, total_predictions
        FROM users
        ORDER BY id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(page_limit(params.limit))
    .bind(params.offset.unwrap_or(0).max(0))
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list users: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(users))
}

/// Changes a user's role.
/// Admin only.
pub async fn update_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let admin_id = claims.user_id()?;

    if id == admin_id && payload.role != claims.role {
        return Err(AppError::BadRequest(
            "Admins cannot change their own role".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    let previous = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;

    let user = sqlx::query_as::<_, AdminUserRow>(
        r#"
        UPDATE users SET role = $2 WHERE id = $1
        RETURNING id, username, role, created_at, current_rank, rank_percentage, total_predictions
        "#,
    )
    .bind(id)
    .bind(&payload.role)
    .fetch_one(&mut *tx)
    .await?;

    record_admin_action(
        &mut tx,
        admin_id,
        "update_user_role",
        "user",
        Some(id),
        json!({ "from": previous, "to": payload.role }),
    )
    .await?;

    tx.commit().await?;

    Ok(Json(user))
}

/// Dashboard counters.
/// Admin only.
pub async fn get_stats(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let stats = sqlx::query_as::<_, AdminStats>(
        r#"
        SELECT
            (SELECT COUNT(*) FROM users) AS total_users,
            (SELECT COUNT(*) FROM predictions) AS total_predictions,
            (SELECT COUNT(*) FROM predictions
                WHERE (status = 'active' AND end_time > NOW())
                   OR (status = 'scheduled' AND end_time > NOW()
                       AND (start_time IS NULL OR start_time <= NOW()))) AS active_predictions,
            (SELECT COUNT(*) FROM predictions WHERE status = 'resolved') AS resolved_predictions,
            (SELECT COUNT(*) FROM votes) AS total_votes,
            (SELECT COUNT(*) FROM votes WHERE created_at >= NOW() - INTERVAL '24 hours') AS votes_last_24h,
            (SELECT COUNT(*) FROM comments WHERE deleted_at IS NULL) AS total_comments,
            (SELECT COUNT(*) FROM categories) AS total_categories
        "#,
    )
    .fetch_one(&pool)
    .await?;

    Ok(Json(stats))
}

/// The admin audit log, newest first.
/// Admin only.
pub async fn list_actions(
    State(pool): State<PgPool>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let actions = sqlx::query_as::<_, AdminAction>(
        r#"
        SELECT
            a.id, a.admin_id, u.username AS admin_username, a.action,
            a.target_type, a.target_id, a.details, a.created_at
        FROM admin_actions a
        LEFT JOIN users u ON u.id = a.admin_id
        ORDER BY a.created_at DESC, a.id DESC
        LIMIT $1 OFFSET $2
        "#,
    )
    .bind(page_limit(params.limit))
    .bind(params.offset.unwrap_or(0).max(0))
    .fetch_all(&pool)
    .await?;

    Ok(Json(actions))
}
