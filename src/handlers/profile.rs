// src/handlers/profile.rs

use axum::{Extension, Json, extract::State, response::IntoResponse};
use sqlx::PgPool;

use crate::{error::AppError, models::user::MeResponse, utils::jwt::Claims};

/// Get current user's profile and rank snapshot.
pub async fn get_me(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let me = sqlx::query_as::<_, MeResponse>(
        r#"
        SELECT
            u.id, u.username, u.role, u.created_at,
            u.current_rank, u.rank_percentage, u.current_rank_start_date,
            u.total_predictions, u.total_resolved_predictions, u.correct_predictions,
            u.accuracy_rate, u.weekly_activity_count,
            (SELECT COUNT(*) FROM comments WHERE user_id = u.id AND deleted_at IS NULL) AS comments_count
        FROM users u
        WHERE u.id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    Ok(Json(me))
}
