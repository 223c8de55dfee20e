// src/handlers/comments.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    events::{EventSender, PredictionEvent, publish},
    handlers::admin::record_admin_action,
    models::comment::{CommentCreated, CommentResponse, CreateCommentRequest, LikeToggled},
    services::rank_engine::Rank,
    utils::{html::sanitize_text, jwt::Claims},
};

/// List the live comments of a prediction, thread by thread.
pub async fn list_comments(
    State(pool): State<PgPool>,
    Path(prediction_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let comments = sqlx::query_as::<_, CommentResponse>(
        r#"
        SELECT
            c.id, c.prediction_id, c.user_id, u.username, c.content,
            c.root_id, c.parent_id, c.user_rank, c.likes_count, c.created_at,
            COALESCE(
                array_agg(cl.user_id ORDER BY cl.created_at) FILTER (WHERE cl.user_id IS NOT NULL),
                '{}'
            ) AS liked_by
        FROM comments c
        JOIN users u ON c.user_id = u.id
        LEFT JOIN comment_likes cl ON cl.comment_id = c.id
        WHERE c.prediction_id = $1 AND c.deleted_at IS NULL
        GROUP BY c.id, u.username
        ORDER BY COALESCE(c.root_id, c.id), c.root_id IS NOT NULL, c.created_at ASC
        "#,
    )
    .bind(prediction_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(comments))
}

/// Create a new comment or reply.
///
/// The author's current rank is copied onto the comment.
pub async fn create_comment(
    State(pool): State<PgPool>,
    State(events): State<EventSender>,
    Extension(claims): Extension<Claims>,
    Path(prediction_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let user_id = claims.user_id()?;

    let content = sanitize_text(&payload.content)
        .ok_or(AppError::BadRequest("Comment is empty".to_string()))?;

    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM predictions WHERE id = $1 AND status <> 'draft'")
        .bind(prediction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Prediction not found".to_string()))?;

    // A reply's root is the root of its parent, or the parent itself.
    let mut root_id: Option<i64> = None;
    if let Some(pid) = payload.parent_id {
        let (parent_id, parent_root) = sqlx::query_as::<_, (i64, Option<i64>)>(
            r#"
            SELECT id, root_id FROM comments
            WHERE id = $1 AND prediction_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(pid)
        .bind(prediction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Parent comment not found".to_string()))?;

        root_id = Some(parent_root.unwrap_or(parent_id));
    }

    let user_rank = sqlx::query_scalar::<_, Rank>("SELECT current_rank FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::AuthError("User no longer exists".to_string()))?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO comments (prediction_id, user_id, content, root_id, parent_id, user_rank)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING id
        "#,
    )
    .bind(prediction_id)
    .bind(user_id)
    .bind(&content)
    .bind(root_id)
    .bind(payload.parent_id)
    .bind(user_rank)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    publish(
        &events,
        PredictionEvent::CommentPosted {
            prediction_id,
            comment_id: id,
            parent_id: payload.parent_id,
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(CommentCreated {
            id,
            root_id,
            user_rank,
        }),
    ))
}

/// Toggle Like on a comment.
pub async fn toggle_comment_like(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, i64>(
        "SELECT id FROM comments WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(comment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Comment not found".to_string()))?;

    let removed = sqlx::query("DELETE FROM comment_likes WHERE user_id = $1 AND comment_id = $2")
        .bind(user_id)
        .bind(comment_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let liked = removed == 0;
    let likes_count = if liked {
        sqlx::query("INSERT INTO comment_likes (user_id, comment_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(comment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict("Already liked".to_string())
                } else {
                    AppError::from(e)
                }
            })?;

        sqlx::query_scalar::<_, i32>(
            "UPDATE comments SET likes_count = likes_count + 1 WHERE id = $1 RETURNING likes_count",
        )
        .bind(comment_id)
        .fetch_one(&mut *tx)
        .await?
    } else {
        sqlx::query_scalar::<_, i32>(
            "UPDATE comments SET likes_count = GREATEST(0, likes_count - 1) WHERE id = $1 RETURNING likes_count",
        )
        .bind(comment_id)
        .fetch_one(&mut *tx)
        .await?
    };

    tx.commit().await?;

    Ok(Json(LikeToggled { liked, likes_count }))
}

/// Soft-deletes a comment. Authors may delete their own; admins any.
pub async fn delete_comment(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;

    let (author_id, prediction_id) = sqlx::query_as::<_, (i64, i64)>(
        "SELECT user_id, prediction_id FROM comments WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(comment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Comment not found".to_string()))?;

    let moderated = author_id != user_id;
    if moderated && !claims.is_admin() {
        return Err(AppError::Forbidden(
            "You can only delete your own comments".to_string(),
        ));
    }

    sqlx::query("UPDATE comments SET deleted_at = NOW() WHERE id = $1")
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;

    if moderated {
        record_admin_action(
            &mut tx,
            user_id,
            "delete_comment",
            "comment",
            Some(comment_id),
            json!({ "author_id": author_id, "prediction_id": prediction_id }),
        )
        .await?;
    }

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
