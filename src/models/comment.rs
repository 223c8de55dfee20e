// src/models/comment.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::{config::MAX_COMMENT_LENGTH, services::rank_engine::Rank};

/// DTO for creating a new comment.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCommentRequest {
    #[validate(length(
        min = 1,
        max = MAX_COMMENT_LENGTH,
        message = "Comment must be between 1 and 2000 characters"
    ))]
    pub content: String,

    /// Optional: the ID of the comment being replied to.
    pub parent_id: Option<i64>,
}

/// DTO for displaying a comment with author info.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct CommentResponse {
    pub id: i64,
    pub prediction_id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub root_id: Option<i64>,
    pub parent_id: Option<i64>,
    /// Author's rank when the comment was written.
    pub user_rank: Rank,
    pub likes_count: i32,
    /// Ids of the users who liked this comment.
    pub liked_by: Vec<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CommentCreated {
    pub id: i64,
    pub root_id: Option<i64>,
    pub user_rank: Rank,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LikeToggled {
    pub liked: bool,
    pub likes_count: i32,
}
