// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::services::rank_engine::Rank;

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// Unique username.
    pub username: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// User role: 'user' or 'admin'.
    pub role: String,

    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Profile of the current user, including the rank snapshot.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct MeResponse {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub current_rank: Rank,
    pub rank_percentage: i32,
    pub current_rank_start_date: chrono::DateTime<chrono::Utc>,
    pub total_predictions: i64,
    pub total_resolved_predictions: i64,
    pub correct_predictions: i64,
    pub accuracy_rate: f64,
    pub weekly_activity_count: i64,
    pub comments_count: i64,
}

/// Row of the admin user list.
#[derive(Debug, Serialize, FromRow)]
pub struct AdminUserRow {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub current_rank: Rank,
    pub rank_percentage: i32,
    pub total_predictions: i64,
}

/// DTO for creating a new user (Registration).
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    #[validate(length(
        min = 3,
        max = 50,
        message = "Username length must be between 3 and 50 characters."
    ))]
    pub username: String,
    #[validate(length(
        min = 8,
        max = 128,
        message = "Password length must be between 8 and 128 characters."
    ))]
    pub password: String,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 50))]
    pub username: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

/// DTO for an admin changing a user's role.
#[derive(Debug, Deserialize, Validate)]
pub struct AdminUpdateUserRequest {
    #[validate(custom(function = validate_role))]
    pub role: String,
}

fn validate_role(role: &str) -> Result<(), validator::ValidationError> {
    if role != crate::utils::jwt::ROLE_USER && role != crate::utils::jwt::ROLE_ADMIN {
        return Err(validator::ValidationError::new("invalid_role"));
    }
    Ok(())
}
