// src/models/admin.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// Represents the 'admin_actions' audit table.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct AdminAction {
    pub id: i64,
    pub admin_id: Option<i64>,
    pub admin_username: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: Option<i64>,
    pub details: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Dashboard counters.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct AdminStats {
    pub total_users: i64,
    pub total_predictions: i64,
    pub active_predictions: i64,
    pub resolved_predictions: i64,
    pub total_votes: i64,
    pub votes_last_24h: i64,
    pub total_comments: i64,
    pub total_categories: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
