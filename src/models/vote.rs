// src/models/vote.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::services::{lifecycle::VoteSide, tally::OptionTally};

/// Represents the 'votes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Vote {
    pub id: i64,
    pub user_id: i64,
    pub prediction_id: i64,
    pub option_id: i64,
    /// `yes`/`no` in the multi yes/no template, absent otherwise.
    pub side: Option<String>,
    /// Unknown until the prediction is resolved.
    pub is_correct: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// DTO for casting a vote.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CastVoteRequest {
    pub option_id: i64,
    /// Required in the multi yes/no template, rejected in the standard one.
    pub side: Option<VoteSide>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CastVoteResponse {
    pub vote: Vote,
    /// Counters of the voted option after this vote.
    pub option: OptionTally,
    pub total_votes: i64,
}
