// src/models/rank.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{
    FromRow, Postgres,
    encode::IsNull,
    error::BoxDynError,
    postgres::{PgArgumentBuffer, PgTypeInfo, PgValueRef},
};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    config::MAX_REWIND_DAYS,
    services::rank_engine::{RANK_ORDER, Rank, RankConfig, RankRequirements},
};

// Ranks are stored as their SMALLINT level.
impl sqlx::Type<Postgres> for Rank {
    fn type_info() -> PgTypeInfo {
        <i16 as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for Rank {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let level = <i16 as sqlx::Decode<Postgres>>::decode(value)?;
        Ok(Rank::try_from(level)?)
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for Rank {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        <i16 as sqlx::Encode<Postgres>>::encode_by_ref(&self.level(), buf)
    }
}

/// One row of the tier table served by `GET /api/ranks`.
#[derive(Debug, Serialize)]
pub struct RankTier {
    pub rank: Rank,
    pub level: i16,
    #[serde(flatten)]
    pub display: RankConfig,
    pub requirements: RankRequirements,
}

impl RankTier {
    pub fn all() -> Vec<RankTier> {
        RANK_ORDER
            .into_iter()
            .map(|rank| RankTier {
                rank,
                level: rank.level(),
                display: *rank.config(),
                requirements: *rank.requirements(),
            })
            .collect()
    }
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct RankUpgradeEntry {
    pub from_rank: Rank,
    pub to_rank: Rank,
    pub percentage_at_upgrade: i32,
    pub upgraded_at: DateTime<Utc>,
}

/// Public view of a user's rank, as last persisted.
#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct PublicRank {
    pub user_id: i64,
    pub username: String,
    pub current_rank: Rank,
    pub rank_percentage: i32,
    pub current_rank_start_date: DateTime<Utc>,
    pub total_predictions: i64,
    pub total_resolved_predictions: i64,
    pub correct_predictions: i64,
    pub accuracy_rate: f64,
    #[sqlx(skip)]
    pub upgrades: Vec<RankUpgradeEntry>,
}

#[derive(Debug, Serialize, FromRow, ToSchema)]
pub struct LeaderboardEntry {
    pub user_id: i64,
    pub username: String,
    pub current_rank: Rank,
    pub rank_percentage: i32,
    pub accuracy_rate: f64,
    pub total_predictions: i64,
    pub correct_predictions: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<i64>,
}

/// Debug request shifting a user's account and rank clocks into the past.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RewindRequest {
    #[validate(range(min = 1, max = MAX_REWIND_DAYS))]
    pub days: i64,
}
