// src/handlers/market.rs

use axum::{Json, extract::Query, response::IntoResponse};

use crate::{error::AppError, models::market::PayoutEstimateParams, services::payout::estimate_payout};

/// Estimated payout of a winning stake in a pari-mutuel market. Display only.
pub async fn payout_estimate(
    Query(params): Query<PayoutEstimateParams>,
) -> Result<impl IntoResponse, AppError> {
    let estimate = estimate_payout(
        params.user_stake,
        params.total_stake_for_option,
        params.total_losing_stake,
    )?;
    Ok(Json(estimate))
}
