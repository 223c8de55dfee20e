// src/models/market.rs

use serde::Deserialize;

/// Query string of `GET /api/markets/payout-estimate`. Amounts are in the
/// token's smallest unit.
#[derive(Debug, Deserialize)]
pub struct PayoutEstimateParams {
    pub user_stake: u64,
    pub total_stake_for_option: u64,
    pub total_losing_stake: u64,
}
