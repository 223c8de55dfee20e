// src/services/payout.rs

//! Display estimate of a pari-mutuel payout: winners split the losing pool in
//! proportion to their stake. Settlement itself happens on chain.

use std::fmt;

use serde::Serialize;
use utoipa::ToSchema;

use crate::error::AppError;

/// Fixed-point scale of the stake proportion, so small stakes do not truncate to zero.
pub const PROPORTION_SCALE: u128 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PayoutEstimate {
    pub user_stake: u64,
    /// User stake over the pool of the chosen option, scaled by [`PROPORTION_SCALE`].
    pub proportion: u128,
    pub winnings_from_losing: u128,
    pub total_payout: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayoutError {
    /// The user's stake is part of the option pool, so it cannot exceed it.
    StakeExceedsPool { user_stake: u64, pool: u64 },
}

impl fmt::Display for PayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutError::StakeExceedsPool { user_stake, pool } => write!(
                f,
                "user stake {} exceeds the total stake {} of the chosen option",
                user_stake, pool
            ),
        }
    }
}

impl std::error::Error for PayoutError {}

impl From<PayoutError> for AppError {
    fn from(err: PayoutError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

/// Estimates what a winning position pays out.
///
/// The user's stake is part of the option pool, so a stake larger than the
/// pool (an empty pool included) is rejected. A zero stake wins nothing, even
/// against an empty pool.
pub fn estimate_payout(
    user_stake: u64,
    total_stake_for_option: u64,
    total_losing_stake: u64,
) -> Result<PayoutEstimate, PayoutError> {
    if user_stake > total_stake_for_option {
        return Err(PayoutError::StakeExceedsPool {
            user_stake,
            pool: total_stake_for_option,
        });
    }
    if total_stake_for_option == 0 {
        return Ok(PayoutEstimate {
            user_stake,
            proportion: 0,
            winnings_from_losing: 0,
            total_payout: 0,
        });
    }

    // proportion <= PROPORTION_SCALE, so neither product can overflow u128.
    let proportion = user_stake as u128 * PROPORTION_SCALE / total_stake_for_option as u128;
    let winnings_from_losing = total_losing_stake as u128 * proportion / PROPORTION_SCALE;

    Ok(PayoutEstimate {
        user_stake,
        proportion,
        winnings_from_losing,
        total_payout: user_stake as u128 + winnings_from_losing,
    })
}
