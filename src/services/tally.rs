// src/services/tally.rs

//! Vote percentages as shown next to each option.
//!
//! Every percentage is rounded on its own; nothing forces a set of options to
//! add up to exactly 100.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Counters of one option, as denormalized on `prediction_options`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct OptionTally {
    pub option_id: i64,
    pub votes: i64,
    pub votes_yes: i64,
    pub votes_no: i64,
}

impl OptionTally {
    pub fn new(option_id: i64, votes: i64) -> Self {
        Self {
            option_id,
            votes,
            ..Self::default()
        }
    }

    pub fn with_sides(option_id: i64, votes_yes: i64, votes_no: i64) -> Self {
        Self {
            option_id,
            votes: votes_yes + votes_no,
            votes_yes,
            votes_no,
        }
    }
}

/// `round(votes / total * 100)`, or 0 when nobody has voted yet.
///
/// Rounds half up, in integer arithmetic.
pub fn percentage(votes: i64, total: i64) -> u32 {
    if total <= 0 || votes <= 0 {
        return 0;
    }
    let votes = votes.min(total) as i128;
    let total = total as i128;
    ((votes * 200 + total) / (total * 2)) as u32
}

pub fn total_votes(options: &[OptionTally]) -> i64 {
    options.iter().map(|o| o.votes).sum()
}

/// Share of each option over the votes of all options, in input order.
pub fn option_percentages(options: &[OptionTally]) -> Vec<u32> {
    let total = total_votes(options);
    options.iter().map(|o| percentage(o.votes, total)).collect()
}

/// Yes share of a single option in the multi yes/no template.
/// The denominator is this option's own yes + no count.
pub fn yes_percentage(option: &OptionTally) -> u32 {
    percentage(option.votes_yes, option.votes_yes + option.votes_no)
}

pub fn no_percentage(option: &OptionTally) -> u32 {
    percentage(option.votes_no, option.votes_yes + option.votes_no)
}
