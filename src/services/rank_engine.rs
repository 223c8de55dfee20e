// src/services/rank_engine.rs

//! Rank tiers and the arithmetic that turns a user's voting record into a
//! progress percentage toward the next tier.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Novice,
    Amateur,
    Analyst,
    Professional,
    Expert,
    Master,
}

/// Tiers from lowest to highest.
pub const RANK_ORDER: [Rank; 6] = [
    Rank::Novice,
    Rank::Amateur,
    Rank::Analyst,
    Rank::Professional,
    Rank::Expert,
    Rank::Master,
];

/// Display attributes of a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RankConfig {
    pub name: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
}

pub const RANK_CONFIGS: [RankConfig; 6] = [
    RankConfig { name: "Novice", color: "#9CA3AF", icon: "seedling" },
    RankConfig { name: "Amateur", color: "#10B981", icon: "sprout" },
    RankConfig { name: "Analyst", color: "#3B82F6", icon: "chart" },
    RankConfig { name: "Professional", color: "#8B5CF6", icon: "briefcase" },
    RankConfig { name: "Expert", color: "#F59E0B", icon: "star" },
    RankConfig { name: "Master", color: "#EF4444", icon: "crown" },
];

/// What it takes to enter a tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RankRequirements {
    pub min_predictions: i64,
    pub min_resolved: i64,
    /// Percent, 0..=100.
    pub min_accuracy: f64,
    pub min_weekly_activity: i64,
    pub min_account_age_days: i64,
    pub min_days_in_rank: i64,
}

const RANK_REQUIREMENTS: [RankRequirements; 6] = [
    RankRequirements {
        min_predictions: 0,
        min_resolved: 0,
        min_accuracy: 0.0,
        min_weekly_activity: 0,
        min_account_age_days: 0,
        min_days_in_rank: 0,
    },
    RankRequirements {
        min_predictions: 10,
        min_resolved: 5,
        min_accuracy: 40.0,
        min_weekly_activity: 2,
        min_account_age_days: 3,
        min_days_in_rank: 3,
    },
    RankRequirements {
        min_predictions: 50,
        min_resolved: 25,
        min_accuracy: 50.0,
        min_weekly_activity: 3,
        min_account_age_days: 14,
        min_days_in_rank: 7,
    },
    RankRequirements {
        min_predictions: 150,
        min_resolved: 75,
        min_accuracy: 55.0,
        min_weekly_activity: 5,
        min_account_age_days: 30,
        min_days_in_rank: 14,
    },
    RankRequirements {
        min_predictions: 400,
        min_resolved: 200,
        min_accuracy: 60.0,
        min_weekly_activity: 7,
        min_account_age_days: 90,
        min_days_in_rank: 30,
    },
    RankRequirements {
        min_predictions: 1000,
        min_resolved: 500,
        min_accuracy: 65.0,
        min_weekly_activity: 10,
        min_account_age_days: 180,
        min_days_in_rank: 60,
    },
];

impl Rank {
    /// Position in [`RANK_ORDER`], as stored in `users.current_rank`.
    pub fn level(self) -> i16 {
        self as i16
    }

    pub fn next(self) -> Option<Rank> {
        RANK_ORDER.get(self as usize + 1).copied()
    }

    pub fn config(self) -> &'static RankConfig {
        &RANK_CONFIGS[self as usize]
    }

    pub fn requirements(self) -> &'static RankRequirements {
        &RANK_REQUIREMENTS[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Novice => "novice",
            Rank::Amateur => "amateur",
            Rank::Analyst => "analyst",
            Rank::Professional => "professional",
            Rank::Expert => "expert",
            Rank::Master => "master",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config().name)
    }
}

impl TryFrom<i16> for Rank {
    type Error = AppError;

    fn try_from(level: i16) -> Result<Self, Self::Error> {
        usize::try_from(level)
            .ok()
            .and_then(|i| RANK_ORDER.get(i).copied())
            .ok_or_else(|| AppError::InternalServerError(format!("Invalid rank level {}", level)))
    }
}

/// Aggregate of a user's voting record used for rank decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub total_predictions: i64,
    pub total_resolved_predictions: i64,
    pub correct_predictions: i64,
    /// Votes cast during the last seven days.
    pub weekly_activity_count: i64,
    pub account_created_at: DateTime<Utc>,
    pub current_rank: Rank,
    pub current_rank_start_date: DateTime<Utc>,
    /// When the rank snapshot was last persisted.
    pub rank_updated_at: Option<DateTime<Utc>>,
}

impl UserStats {
    pub fn accuracy_rate(&self) -> f64 {
        accuracy_rate(self.correct_predictions, self.total_resolved_predictions)
    }

    pub fn account_age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.account_created_at).num_days().max(0)
    }

    pub fn days_in_rank(&self, now: DateTime<Utc>) -> i64 {
        (now - self.current_rank_start_date).num_days().max(0)
    }
}

/// Correct over resolved, in percent with two decimals. 0 when nothing resolved yet.
pub fn accuracy_rate(correct: i64, resolved: i64) -> f64 {
    if resolved <= 0 {
        return 0.0;
    }
    let basis_points = correct.clamp(0, resolved) * 10_000 / resolved;
    basis_points as f64 / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RankComponent {
    Predictions,
    Resolved,
    Accuracy,
    WeeklyActivity,
    AccountAge,
    TimeInRank,
}

impl RankComponent {
    /// Share of the overall percentage, out of 100.
    pub fn weight(self) -> u32 {
        match self {
            RankComponent::Predictions => 35,
            RankComponent::Resolved => 15,
            RankComponent::Accuracy => 30,
            RankComponent::WeeklyActivity => 10,
            RankComponent::AccountAge => 5,
            RankComponent::TimeInRank => 5,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RankComponent::Predictions => "predictions",
            RankComponent::Resolved => "resolved predictions",
            RankComponent::Accuracy => "accuracy %",
            RankComponent::WeeklyActivity => "votes this week",
            RankComponent::AccountAge => "days since joining",
            RankComponent::TimeInRank => "days in current rank",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BreakdownItem {
    pub component: RankComponent,
    pub weight: u32,
    pub current: f64,
    pub required: f64,
    /// Progress toward `required`, 0..=100.
    pub progress: u32,
    pub met: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RankProgress {
    pub percentage: u32,
    pub breakdown: Vec<BreakdownItem>,
}

/// An unmet requirement standing between the user and the next tier.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct RankBlocker {
    pub requirement: RankComponent,
    pub have: f64,
    pub need: f64,
}

impl fmt::Display for RankBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "needs {} {} (has {})",
            self.need,
            self.requirement.label(),
            self.have
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UpgradeEvaluation {
    pub eligible: bool,
    pub next_rank: Option<Rank>,
    pub blockers: Vec<RankBlocker>,
}

fn breakdown(stats: &UserStats, target: &RankRequirements, now: DateTime<Utc>) -> Vec<BreakdownItem> {
    [
        (
            RankComponent::Predictions,
            stats.total_predictions as f64,
            target.min_predictions as f64,
        ),
        (
            RankComponent::Resolved,
            stats.total_resolved_predictions as f64,
            target.min_resolved as f64,
        ),
        (RankComponent::Accuracy, stats.accuracy_rate(), target.min_accuracy),
        (
            RankComponent::WeeklyActivity,
            stats.weekly_activity_count as f64,
            target.min_weekly_activity as f64,
        ),
        (
            RankComponent::AccountAge,
            stats.account_age_days(now) as f64,
            target.min_account_age_days as f64,
        ),
        (
            RankComponent::TimeInRank,
            stats.days_in_rank(now) as f64,
            target.min_days_in_rank as f64,
        ),
    ]
    .into_iter()
    .map(|(component, current, required)| BreakdownItem {
        component,
        weight: component.weight(),
        current,
        required,
        progress: component_progress(current, required).floor() as u32,
        met: current >= required,
    })
    .collect()
}

fn component_progress(current: f64, required: f64) -> f64 {
    if required <= 0.0 {
        return 100.0;
    }
    (current / required * 100.0).clamp(0.0, 100.0)
}

/// Progress toward the next tier.
///
/// Weighted sum of the per-requirement progress. Capped at 99 until every
/// requirement is met, so 100 always means "ready to move up". The top tier
/// reports 100 against its own requirements.
pub fn calculate_rank_percentage(stats: &UserStats, now: DateTime<Utc>) -> RankProgress {
    let target = stats.current_rank.next().unwrap_or(stats.current_rank);
    let items = breakdown(stats, target.requirements(), now);

    if stats.current_rank.next().is_none() {
        return RankProgress {
            percentage: 100,
            breakdown: items,
        };
    }

    let weighted: f64 = items
        .iter()
        .map(|item| {
            item.weight as f64 * component_progress(item.current, item.required) / 100.0
        })
        .sum();
    let mut percentage = weighted.round().clamp(0.0, 100.0) as u32;
    if !items.iter().all(|item| item.met) {
        percentage = percentage.min(99);
    }

    RankProgress {
        percentage,
        breakdown: items,
    }
}

pub fn evaluate_upgrade(stats: &UserStats, now: DateTime<Utc>) -> UpgradeEvaluation {
    let Some(next) = stats.current_rank.next() else {
        return UpgradeEvaluation {
            eligible: false,
            next_rank: None,
            blockers: Vec::new(),
        };
    };

    let blockers: Vec<RankBlocker> = breakdown(stats, next.requirements(), now)
        .into_iter()
        .filter(|item| !item.met)
        .map(|item| RankBlocker {
            requirement: item.component,
            have: item.current,
            need: item.required,
        })
        .collect();

    UpgradeEvaluation {
        eligible: blockers.is_empty(),
        next_rank: Some(next),
        blockers,
    }
}
