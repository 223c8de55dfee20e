// src/models/prediction.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    config::{MAX_OPTIONS, MIN_OPTIONS},
    error::AppError,
    services::{
        lifecycle::{DisplayTemplate, PredictionStatus, effective_status},
        tally::{self, OptionTally},
    },
};

/// Columns selected for every prediction read, joined with the category slug.
pub const PREDICTION_COLUMNS: &str = r#"
    p.id, p.question, p.description, p.category_id, c.slug AS category_slug,
    p.status, p.display_template, p.image_url, p.start_time, p.end_time,
    p.winning_option_id, p.total_votes, p.share_count, p.created_by,
    p.created_at, p.updated_at, p.resolved_at
"#;

/// SQL twin of [`effective_status`], for filtering lists by status.
pub const EFFECTIVE_STATUS_SQL: &str = r#"
    CASE
        WHEN p.status IN ('scheduled', 'active') AND p.end_time <= NOW() THEN 'closed'
        WHEN p.status = 'scheduled' AND (p.start_time IS NULL OR p.start_time <= NOW()) THEN 'active'
        ELSE p.status
    END
"#;

/// Represents the 'predictions' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct PredictionRow {
    pub id: i64,
    pub question: String,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub category_slug: Option<String>,
    pub status: String,
    pub display_template: String,
    pub image_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub winning_option_id: Option<i64>,
    pub total_votes: i64,
    pub share_count: i64,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PredictionRow {
    pub fn stored_status(&self) -> Result<PredictionStatus, AppError> {
        self.status.parse().map_err(|_| {
            AppError::InternalServerError(format!(
                "prediction {} has invalid status '{}'",
                self.id, self.status
            ))
        })
    }

    pub fn template(&self) -> Result<DisplayTemplate, AppError> {
        self.display_template.parse().map_err(|_| {
            AppError::InternalServerError(format!(
                "prediction {} has invalid display template '{}'",
                self.id, self.display_template
            ))
        })
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> Result<PredictionStatus, AppError> {
        Ok(effective_status(
            self.stored_status()?,
            self.start_time,
            self.end_time,
            now,
        ))
    }
}

/// Represents the 'prediction_options' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct PredictionOptionRow {
    pub id: i64,
    pub prediction_id: i64,
    pub label: String,
    pub position: i32,
    pub votes: i64,
    pub votes_yes: i64,
    pub votes_no: i64,
}

impl PredictionOptionRow {
    pub fn tally(&self) -> OptionTally {
        OptionTally {
            option_id: self.id,
            votes: self.votes,
            votes_yes: self.votes_yes,
            votes_no: self.votes_no,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OptionResponse {
    pub id: i64,
    pub label: String,
    pub votes: i64,
    pub votes_yes: i64,
    pub votes_no: i64,
    /// Share of all votes on the prediction.
    pub percentage: u32,
    /// Share of this option's own yes/no answers.
    pub yes_percentage: u32,
    pub no_percentage: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PredictionResponse {
    pub id: i64,
    pub question: String,
    pub description: Option<String>,
    pub category_id: Option<i64>,
    pub category_slug: Option<String>,
    /// Status at response time, with the schedule applied.
    pub status: PredictionStatus,
    pub display_template: DisplayTemplate,
    pub image_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub winning_option_id: Option<i64>,
    pub total_votes: i64,
    pub share_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub options: Vec<OptionResponse>,
}

impl PredictionResponse {
    pub fn assemble(
        row: PredictionRow,
        options: Vec<PredictionOptionRow>,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let status = row.effective_status(now)?;
        let display_template = row.template()?;

        let tallies: Vec<OptionTally> = options.iter().map(PredictionOptionRow::tally).collect();
        let percentages = tally::option_percentages(&tallies);

        let options = options
            .into_iter()
            .zip(tallies.iter().zip(percentages))
            .map(|(option, (counts, percentage))| OptionResponse {
                id: option.id,
                label: option.label,
                votes: option.votes,
                votes_yes: option.votes_yes,
                votes_no: option.votes_no,
                percentage,
                yes_percentage: tally::yes_percentage(counts),
                no_percentage: tally::no_percentage(counts),
            })
            .collect();

        Ok(Self {
            id: row.id,
            question: row.question,
            description: row.description,
            category_id: row.category_id,
            category_slug: row.category_slug,
            status,
            display_template,
            image_url: row.image_url,
            start_time: row.start_time,
            end_time: row.end_time,
            winning_option_id: row.winning_option_id,
            total_votes: row.total_votes,
            share_count: row.share_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            resolved_at: row.resolved_at,
            options,
        })
    }
}

/// DTO for an admin creating a prediction.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePredictionRequest {
    #[validate(length(min = 5, max = 300, message = "Question must be 5-300 characters"))]
    pub question: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub category_id: Option<i64>,
    /// Defaults to `standard`.
    pub display_template: Option<DisplayTemplate>,
    /// `draft`, `scheduled` or `active`. Defaults to `draft`.
    pub status: Option<PredictionStatus>,
    #[validate(custom(function = validate_image_url))]
    pub image_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    #[validate(
        length(min = MIN_OPTIONS, max = MAX_OPTIONS, message = "A prediction needs 2-12 options"),
        custom(function = validate_option_labels)
    )]
    pub options: Vec<String>,
}

/// DTO for an admin editing a prediction. Absent fields stay unchanged.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePredictionRequest {
    #[validate(length(min = 5, max = 300, message = "Question must be 5-300 characters"))]
    pub question: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub category_id: Option<i64>,
    #[validate(custom(function = validate_image_url))]
    pub image_url: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Option<PredictionStatus>,
    /// Renames existing options; adding or removing options is not possible
    /// once a prediction exists.
    #[validate(nested)]
    pub option_labels: Option<Vec<OptionLabel>>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct OptionLabel {
    pub id: i64,
    #[validate(length(min = 1, max = 200))]
    pub label: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolvePredictionRequest {
    pub winning_option_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResolveResponse {
    pub prediction_id: i64,
    pub winning_option_id: i64,
    pub votes_scored: u64,
    pub correct_votes: u64,
}

/// Keyset position in the prediction list. `id` breaks ties between
/// predictions created in the same microsecond.
///
/// Sent over the wire as `<created_at in microseconds>_<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: i64,
}

impl PageCursor {
    pub fn after(row: &PredictionRow) -> Self {
        Self {
            created_at: row.created_at,
            id: row.id,
        }
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.created_at.timestamp_micros(), self.id)
    }
}

impl FromStr for PageCursor {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::BadRequest(format!("Invalid cursor: {}", s));
        let (micros, id) = s.split_once('_').ok_or_else(invalid)?;
        let micros = micros.parse::<i64>().map_err(|_| invalid())?;
        let id = id.parse::<i64>().map_err(|_| invalid())?;
        let created_at = DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?;
        Ok(Self { created_at, id })
    }
}

impl Serialize for PageCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PageCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Query string of `GET /api/predictions`.
#[derive(Debug, Deserialize)]
pub struct PredictionListParams {
    pub status: Option<PredictionStatus>,
    /// Category slug.
    pub category: Option<String>,
    /// `next_cursor` of the previous page.
    pub cursor: Option<PageCursor>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PredictionPage {
    pub items: Vec<PredictionResponse>,
    /// Pass as `cursor` to fetch the next page; absent on the last page.
    pub next_cursor: Option<PageCursor>,
}

fn validate_option_labels(labels: &[String]) -> Result<(), ValidationError> {
    let mut seen = std::collections::HashSet::new();
    for label in labels {
        let trimmed = label.trim();
        if trimmed.is_empty() || trimmed.chars().count() > 200 {
            return Err(ValidationError::new("option_label_length"));
        }
        if !seen.insert(trimmed.to_lowercase()) {
            return Err(ValidationError::new("duplicate_option_label"));
        }
    }
    Ok(())
}

/// Only absolute http(s) URLs are accepted as images.
fn validate_image_url(raw: &str) -> Result<(), ValidationError> {
    match url::Url::parse(raw) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(ValidationError::new("invalid_image_url")
            .with_message("image_url must be an absolute http(s) URL".into())),
    }
}

/// Validates the schedule fields against each other.
pub fn check_schedule(
    start_time: Option<DateTime<Utc>>,
    end_time: DateTime<Utc>,
) -> Result<(), AppError> {
    if start_time.is_some_and(|start| start >= end_time) {
        return Err(AppError::BadRequest(
            "start_time must be before end_time".to_string(),
        ));
    }
    Ok(())
}
