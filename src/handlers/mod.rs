// src/handlers/mod.rs

pub mod admin;
pub mod auth;
pub mod categories;
pub mod comments;
pub mod events;
pub mod market;
pub mod openapi;
pub mod predictions;
pub mod profile;
pub mod ranks;
pub mod votes;

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Resolves the `limit` query parameter.
pub(crate) fn page_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}
