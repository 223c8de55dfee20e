use std::sync::LazyLock;

use regex::Regex;

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));

static NON_SLUG_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid separator regex"));

/// "Sports & Games" -> "sports-games".
pub fn slugify(name: &str) -> String {
    let lower = name.to_lowercase();
    NON_SLUG_CHARS
        .replace_all(&lower, "-")
        .trim_matches('-')
        .to_string()
}

pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty() && slug.len() <= 100 && SLUG_PATTERN.is_match(slug)
}

/// `validator` hook for slug fields.
pub fn validate_slug(slug: &str) -> Result<(), validator::ValidationError> {
    if is_valid_slug(slug) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_slug"))
    }
}
