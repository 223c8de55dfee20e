// src/models/category.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

use crate::utils::slug::validate_slug;

/// Represents the 'categories' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    /// Set for subcategories.
    pub parent_id: Option<i64>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A category with its direct subcategories.
#[derive(Debug, Serialize, ToSchema)]
pub struct CategoryTree {
    #[serde(flatten)]
    pub category: Category,
    pub subcategories: Vec<Category>,
}

impl CategoryTree {
    /// Groups a flat category list into top-level entries, each with its
    /// children, keeping the input order at both levels.
    pub fn build(categories: Vec<Category>) -> Vec<Self> {
        let (roots, children): (Vec<_>, Vec<_>) =
            categories.into_iter().partition(|c| c.parent_id.is_none());

        roots
            .into_iter()
            .map(|category| {
                let subcategories = children
                    .iter()
                    .filter(|child| child.parent_id == Some(category.id))
                    .cloned()
                    .collect();
                CategoryTree {
                    category,
                    subcategories,
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    /// Derived from `name` when absent.
    #[validate(custom(function = validate_slug))]
    pub slug: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateCategoryRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    #[validate(custom(function = validate_slug))]
    pub slug: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}
