// src/handlers/categories.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    handlers::admin::record_admin_action,
    models::category::{Category, CategoryTree, CreateCategoryRequest, UpdateCategoryRequest},
    utils::{
        html::sanitize_text,
        jwt::Claims,
        slug::{is_valid_slug, slugify},
    },
};

const CATEGORY_COLUMNS: &str = "id, name, slug, description, parent_id, created_at";

fn slug_conflict(err: sqlx::Error, slug: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(format!("Category slug '{}' already exists", slug))
    } else {
        AppError::from(err)
    }
}

/// Categories only nest one level deep.
async fn ensure_top_level(
    conn: &mut PgConnection,
    parent_id: i64,
    child_id: Option<i64>,
) -> Result<(), AppError> {
    if child_id == Some(parent_id) {
        return Err(AppError::BadRequest(
            "A category cannot be its own parent".to_string(),
        ));
    }

    let grandparent = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT parent_id FROM categories WHERE id = $1",
    )
    .bind(parent_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Parent category not found".to_string()))?;

    if grandparent.is_some() {
        return Err(AppError::BadRequest(
            "Subcategories cannot have subcategories".to_string(),
        ));
    }

    if let Some(id) = child_id {
        let has_children = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM categories WHERE parent_id = $1)",
        )
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
        if has_children {
            return Err(AppError::BadRequest(
                "A category with subcategories cannot become a subcategory".to_string(),
            ));
        }
    }
    Ok(())
}

/// List the category taxonomy.
pub async fn list_categories(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let sql = format!("SELECT {} FROM categories ORDER BY name", CATEGORY_COLUMNS);
    let categories = sqlx::query_as::<_, Category>(&sql)
        .fetch_all(&pool)
        .await?;

    Ok(Json(CategoryTree::build(categories)))
}

/// Get one category by slug, with its subcategories.
pub async fn get_category(
    State(pool): State<PgPool>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let sql = format!("SELECT {} FROM categories WHERE slug = $1", CATEGORY_COLUMNS);
    let category = sqlx::query_as::<_, Category>(&sql)
        .bind(&slug)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Category not found".to_string()))?;

    let sql = format!(
        "SELECT {} FROM categories WHERE parent_id = $1 ORDER BY name",
        CATEGORY_COLUMNS
    );
    let subcategories = sqlx::query_as::<_, Category>(&sql)
        .bind(category.id)
        .fetch_all(&pool)
        .await?;

    Ok(Json(CategoryTree {
        category,
        subcategories,
    }))
}

/// Creates a category.
/// Admin only.
pub async fn create_category(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let admin_id = claims.user_id()?;

    let slug = payload.slug.clone().unwrap_or_else(|| slugify(&payload.name));
    if !is_valid_slug(&slug) {
        return Err(AppError::BadRequest(
            "Cannot derive a slug from this name; provide one".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;

    if let Some(parent_id) = payload.parent_id {
        ensure_top_level(&mut tx, parent_id, None).await?;
    }

    let sql = format!(
        "INSERT INTO categories (name, slug, description, parent_id) VALUES ($1, $2, $3, $4) RETURNING {}",
        CATEGORY_COLUMNS
    );
    let category = sqlx::query_as::<_, Category>(&sql)
        .bind(payload.name.trim())
        .bind(&slug)
        .bind(payload.description.as_deref().and_then(sanitize_text))
        .bind(payload.parent_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| slug_conflict(e, &slug))?;

    record_admin_action(
        &mut tx,
        admin_id,
        "create_category",
        "category",
        Some(category.id),
        json!({ "name": category.name, "slug": category.slug }),
    )
    .await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(category)))
}

/// Updates a category.
/// Admin only.
pub async fn update_category(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCategoryRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;
    let admin_id = claims.user_id()?;

    let mut tx = pool.begin().await?;

    if let Some(parent_id) = payload.parent_id {
        ensure_top_level(&mut tx, parent_id, Some(id)).await?;
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE categories SET id = id");
    if let Some(name) = &payload.name {
        qb.push(", name = ");
        qb.push_bind(name.trim().to_string());
    }
    if let Some(slug) = &payload.slug {
        qb.push(", slug = ");
        qb.push_bind(slug.clone());
    }
    if let Some(description) = &payload.description {
        qb.push(", description = ");
        qb.push_bind(sanitize_text(description));
    }
    if let Some(parent_id) = payload.parent_id {
        qb.push(", parent_id = ");
        qb.push_bind(parent_id);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(" RETURNING ");
    qb.push(CATEGORY_COLUMNS);

    let category = qb
        .build_query_as::<Category>()
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| slug_conflict(e, payload.slug.as_deref().unwrap_or_default()))?
        .ok_or(AppError::NotFound("Category not found".to_string()))?;

    record_admin_action(
        &mut tx,
        admin_id,
        "update_category",
        "category",
        Some(id),
        json!({ "name": category.name, "slug": category.slug, "parent_id": category.parent_id }),
    )
    .await?;

    tx.commit().await?;

    Ok(Json(category))
}

/// Deletes a category. Its predictions become uncategorized and its
/// subcategories become top-level.
/// Admin only.
pub async fn delete_category(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let admin_id = claims.user_id()?;
    let mut tx = pool.begin().await?;

    let slug = sqlx::query_scalar::<_, String>("DELETE FROM categories WHERE id = $1 RETURNING slug")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Category not found".to_string()))?;

    record_admin_action(
        &mut tx,
        admin_id,
        "delete_category",
        "category",
        Some(id),
        json!({ "slug": slug }),
    )
    .await?;

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
