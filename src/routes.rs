// src/routes.rs

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{
        admin, auth, categories, comments, events, market, openapi, predictions, profile, ranks,
        votes,
    },
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware},
};

/// Per-IP rate limit for routes that write, when configured.
fn rate_limited(router: Router<AppState>, state: &AppState) -> Router<AppState> {
    let Some(per_second) = state.config.rate_limit_per_second else {
        return router;
    };

    let governor_conf = GovernorConfigBuilder::default()
        .per_second(per_second.max(1))
        .burst_size(state.config.rate_limit_burst.max(1))
        .finish();

    match governor_conf {
        Some(conf) => router.layer(GovernorLayer::new(Arc::new(conf))),
        None => {
            tracing::warn!("Invalid rate limit settings; rate limiting disabled");
            router
        }
    }
}

/// Assembles the main application router.
///
/// * Public routes: reading predictions, comments, categories and ranks, live events.
/// * User routes: voting, commenting, own profile and rank (JWT required).
/// * Admin routes: content management and rank tools (admin JWT required).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://localhost:5173"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let auth_routes = rate_limited(
        Router::new()
            .route("/register", post(auth::register))
            .route("/login", post(auth::login)),
        &state,
    );

    let public_routes = Router::new()
        .route("/predictions", get(predictions::list_predictions))
        .route("/predictions/{id}", get(predictions::get_prediction))
        .route("/predictions/{id}/share", post(predictions::track_share))
        .route("/predictions/{id}/comments", get(comments::list_comments))
        .route("/predictions/{id}/events", get(events::prediction_events))
        .route("/events", get(events::all_events))
        .route("/categories", get(categories::list_categories))
        .route("/categories/{slug}", get(categories::get_category))
        .route("/users/{id}/rank", get(ranks::get_user_rank))
        .route("/leaderboard", get(ranks::get_leaderboard))
        .route("/ranks", get(ranks::list_rank_tiers))
        .route("/markets/payout-estimate", get(market::payout_estimate))
        .route("/openapi.json", get(openapi::openapi_json));

    let user_routes = rate_limited(
        Router::new()
            .route("/predictions/{id}/votes", post(votes::cast_vote))
            .route("/predictions/{id}/my-votes", get(votes::my_votes))
            .route("/predictions/{id}/comments", post(comments::create_comment))
            .route("/comments/{id}/like", post(comments::toggle_comment_like))
            .route("/comments/{id}", delete(comments::delete_comment))
            .route("/users/me", get(profile::get_me))
            .route("/users/me/rank", get(ranks::get_my_rank))
            .route("/users/me/rank/recalculate", post(ranks::recalculate_my_rank)),
        &state,
    )
    .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let admin_routes = Router::new()
        .route("/predictions", post(predictions::create_prediction))
        .route(
            "/predictions/{id}",
            put(predictions::update_prediction).delete(predictions::delete_prediction),
        )
        .route("/predictions/{id}/resolve", post(predictions::resolve_prediction))
        .route("/categories", post(categories::create_category))
        .route(
            "/categories/{id}",
            put(categories::update_category).delete(categories::delete_category),
        )
        .route("/stats", get(admin::get_stats))
        .route("/actions", get(admin::list_actions))
        .route("/users", get(admin::list_users))
        .route("/users/{id}", put(admin::update_user))
        .route("/users/{id}/rank/recalculate", post(ranks::admin_recalculate_rank))
        .route("/users/{id}/rank/rewind", post(ranks::admin_rewind_rank))
        // Double middleware protection: Auth first, then Admin check
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let api_routes = public_routes
        .merge(user_routes)
        .nest("/auth", auth_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .nest("/api", api_routes)
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
