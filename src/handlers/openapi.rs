// src/handlers/openapi.rs

use axum::{Json, response::IntoResponse};
use utoipa::OpenApi;

use crate::{
    models::{
        admin::{AdminAction, AdminStats},
        category::{Category, CategoryTree, CreateCategoryRequest, UpdateCategoryRequest},
        comment::{CommentCreated, CommentResponse, CreateCommentRequest, LikeToggled},
        prediction::{
            CreatePredictionRequest, OptionLabel, OptionResponse, PredictionResponse,
            ResolvePredictionRequest, ResolveResponse, UpdatePredictionRequest,
        },
        rank::{LeaderboardEntry, PublicRank, RankUpgradeEntry, RewindRequest},
        user::{CreateUserRequest, LoginRequest, MeResponse},
        vote::{CastVoteRequest, CastVoteResponse, Vote},
    },
    services::{
        lifecycle::{DisplayTemplate, PredictionStatus, VoteSide},
        payout::PayoutEstimate,
        rank_engine::{BreakdownItem, Rank, RankBlocker, RankComponent},
        rank_service::RankRecalculation,
        tally::OptionTally,
    },
};

#[derive(OpenApi)]
#[openapi(
    info(title = "TruthVote API"),
    components(schemas(
        AdminAction,
        AdminStats,
        BreakdownItem,
        CastVoteRequest,
        CastVoteResponse,
        Category,
        CategoryTree,
        CommentCreated,
        CommentResponse,
        CreateCategoryRequest,
        CreateCommentRequest,
        CreatePredictionRequest,
        CreateUserRequest,
        DisplayTemplate,
        LeaderboardEntry,
        LikeToggled,
        LoginRequest,
        MeResponse,
        OptionLabel,
        OptionResponse,
        OptionTally,
        PayoutEstimate,
        PredictionResponse,
        PredictionStatus,
        PublicRank,
        Rank,
        RankBlocker,
        RankComponent,
        RankRecalculation,
        RankUpgradeEntry,
        ResolvePredictionRequest,
        ResolveResponse,
        RewindRequest,
        UpdateCategoryRequest,
        UpdatePredictionRequest,
        Vote,
        VoteSide,
    ))
)]
pub struct ApiDoc;

/// The API's schema document.
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
