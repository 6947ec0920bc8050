use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::extract::{ApiJson, ApiPath};
use crate::{
    core::{auth::CurrentUser, branching::BranchCoordinator},
    models::{branch::BranchCreate, error::ApiResult},
};

#[derive(Clone)]
pub struct BranchState {
    pub branches: Arc<BranchCoordinator>,
}

pub async fn create_branch(
    State(state): State<BranchState>,
    Extension(caller): Extension<CurrentUser>,
    ApiJson(request): ApiJson<BranchCreate>,
) -> ApiResult<impl IntoResponse> {
    info!(
        "Branch requested from {}/{}",
        request.parent_chat_id, request.message_id
    );

    let branch = state
        .branches
        .create_branch(request.parent_chat_id, request.message_id, caller.id())
        .await?;

    Ok((StatusCode::CREATED, Json(branch)))
}

pub async fn get_branches(
    State(state): State<BranchState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.branches.list_branches(chat_id, caller.id()).await?))
}

pub async fn set_active_branch(
    State(state): State<BranchState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(branch_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state.branches.set_active_branch(branch_id, caller.id()).await?,
    ))
}

pub async fn get_branch_tree(
    State(state): State<BranchState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.branches.get_branch_tree(chat_id, caller.id()).await?))
}
