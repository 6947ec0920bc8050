use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;

use super::extract::ApiJson;
use crate::{
    core::{accounts::AccountManager, auth::CurrentUser},
    models::{
        error::ApiResult,
        requests::{LoginRequest, RegisterRequest},
    },
};

#[derive(Clone)]
pub struct AccountState {
    pub accounts: Arc<AccountManager>,
}

pub async fn register(
    State(state): State<AccountState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.accounts.register(request).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AccountState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.accounts.login(request).await?))
}

pub async fn me(
    State(state): State<AccountState>,
    Extension(caller): Extension<CurrentUser>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.accounts.me(caller.id()).await?))
}
