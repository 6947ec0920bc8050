use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use uuid::Uuid;

use super::auth::AccountState;
use super::extract::{ApiJson, ApiPath};
use crate::{
    core::auth::CurrentUser,
    models::{error::ApiResult, requests::UpdateUserRequest},
};

pub async fn update_me(
    State(state): State<AccountState>,
    Extension(caller): Extension<CurrentUser>,
    ApiJson(request): ApiJson<UpdateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.accounts.update_me(caller.id(), request).await?))
}

pub async fn get_user(
    State(state): State<AccountState>,
    ApiPath(user_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.accounts.get_user(user_id).await?))
}
