use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use uuid::Uuid;

use super::chats::ChatState;
use super::extract::{ApiPath, ApiQuery};
use crate::{
    core::auth::CurrentUser,
    models::{
        error::ApiResult,
        requests::{PageQuery, StatusResponse},
    },
};

pub async fn list_conversations(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.into_page()?;
    Ok(Json(state.chats.list_conversations(caller.id(), page).await?))
}

pub async fn get_conversation(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chats.get_conversation(caller.id(), id).await?))
}

pub async fn delete_conversation(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.chats.delete_conversation(caller.id(), id).await?;
    Ok(Json(StatusResponse::ok("Conversation deleted successfully")))
}
