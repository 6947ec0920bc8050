use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use uuid::Uuid;

use super::extract::{ApiJson, ApiPath, ApiQuery};
use crate::{
    core::{auth::CurrentUser, chats::ChatManager},
    models::{
        error::ApiResult,
        records::{ChatPatch, NewChat},
        requests::{CreateChatRequest, PageQuery, StatusResponse, validate_chat_patch},
    },
};

#[derive(Clone)]
pub struct ChatState {
    pub chats: Arc<ChatManager>,
}

pub async fn create_chat(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiJson(request): ApiJson<CreateChatRequest>,
) -> ApiResult<impl IntoResponse> {
    request.validate()?;

    let chat = state
        .chats
        .create_chat(
            caller.id(),
            NewChat {
                chat_type: request.chat_type,
                name: request.name,
                active: request.active,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(chat)))
}

pub async fn list_chats(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.into_page()?;
    Ok(Json(state.chats.list_chats(caller.id(), page).await?))
}

pub async fn get_chat(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chats.get_chat(caller.id(), chat_id).await?))
}

pub async fn update_chat(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
    ApiJson(patch): ApiJson<ChatPatch>,
) -> ApiResult<impl IntoResponse> {
    validate_chat_patch(&patch)?;
    Ok(Json(
        state.chats.update_chat(caller.id(), chat_id, patch).await?,
    ))
}

pub async fn delete_chat(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    state.chats.delete_chat(caller.id(), chat_id).await?;
    Ok(Json(StatusResponse::ok("Chat deleted successfully")))
}

pub async fn get_chat_content(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chats.get_content(caller.id(), chat_id).await?))
}
