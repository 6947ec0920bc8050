use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use super::chats::ChatState;
use super::extract::{ApiJson, ApiPath, ApiQuery};
use crate::{
    core::auth::CurrentUser,
    models::{
        error::ApiResult,
        requests::{AddMessageRequest, AttachResponseRequest, PageQuery},
    },
};

pub async fn add_message(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiJson(request): ApiJson<AddMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    request.validate()?;

    let message = state
        .chats
        .add_message(caller.id(), request.conversation_id, request.content)
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn conversation_messages(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(conversation_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.into_page()?;
    Ok(Json(
        state
            .chats
            .conversation_messages(caller.id(), conversation_id, page)
            .await?,
    ))
}

pub async fn get_message(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(message_id): ApiPath<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.chats.get_message(caller.id(), message_id).await?))
}

pub async fn chat_messages(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(chat_id): ApiPath<Uuid>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<impl IntoResponse> {
    let page = query.into_page()?;
    Ok(Json(
        state.chats.chat_messages(caller.id(), chat_id, page).await?,
    ))
}

pub async fn attach_response(
    State(state): State<ChatState>,
    Extension(caller): Extension<CurrentUser>,
    ApiPath(message_id): ApiPath<Uuid>,
    ApiJson(request): ApiJson<AttachResponseRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .chats
            .attach_response(caller.id(), message_id, request.response)
            .await?,
    ))
}
