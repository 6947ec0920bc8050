//! Request and response bodies of the HTTP surface, with input validation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::records::{ChatPatch, ChatType, Page};

const CHAT_NAME_MAX: usize = 100;
const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 8;

fn invalid(msg: impl Into<String>) -> ApiError {
    ApiError::Validation(msg.into())
}

fn validate_chat_name(name: &str) -> ApiResult<()> {
    let len = name.trim().chars().count();
    if len == 0 || name.chars().count() > CHAT_NAME_MAX {
        return Err(invalid(format!(
            "name must be between 1 and {CHAT_NAME_MAX} characters"
        )));
    }
    Ok(())
}

fn validate_username(username: &str) -> ApiResult<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(invalid(format!(
            "username must be between {USERNAME_MIN} and {USERNAME_MAX} characters"
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> ApiResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(invalid("email is not valid")),
    }
}

fn validate_password(password: &str) -> ApiResult<()> {
    if password.chars().count() < PASSWORD_MIN {
        return Err(invalid(format!(
            "password must be at least {PASSWORD_MIN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl RegisterRequest {
    pub fn validate(&self) -> ApiResult<()> {
        validate_email(&self.email)?;
        validate_username(&self.username)?;
        validate_password(&self.password)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl UpdateUserRequest {
    pub fn validate(&self) -> ApiResult<()> {
        if let Some(email) = &self.email {
            validate_email(email)?;
        }
        if let Some(username) = &self.username {
            validate_username(username)?;
        }
        if let Some(password) = &self.password {
            validate_password(password)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateChatRequest {
    #[serde(default = "CreateChatRequest::default_type")]
    pub chat_type: ChatType,
    pub name: String,
    #[serde(default = "CreateChatRequest::default_active")]
    pub active: bool,
}

impl CreateChatRequest {
    fn default_type() -> ChatType {
        ChatType::Direct
    }

    fn default_active() -> bool {
        true
    }

    pub fn validate(&self) -> ApiResult<()> {
        validate_chat_name(&self.name)
    }
}

/// Validate a partial chat update before it reaches the store
pub fn validate_chat_patch(patch: &ChatPatch) -> ApiResult<()> {
    if let Some(name) = &patch.name {
        validate_chat_name(name)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddMessageRequest {
    pub conversation_id: Uuid,
    pub content: String,
}

impl AddMessageRequest {
    pub fn validate(&self) -> ApiResult<()> {
        if self.content.trim().is_empty() {
            return Err(invalid("content must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachResponseRequest {
    pub response: String,
}

/// `?skip=&limit=` query parameters
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PageQuery {
    pub fn into_page(self) -> ApiResult<Page> {
        let defaults = Page::default();
        let limit = self.limit.unwrap_or(defaults.limit);
        if limit == 0 || limit > Page::MAX_LIMIT {
            return Err(invalid(format!(
                "limit must be between 1 and {}",
                Page::MAX_LIMIT
            )));
        }
        Ok(Page {
            skip: self.skip.unwrap_or(defaults.skip),
            limit,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}
