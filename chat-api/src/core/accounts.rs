use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::auth::{AuthManager, hash_password, verify_password};
use crate::core::cache::{CacheNamespace, ResponseCache};
use crate::core::storage::{RecordStore, StoreError};
use crate::models::error::{ApiError, ApiResult};
use crate::models::records::{NewUser, User, UserPatch};
use crate::models::requests::{LoginRequest, RegisterRequest, TokenResponse, UpdateUserRequest};

/// User registration, login and profile maintenance
pub struct AccountManager {
    records: Arc<dyn RecordStore>,
    cache: ResponseCache,
    auth: Arc<AuthManager>,
}

impl AccountManager {
    pub fn new(records: Arc<dyn RecordStore>, cache: ResponseCache, auth: Arc<AuthManager>) -> Self {
        Self {
            records,
            cache,
            auth,
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> ApiResult<User> {
        request.validate()?;

        let user = self
            .records
            .create_user(NewUser {
                email: request.email,
                username: request.username,
                password_hash: hash_password(&request.password)?,
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    ApiError::Conflict("Username or email already registered".to_string())
                },
                other => other.into(),
            })?;

        info!("Registered user {}", user.id);
        Ok(user)
    }

    pub async fn login(&self, request: LoginRequest) -> ApiResult<TokenResponse> {
        let rejected = || ApiError::Unauthorized("Incorrect username or password".to_string());

        let user = self
            .records
            .find_user_by_username(&request.username)
            .await?
            .ok_or_else(rejected)?;

        if !verify_password(&request.password, &user.password_hash) {
            warn!("Failed login for {}", request.username);
            return Err(rejected());
        }
        if !user.is_active {
            return Err(ApiError::Forbidden("User account is inactive".to_string()));
        }

        let token = self
            .auth
            .generate_token(user.id)
            .map_err(|e| ApiError::Internal(format!("token signing failed: {e}")))?;

        Ok(TokenResponse::bearer(token))
    }

    pub async fn me(&self, user_id: Uuid) -> ApiResult<User> {
        let user = self
            .cache
            .get_or_load(CacheNamespace::Users, user_id, "me", &[], || {
                self.records.get_user(user_id)
            })
            .await?;
        Ok(user)
    }

    pub async fn update_me(&self, user_id: Uuid, request: UpdateUserRequest) -> ApiResult<User> {
        request.validate()?;

        let password_hash = match &request.password {
            Some(password) => Some(hash_password(password)?),
            None => None,
        };
        let patch = UserPatch {
            email: request.email,
            username: request.username,
            password_hash,
        };

        let user = self
            .records
            .update_user(user_id, patch)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => {
                    ApiError::Conflict("Username or email already registered".to_string())
                },
                other => other.into(),
            })?;

        self.cache.invalidate(user_id, &[CacheNamespace::Users]).await;
        Ok(user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> ApiResult<User> {
        Ok(self.records.get_user(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::CacheConfig;
    use crate::core::storage::{InMemoryCacheStore, InMemoryRecordStore};

    fn manager() -> AccountManager {
        let cache = ResponseCache::new(
            Arc::new(InMemoryCacheStore::default()),
            CacheConfig::default(),
        );
        AccountManager::new(
            Arc::new(InMemoryRecordStore::new()),
            cache,
            Arc::new(AuthManager::new("test-secret".to_string(), 1)),
        )
    }

    fn alice() -> RegisterRequest {
        RegisterRequest {
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            password: "wonderland".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let accounts = manager();
        let user = accounts.register(alice()).await.unwrap();
        assert_ne!(user.password_hash, "wonderland");

        let token = accounts
            .login(LoginRequest {
                username: "alice".to_string(),
                password: "wonderland".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(token.token_type, "bearer");

        let claims = accounts.auth.verify_token(&token.access_token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let accounts = manager();
        accounts.register(alice()).await.unwrap();

        let err = accounts
            .login(LoginRequest {
                username: "alice".to_string(),
                password: "looking-glass".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err = accounts
            .login(LoginRequest {
                username: "nobody".to_string(),
                password: "wonderland".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let accounts = manager();
        accounts.register(alice()).await.unwrap();

        let err = accounts.register(alice()).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_register_validates_input() {
        let accounts = manager();
        let mut request = alice();
        request.password = "short".to_string();

        let err = accounts.register(request).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_me_refreshes_cached_profile() {
        let accounts = manager();
        let user = accounts.register(alice()).await.unwrap();

        assert_eq!(accounts.me(user.id).await.unwrap().username, "alice");

        accounts
            .update_me(
                user.id,
                UpdateUserRequest {
                    username: Some("alice2".to_string()),
                    password: Some("new-password".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let me = accounts.me(user.id).await.unwrap();
        assert_eq!(me.username, "alice2");
        assert_eq!(me.email, "alice@example.com");

        assert!(
            accounts
                .login(LoginRequest {
                    username: "alice2".to_string(),
                    password: "new-password".to_string(),
                })
                .await
                .is_ok()
        );
    }
}
