use anyhow::Result;
use axum::{
    Json, Router,
    routing::{delete, get, post, put},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod core;
mod middleware;
mod models;

use crate::core::{
    accounts::AccountManager,
    auth::{AuthManager, AuthState, auth_middleware},
    branching::BranchCoordinator,
    cache::ResponseCache,
    chats::ChatManager,
    config::Settings,
    storage::Stores,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::new()?;

    info!(
        "Starting chat API on {}:{}",
        settings.server.host, settings.server.port
    );

    let stores = Stores::from_settings(&settings).await?;
    let app = create_app(&settings, stores);

    let listener =
        tokio::net::TcpListener::bind((settings.server.host.as_str(), settings.server.port))
            .await?;

    info!("Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

pub(crate) fn create_app(settings: &Settings, stores: Stores) -> Router {
    use crate::middleware::{error_handler, request_id};
    use axum::middleware;

    let cache = ResponseCache::new(stores.cache.clone(), settings.cache.clone());
    let auth = Arc::new(AuthManager::new(
        settings.auth.secret_key.clone(),
        settings.auth.token_expiry_hours,
    ));

    let auth_state = AuthState {
        auth: auth.clone(),
        records: stores.records.clone(),
    };
    let account_state = api::auth::AccountState {
        accounts: Arc::new(AccountManager::new(
            stores.records.clone(),
            cache.clone(),
            auth,
        )),
    };
    let chat_state = api::chats::ChatState {
        chats: Arc::new(ChatManager::new(
            stores.records.clone(),
            stores.contents.clone(),
            cache.clone(),
        )),
    };
    let branch_state = api::branches::BranchState {
        branches: Arc::new(BranchCoordinator::new(
            stores.records.clone(),
            stores.contents.clone(),
            cache.clone(),
            settings.branching.clone(),
        )),
    };
    let stats_state = api::stats::StatsState { cache };

    let require_auth = || middleware::from_fn_with_state(auth_state.clone(), auth_middleware);

    let public_routes = Router::new()
        .route("/auth/register", post(api::auth::register))
        .route("/auth/login", post(api::auth::login))
        .with_state(account_state.clone());

    let account_routes = Router::new()
        .route("/auth/me", get(api::auth::me))
        .route("/users/me", get(api::auth::me).put(api::users::update_me))
        .route("/users/:user_id", get(api::users::get_user))
        .route_layer(require_auth())
        .with_state(account_state);

    let chat_routes = Router::new()
        .route("/chats", get(api::chats::list_chats))
        .route("/chats/create-chat", post(api::chats::create_chat))
        .route(
            "/chats/:chat_id",
            get(api::chats::get_chat).put(api::chats::update_chat),
        )
        .route("/chats/:chat_id/content", get(api::chats::get_chat_content))
        .route(
            "/chats/delete-chat/:chat_id",
            delete(api::chats::delete_chat),
        )
        .route(
            "/conversations",
            get(api::conversations::list_conversations),
        )
        .route(
            "/conversations/:id",
            get(api::conversations::get_conversation)
                .delete(api::conversations::delete_conversation),
        )
        .route("/messages/add-message", post(api::messages::add_message))
        .route(
            "/messages/conversation/:id",
            get(api::messages::conversation_messages),
        )
        .route(
            "/messages/get-chat/:chat_id",
            get(api::messages::chat_messages),
        )
        .route("/messages/:message_id", get(api::messages::get_message))
        .route(
            "/messages/:message_id/response",
            put(api::messages::attach_response),
        )
        .route_layer(require_auth())
        .with_state(chat_state);

    let branch_routes = Router::new()
        .route(
            "/branches/create-branch",
            post(api::branches::create_branch),
        )
        .route(
            "/branches/get-branches/:chat_id",
            get(api::branches::get_branches),
        )
        .route(
            "/branches/set-active-branch/:branch_id",
            get(api::branches::set_active_branch),
        )
        .route(
            "/branches/get-branch-tree/:chat_id",
            get(api::branches::get_branch_tree),
        )
        .route_layer(require_auth())
        .with_state(branch_state);

    let stats_routes = Router::new()
        .route("/stats", get(api::stats::get_stats))
        .with_state(stats_state);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .merge(public_routes)
        .merge(account_routes)
        .merge(chat_routes)
        .merge(branch_routes)
        .merge(stats_routes);

    Router::new()
        .nest(&settings.server.api_prefix, api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(error_handler::handle_errors))
                .layer(middleware::from_fn(request_id::add_request_id)),
        )
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
