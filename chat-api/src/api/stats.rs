use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;

use crate::{
    core::cache::{CacheStats, ResponseCache},
    models::error::ApiResult,
};

#[derive(Clone)]
pub struct StatsState {
    pub cache: ResponseCache,
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub cache: CacheStats,
    pub version: &'static str,
}

pub async fn get_stats(State(state): State<StatsState>) -> ApiResult<impl IntoResponse> {
    let stats = SystemStats {
        cache: state.cache.stats().await,
        version: env!("CARGO_PKG_VERSION"),
    };

    Ok(Json(stats))
}
