use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub provider: String,
    pub vector_enabled: bool,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "ok",
        provider: state.provider.name().to_string(),
        vector_enabled: state.vector.is_some(),
    })
}

pub async fn ping_handler() -> &'static str {
    "pong"
}
