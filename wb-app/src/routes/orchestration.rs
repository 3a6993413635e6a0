use super::{conversation_key, error_response};
use crate::server::AppState;
use crate::settings::OrchestrationSnapshot;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Extension, Json};
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/orchestration",
            get(get_orchestration).put(put_orchestration),
        )
        .route(
            "/api/v1/orchestration/conversations/{phone}",
            put(put_conversation_override),
        )
}

#[derive(Debug, Deserialize)]
struct GlobalSwitchBody {
    enabled: Option<bool>,
}

/// `enabled: null` (or absent) clears the override.
#[derive(Debug, Deserialize)]
struct OverrideBody {
    #[serde(default)]
    enabled: Option<bool>,
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_orchestration(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<OrchestrationSnapshot> {
    Json(state.settings.snapshot())
}

#[tracing::instrument(level = "info", skip_all)]
async fn put_orchestration(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<GlobalSwitchBody>,
) -> Response {
    let Some(enabled) = body.enabled else {
        return error_response(StatusCode::BAD_REQUEST, "enabled must be true or false");
    };
    state.settings.set_global(enabled);
    Json(state.settings.snapshot()).into_response()
}

#[tracing::instrument(level = "info", skip_all, fields(phone = %phone))]
async fn put_conversation_override(
    Extension(state): Extension<Arc<AppState>>,
    Path(phone): Path<String>,
    Json(body): Json<OverrideBody>,
) -> Response {
    let key = match conversation_key(&state, &phone) {
        Ok(key) => key,
        Err(response) => return response,
    };
    state.settings.set_override(&key, body.enabled);
    if body.enabled == Some(false) {
        state.scheduler.cancel_all(&key);
    }
    Json(state.settings.snapshot()).into_response()
}
