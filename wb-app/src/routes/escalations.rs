use super::conversation_key;
use crate::server::AppState;
use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/escalations", get(list_escalations))
        .route("/api/v1/escalations/{phone}/resume", post(resume))
        .route("/api/v1/escalations/{phone}/takeover", post(takeover))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_escalations(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "escalations": state.escalations.list(),
    }))
}

#[tracing::instrument(level = "info", skip_all, fields(phone = %phone))]
async fn resume(
    Extension(state): Extension<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Response {
    let key = match conversation_key(&state, &phone) {
        Ok(key) => key,
        Err(response) => return response,
    };
    let was_escalated = state.scheduler.resume(&key);
    Json(serde_json::json!({
        "status": "ok",
        "phone": key.phone,
        "was_escalated": was_escalated,
    }))
    .into_response()
}

/// Manual handoff: same effect as a model-requested escalation, minus the notice.
#[tracing::instrument(level = "info", skip_all, fields(phone = %phone))]
async fn takeover(
    Extension(state): Extension<Arc<AppState>>,
    Path(phone): Path<String>,
) -> Response {
    let key = match conversation_key(&state, &phone) {
        Ok(key) => key,
        Err(response) => return response,
    };
    state.scheduler.escalate(&key);
    Json(serde_json::json!({
        "status": "ok",
        "phone": key.phone,
        "escalated": true,
    }))
    .into_response()
}
