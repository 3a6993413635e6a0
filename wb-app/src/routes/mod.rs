pub mod escalations;
pub mod health;
pub mod orchestration;
pub mod webhook;

use crate::server::AppState;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use wb_channels::{ConversationKey, PhoneNumber};

/// Control API routes. The webhook router is mounted separately.
pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(orchestration::router())
        .merge(escalations::router())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "error": message.into(),
        })),
    )
        .into_response()
}

/// Resolves a path phone against the business number this process serves.
fn conversation_key(state: &AppState, raw_phone: &str) -> Result<ConversationKey, Response> {
    PhoneNumber::normalize(raw_phone)
        .map(|phone| ConversationKey::new(state.session.clone(), phone))
        .ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid phone number: {raw_phone:?}"),
            )
        })
}
