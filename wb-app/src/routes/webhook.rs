//! Meta webhook endpoint: verification handshake and message ingress.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use wb_channels::InboundMessage;

pub const WEBHOOK_PATH: &str = "/webhooks/whatsapp";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Clone)]
struct WebhookState {
    inbound_tx: mpsc::Sender<InboundMessage>,
    verify_token: String,
    app_secret: Option<String>,
}

pub fn router(
    inbound_tx: mpsc::Sender<InboundMessage>,
    verify_token: String,
    app_secret: Option<String>,
) -> Router {
    let state = Arc::new(WebhookState {
        inbound_tx,
        verify_token: verify_token.trim().to_string(),
        app_secret: app_secret
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
    });
    Router::new()
        .route(WEBHOOK_PATH, get(verify).post(ingest))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

#[tracing::instrument(level = "info", skip_all)]
async fn verify(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<VerifyQuery>,
) -> Response {
    let mode = query.mode.as_deref().map(str::trim).unwrap_or_default();
    let token = query
        .verify_token
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if mode.eq_ignore_ascii_case("subscribe") && !token.is_empty() && token == state.verify_token
    {
        tracing::info!("webhook verification accepted");
        return (StatusCode::OK, query.challenge.unwrap_or_default()).into_response();
    }
    tracing::warn!(mode, "webhook verification rejected");
    (StatusCode::FORBIDDEN, "verification failed".to_string()).into_response()
}

fn error_json(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "error": message,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "info", skip_all, fields(body_len = body.len()))]
async fn ingest(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(secret) = state.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok());
        if !wb_channels::verify_signature(signature, &body, secret) {
            tracing::warn!("webhook signature rejected");
            return error_json(
                StatusCode::UNAUTHORIZED,
                format!("invalid {SIGNATURE_HEADER}"),
            );
        }
    }

    let messages = match wb_channels::decode_webhook(&body) {
        Ok(messages) => messages,
        Err(error) => {
            return error_json(
                StatusCode::BAD_REQUEST,
                format!("invalid whatsapp webhook payload: {error}"),
            );
        }
    };

    let mut accepted = 0usize;
    for inbound in messages {
        if let Err(error) = state.inbound_tx.send(inbound).await {
            return error_json(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("inbound queue closed: {error}"),
            );
        }
        accepted += 1;
    }
    tracing::debug!(accepted, "webhook messages queued");

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "accepted": accepted,
        })),
    )
        .into_response()
}
