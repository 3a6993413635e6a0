use crate::config::ServerConfig;
use axum::Json;
use axum::body::Body;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Bearer token guarding the control API. `None` leaves it open.
#[derive(Debug, Clone, Default)]
pub struct ControlAuthPolicy {
    token: Option<String>,
}

impl ControlAuthPolicy {
    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self {
            token: cfg
                .control_token
                .as_deref()
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned),
        }
    }

    pub fn is_open(&self) -> bool {
        self.token.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ControlAuthPolicyExt(pub ControlAuthPolicy);

fn parse_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.trim().splitn(2, char::is_whitespace);
    let scheme = parts.next()?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = parts.next()?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

fn unauthorized(code: &str, message: &str) -> Response {
    tracing::warn!(error_code = code, error = %message, "control api auth rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": "error",
            "error": message,
            "error_code": code,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_control_auth(req: Request<Body>, next: Next) -> Response {
    let policy = req
        .extensions()
        .get::<ControlAuthPolicyExt>()
        .map(|v| v.0.clone())
        .unwrap_or_default();
    let Some(expected) = policy.token.as_deref() else {
        return next.run(req).await;
    };
    let Some(provided) = parse_bearer_token(req.headers()) else {
        return unauthorized("missing_bearer_token", "missing bearer token");
    };
    if provided != expected {
        return unauthorized("invalid_bearer_token", "invalid bearer token");
    }
    next.run(req).await
}
