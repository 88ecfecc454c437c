//! `X-Api-Key` auth and the login-cookie session, implemented
//! as a `tower` middleware layer grounded in the teacher's existing use
//! of `tower-http` (`cors`, `trace`) extended with a custom layer in the
//! same idiom.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::rest::AppState;

pub const SESSION_COOKIE: &str = "pvc_session";

/// Checked by the auth middleware: either a matching `X-Api-Key` header
/// or a valid session cookie issued by [`login`] lets the request
/// through. `/metrics` is exempted at the router level.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if state.api_keys.is_empty() {
        return next.run(request).await;
    }

    if let Some(key) = request.headers().get("X-Api-Key").and_then(|v| v.to_str().ok()) {
        if state.api_keys.contains(key) {
            return next.run(request).await;
        }
    }

    if let Some(cookie_header) = request.headers().get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        if cookie_value(cookie_header, SESSION_COOKIE)
            .map(|session| state.api_keys.contains(session))
            .unwrap_or(false)
        {
            return next.run(request).await;
        }
    }

    (StatusCode::UNAUTHORIZED, Json(serde_json::json!({"error": "missing or invalid credentials"})))
        .into_response()
}

fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header
        .split(';')
        .filter_map(|kv| kv.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    pub ok: bool,
}

/// `POST /api/v1/login`: exchanges a valid API key for a session cookie.
#[utoipa::path(
    post,
    path = "/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established", body = LoginResponse),
        (status = 401, description = "Invalid API key", body = LoginResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Response {
    if !state.api_keys.is_empty() && !state.api_keys.contains(&req.api_key) {
        return (StatusCode::UNAUTHORIZED, Json(LoginResponse { ok: false })).into_response();
    }

    let cookie = format!("{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Strict", req.api_key);
    (
        [(header::SET_COOKIE, cookie)],
        Json(LoginResponse { ok: true }),
    )
        .into_response()
}

pub fn parse_keys(raw: &[String]) -> HashSet<String> {
    raw.iter().cloned().collect()
}
