//! Login, logout and session status.
//!
//! The login route is public and guarded by the per-client rate limiter.
//! Well-formed attempts count against it before the credential is checked,
//! so throttled clients learn nothing about their guesses. Requests missing
//! a field are rejected without using up a slot.

use super::errors::ApiError;
use super::extractors::{ClientIp, CurrentSession, FormFields};
use super::handlers::AppState;
use axum::extract::State;
use axum::response::Html;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use zeroize::Zeroize;

const LOGIN_PAGE: &str = include_str!("../../assets/login.html");

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub redirect: String,
    pub csrf_token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub csrf_token: Option<String>,
}

/// GET /login
pub async fn login_page() -> Html<&'static str> {
    Html(LOGIN_PAGE)
}

/// POST /login: form fields `username` and `password`.
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    CurrentSession(session): CurrentSession,
    mut form: FormFields,
) -> Result<Json<LoginResponse>, ApiError> {
    let username = form.take("username");
    let mut password = form.take("password");
    let (Some(username), Some(pw)) = (username.as_deref(), password.as_deref()) else {
        return Err(ApiError::BadRequest("username and password are required".into()));
    };

    if !state.login_limiter.is_allowed(&ip.to_string()) {
        if let Some(p) = password.as_mut() {
            p.zeroize();
        }
        return Err(ApiError::RateLimited);
    }

    let valid = state.credential.verify(username, pw);
    if let Some(p) = password.as_mut() {
        p.zeroize();
    }
    if !valid {
        warn!(client = %ip, "failed login attempt");
        return Err(ApiError::InvalidCredentials);
    }

    let csrf_token = state.policy.login(&mut session.lock(), &state.csrf);
    info!(client = %ip, "admin logged in");

    Ok(Json(LoginResponse {
        redirect: "/".to_string(),
        csrf_token,
    }))
}

/// POST /logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
) -> Json<Value> {
    state.policy.logout(&mut session.lock());
    info!("admin logged out");
    Json(json!({ "redirect": "/login" }))
}

/// GET /api/session: whether the caller is logged in, plus the CSRF token
/// to echo on mutating requests.
pub async fn session_status(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
) -> Json<SessionResponse> {
    let mut session = session.lock();
    if state.policy.is_authenticated(&mut session) {
        let token = state.csrf.issue_token(&mut session);
        Json(SessionResponse {
            authenticated: true,
            csrf_token: Some(token),
        })
    } else {
        Json(SessionResponse {
            authenticated: false,
            csrf_token: None,
        })
    }
}
