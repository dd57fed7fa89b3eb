//! Session and authorization middleware.
//!
//! `load_session` wraps every route: it loads the session named by the
//! cookie, hands it to the rest of the stack, and persists it afterwards.
//! `require_auth` wraps protected routes only.

use super::errors::ApiError;
use super::handlers::AppState;
use crate::security::csrf::{self, CsrfGuard};
use crate::session::{Session, SessionHandle, SessionStore};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;
use tracing::{debug, warn};

pub async fn load_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let cookie_id = state.cookies.extract(request.headers());
    let session = cookie_id
        .as_deref()
        .and_then(|id| state.sessions.load(id).map(|data| Session::existing(id.to_string(), data)))
        .unwrap_or_default();

    let handle = SessionHandle::new(session);
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    if let Some(cookie) = persist_session(&state, &handle, cookie_id.is_some()) {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(e) => warn!("unencodable session cookie: {}", e),
        }
    }
    response
}

/// Write the session back to the store. Returns the `Set-Cookie` value to
/// send, if any.
fn persist_session(state: &AppState, handle: &SessionHandle, had_cookie: bool) -> Option<String> {
    let session = handle.lock();

    if session.data().is_empty() {
        if let Some(id) = session.id() {
            if session.is_modified() {
                state.sessions.remove(id);
                debug!("session destroyed");
            }
        }
        // Also expires cookies naming sessions the store has already forgotten.
        return had_cookie.then(|| state.cookies.clear_cookie());
    }

    let refresh = state.config.session.refresh_each_request && session.data().permanent;
    if !session.is_modified() && !refresh {
        return None;
    }

    let id = match session.id() {
        Some(id) if !session.wants_new_id() => id.to_string(),
        old => {
            if let Some(old) = old {
                state.sessions.remove(old);
            }
            SessionStore::generate_id()
        }
    };
    state.sessions.save(&id, session.data().clone());
    Some(state.cookies.set_cookie(&id, session.data().permanent))
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(handle) = request.extensions().get::<SessionHandle>().cloned() else {
        return ApiError::Internal("session middleware not installed".into()).into_response();
    };

    let mutating = CsrfGuard::requires_check(request.method());
    let authenticated = state.policy.is_authenticated(&mut handle.lock());

    if !authenticated {
        debug!(method = %request.method(), uri = %request.uri(), "unauthenticated request");
        if mutating {
            return ApiError::AuthenticationRequired.into_response();
        }
        return Redirect::to("/login").into_response();
    }

    if !mutating {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.config.max_upload_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("could not buffer request body: {}", e);
            return ApiError::PayloadTooLarge.into_response();
        }
    };

    let submitted = csrf::submitted_token(&parts.headers, &parts.extensions, &bytes).await;
    let verdict = state.csrf.verify(&handle.lock(), submitted.as_deref());
    if let Err(rejection) = verdict {
        warn!(method = %parts.method, uri = %parts.uri, "CSRF check failed: {}", rejection);
        return ApiError::from(rejection).into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
