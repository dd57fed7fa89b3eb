//! Per-session anti-forgery tokens.
//!
//! A token is minted lazily the first time a session needs one and lives as
//! long as the session. Clients echo it back on every state-changing request
//! in a form field, a JSON body field, or the `X-CSRFToken` header.

use crate::clock::SharedClock;
use crate::session::Session;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart};
use axum::http::{header, Extensions, HeaderMap, Method, Request};
use bytes::Bytes;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Form and JSON field name carrying the token.
pub const CSRF_FIELD: &str = "csrf_token";

/// Header carrying the token.
pub const CSRF_HEADER: &str = "x-csrftoken";

/// Why a state-changing request was refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CsrfRejection {
    #[error("CSRF token missing from session")]
    SessionTokenMissing,

    #[error("CSRF token not found in request")]
    RequestTokenMissing,

    #[error("CSRF token verification failed")]
    Mismatch,
}

/// Issues and checks session CSRF tokens.
pub struct CsrfGuard {
    clock: SharedClock,
}

impl CsrfGuard {
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    /// Return the session's token, minting and storing one if it has none.
    pub fn issue_token(&self, session: &mut Session) -> String {
        if let Some(token) = &session.data().csrf_token {
            return token.clone();
        }

        let mut nonce = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let now = self.clock.now();
        let seed = format!(
            "{}.{:06}{}",
            now.timestamp(),
            now.timestamp_subsec_micros(),
            hex::encode(nonce)
        );
        let token = hex::encode(Sha256::digest(seed.as_bytes()));

        session.data_mut().csrf_token = Some(token.clone());
        token
    }

    /// Check a submitted token against the session's token.
    pub fn verify(&self, session: &Session, submitted: Option<&str>) -> Result<(), CsrfRejection> {
        let expected = session
            .data()
            .csrf_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(CsrfRejection::SessionTokenMissing)?;

        let submitted = submitted
            .filter(|t| !t.is_empty())
            .ok_or(CsrfRejection::RequestTokenMissing)?;

        if bool::from(expected.as_bytes().ct_eq(submitted.as_bytes())) {
            Ok(())
        } else {
            Err(CsrfRejection::Mismatch)
        }
    }

    /// Only methods that change state are checked.
    pub fn requires_check(method: &Method) -> bool {
        matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// Find the token a client submitted. Looks at, in order: the form body
/// (URL-encoded or multipart), a JSON body, then the `X-CSRFToken` header.
/// Empty values count as absent. `extensions` are the original request's,
/// so multipart parsing honours the configured body limit.
pub async fn submitted_token(
    headers: &HeaderMap,
    extensions: &Extensions,
    body: &Bytes,
) -> Option<String> {
    let raw_content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let content_type = raw_content_type.to_ascii_lowercase();

    let from_form = if content_type.starts_with("application/x-www-form-urlencoded") {
        form_field(body)
    } else if content_type.starts_with("multipart/form-data") {
        // The boundary is case-sensitive.
        multipart_field(raw_content_type, extensions, body).await
    } else {
        None
    };

    let from_json = || {
        if is_json(&content_type) {
            json_field(body)
        } else {
            None
        }
    };

    from_form
        .filter(|t| !t.is_empty())
        .or_else(|| from_json().filter(|t| !t.is_empty()))
        .or_else(|| {
            headers
                .get(CSRF_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
        })
}

fn is_json(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

fn form_field(body: &Bytes) -> Option<String> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).ok()?;
    pairs
        .into_iter()
        .find(|(name, _)| name == CSRF_FIELD)
        .map(|(_, value)| value)
}

fn json_field(body: &Bytes) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get(CSRF_FIELD)?.as_str().map(|s| s.to_string())
}

async fn multipart_field(
    content_type: &str,
    extensions: &Extensions,
    body: &Bytes,
) -> Option<String> {
    let mut request = Request::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body.clone()))
        .ok()?;
    *request.extensions_mut() = extensions.clone();
    let mut multipart = Multipart::from_request(request, &()).await.ok()?;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some(CSRF_FIELD) {
            return field.text().await.ok();
        }
    }
    None
}
