//! Hardening headers attached to every response.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;
use tracing::warn;

/// The fixed header set. Only the two CSP hosts are configurable, and only at
/// startup.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn new(image_host: &str, style_host: &str) -> Self {
        let csp = format!(
            "default-src 'self'; img-src 'self' data: {image_host}; \
             style-src 'self' 'unsafe-inline' {style_host}; \
             script-src 'self' 'unsafe-inline' 'unsafe-eval'; \
             font-src 'self' data:; connect-src 'self'"
        );
        let csp = HeaderValue::from_str(&csp).unwrap_or_else(|_| {
            warn!("CSP hosts contain invalid header characters, dropping them");
            HeaderValue::from_static(
                "default-src 'self'; img-src 'self' data:; style-src 'self' 'unsafe-inline'; \
                 script-src 'self' 'unsafe-inline' 'unsafe-eval'; font-src 'self' data:; \
                 connect-src 'self'",
            )
        });

        let headers = vec![
            (
                HeaderName::from_static("x-content-type-options"),
                HeaderValue::from_static("nosniff"),
            ),
            (
                HeaderName::from_static("x-frame-options"),
                HeaderValue::from_static("SAMEORIGIN"),
            ),
            (
                HeaderName::from_static("x-xss-protection"),
                HeaderValue::from_static("1; mode=block"),
            ),
            (
                HeaderName::from_static("strict-transport-security"),
                HeaderValue::from_static("max-age=31536000; includeSubDomains"),
            ),
            (HeaderName::from_static("content-security-policy"), csp),
            (
                HeaderName::from_static("referrer-policy"),
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
        ];
        Self { headers }
    }

    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.append(name.clone(), value.clone());
        }
    }
}

/// Outermost middleware: runs after every other layer and handler.
pub async fn inject_security_headers(
    State(headers): State<Arc<SecurityHeaders>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    headers.apply(response.headers_mut());
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn headers() -> SecurityHeaders {
        SecurityHeaders::new("https://img.example", "https://css.example")
    }

    #[test]
    fn test_csp_contains_hosts() {
        let mut map = HeaderMap::new();
        headers().apply(&mut map);
        let csp = map.get("content-security-policy").unwrap().to_str().unwrap();
        assert!(csp.contains("img-src 'self' data: https://img.example;"));
        assert!(csp.contains("style-src 'self' 'unsafe-inline' https://css.example;"));
        assert!(csp.ends_with("connect-src 'self'"));
    }

    #[test]
    fn test_all_six_headers() {
        let mut map = HeaderMap::new();
        headers().apply(&mut map);
        assert_eq!(map.len(), 6);
        assert_eq!(map["x-content-type-options"], "nosniff");
        assert_eq!(map["x-frame-options"], "SAMEORIGIN");
        assert_eq!(map["x-xss-protection"], "1; mode=block");
        assert_eq!(
            map["strict-transport-security"],
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(map["referrer-policy"], "strict-origin-when-cross-origin");
    }

    #[test]
    fn test_invalid_host_falls_back() {
        let mut map = HeaderMap::new();
        SecurityHeaders::new("bad\nhost", "x").apply(&mut map);
        let csp = map.get("content-security-policy").unwrap().to_str().unwrap();
        assert!(!csp.contains("bad"));
    }

    #[tokio::test]
    async fn test_middleware_covers_fallback_404() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(
                Arc::new(headers()),
                inject_security_headers,
            ));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");
    }
}
