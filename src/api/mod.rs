//! HTTP API: routes, middleware stack and handlers

pub mod auth;
mod errors;
mod extractors;
pub mod gate;
pub mod handlers;

pub use errors::ApiError;
pub use extractors::{resolve_client_ip, ClientIp, CurrentSession, FormFields};
pub use handlers::{AppState, StateError};

use crate::security::headers::inject_security_headers;
use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::Request;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// Layers, outermost first: security headers, request tracing, panic
/// recovery, body limit, session. Protected routes additionally pass the
/// auth gate.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(handlers::index))
        .route("/data/:id", get(handlers::data_detail))
        .route("/search", get(handlers::search))
        .route("/api/item", post(handlers::create_item))
        .route(
            "/api/item/:id",
            put(handlers::update_item).delete(handlers::delete_item),
        )
        .route("/upload_image", post(handlers::upload_image))
        .route("/img/*file", get(handlers::serve_image))
        .route("/api/delete_image", post(handlers::delete_image))
        .route("/api/cleanup_images", post(handlers::cleanup_images))
        .route("/logout", post(auth::logout))
        .route_layer(from_fn_with_state(state.clone(), gate::require_auth));

    let public = Router::new()
        .route("/login", get(auth::login_page).post(auth::login))
        .route("/api/session", get(auth::session_status))
        .route("/static/img/*file", get(handlers::serve_image))
        .route("/health", get(handlers::health_check));

    with_layers(public.merge(protected), state)
}

/// Wrap `routes` in the shared middleware stack and attach the state.
fn with_layers(routes: Router<Arc<AppState>>, state: Arc<AppState>) -> Router {
    routes
        .layer(from_fn_with_state(state.clone(), gate::load_session))
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
            tracing::info_span!(
                "request",
                id = %uuid::Uuid::new_v4(),
                method = %request.method(),
                uri = %request.uri(),
            )
        }))
        .layer(from_fn_with_state(
            state.security_headers.clone(),
            inject_security_headers,
        ))
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}
