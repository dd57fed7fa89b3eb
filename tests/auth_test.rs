//! Login, rate limiting, session expiry and logout over HTTP

mod common;

use chrono::Duration;
use common::{TestServer, CLIENT_IP, PASSWORD, USERNAME};
use record_admin::api::{AppState, StateError};
use record_admin::clock::ManualClock;
use record_admin::config::{Config, MAX_DURATION_SECS};
use serde_json::Value;
use std::sync::Arc;

#[tokio::test]
async fn test_login_success_returns_token_and_cookie() {
    let server = TestServer::start().await;
    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    assert_eq!(response.status(), 200);

    let cookie = response
        .headers()
        .get("set-cookie")
        .expect("no session cookie")
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Max-Age=300"));
    assert!(!cookie.contains("Secure"));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["redirect"], "/");
    assert_eq!(body["csrf_token"].as_str().unwrap().len(), 64);

    let index = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(index.status(), 200);
}

#[tokio::test]
async fn test_wrong_password_is_401() {
    let server = TestServer::start().await;
    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, "wrong")
        .await;
    assert_eq!(response.status(), 401);
    assert!(response.headers().get("set-cookie").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "InvalidCredentials");

    let response = server
        .login_as(&server.client, CLIENT_IP, "root", PASSWORD)
        .await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_sixth_attempt_is_rate_limited() {
    let server = TestServer::start().await;
    for attempt in 1..=5 {
        let response = server
            .login_as(&server.client, CLIENT_IP, USERNAME, "wrong")
            .await;
        assert_eq!(response.status(), 401, "attempt {attempt}");
    }

    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, "wrong")
        .await;
    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "RateLimited");

    // Even the right password is refused while throttled.
    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    assert_eq!(response.status(), 429);

    // Another client is unaffected.
    let response = server
        .login_as(&TestServer::new_client(), "10.0.0.2", USERNAME, PASSWORD)
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_rate_limit_releases_after_period() {
    let server = TestServer::start().await;
    for _ in 0..5 {
        server
            .login_as(&server.client, CLIENT_IP, USERNAME, "wrong")
            .await;
    }
    server.clock.advance(Duration::seconds(299));
    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    assert_eq!(response.status(), 429);

    server.clock.advance(Duration::seconds(1));
    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_login_requires_both_fields() {
    let server = TestServer::start().await;
    let response = server
        .client
        .post(server.url("/login"))
        .form(&[("username", USERNAME)])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_login_accepts_multipart_form() {
    let server = TestServer::start().await;
    let form = reqwest::multipart::Form::new()
        .text("username", USERNAME)
        .text("password", PASSWORD);
    let response = server
        .client
        .post(server.url("/login"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_unauthenticated_read_redirects_to_login() {
    let server = TestServer::start().await;
    for path in ["/", "/data/data_1", "/search?q=x", "/img/a.png"] {
        let response = server.client.get(server.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 303, "{path}");
        assert_eq!(response.headers()["location"], "/login");
    }
}

#[tokio::test]
async fn test_unauthenticated_write_is_401() {
    let server = TestServer::start().await;
    let response = server
        .client
        .delete(server.url("/api/item/data_1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "AuthenticationRequired");
}

#[tokio::test]
async fn test_session_expires_after_lifetime() {
    let server = TestServer::start().await;
    server.login().await;

    server.clock.advance(Duration::seconds(300));
    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.clock.advance(Duration::seconds(1));
    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), 303);
    let cookie = response.headers()["set-cookie"].to_str().unwrap();
    assert!(cookie.contains("Max-Age=0"));
    assert_eq!(server.state.sessions.len(), 0);

    // The expired session stays gone.
    let status: Value = server
        .client
        .get(server.url("/api/session"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["authenticated"], false);
}

#[tokio::test]
async fn test_activity_does_not_extend_login_lifetime() {
    let server = TestServer::start().await;
    server.login().await;
    for _ in 0..3 {
        server.clock.advance(Duration::seconds(100));
        let response = server.client.get(server.url("/")).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }
    server.clock.advance(Duration::seconds(1));
    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), 303);
}

#[tokio::test]
async fn test_each_response_refreshes_cookie() {
    let server = TestServer::start().await;
    server.login().await;
    let response = server.client.get(server.url("/")).send().await.unwrap();
    let cookie = response.headers()["set-cookie"].to_str().unwrap();
    assert!(cookie.contains("Max-Age=300"));
}

#[tokio::test]
async fn test_session_status() {
    let server = TestServer::start().await;
    let status: Value = server
        .client
        .get(server.url("/api/session"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["authenticated"], false);
    assert!(status["csrf_token"].is_null());

    let token = server.login().await;
    let status: Value = server
        .client
        .get(server.url("/api/session"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["authenticated"], true);
    assert_eq!(status["csrf_token"], token.as_str());
}

#[tokio::test]
async fn test_logout_destroys_session() {
    let server = TestServer::start().await;
    let token = server.login().await;
    assert_eq!(server.state.sessions.len(), 1);

    let response = server
        .client
        .post(server.url("/logout"))
        .header("X-CSRFToken", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["redirect"], "/login");
    assert_eq!(server.state.sessions.len(), 0);

    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), 303);
}

#[tokio::test]
async fn test_relogin_issues_new_session_id() {
    let server = TestServer::start().await;
    let first = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    let first_cookie = first.headers()["set-cookie"].to_str().unwrap().to_string();

    let second = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    let second_cookie = second.headers()["set-cookie"].to_str().unwrap().to_string();

    assert_ne!(first_cookie, second_cookie);
    assert_eq!(server.state.sessions.len(), 1);
}

#[tokio::test]
async fn test_login_page_is_public() {
    let server = TestServer::start().await;
    let response = server.client.get(server.url("/login")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.text().await.unwrap().contains("<form"));
}

#[tokio::test]
async fn test_malformed_login_does_not_use_rate_limit() {
    let server = TestServer::start().await;
    for _ in 0..10 {
        let response = server
            .client
            .post(server.url("/login"))
            .header("X-Forwarded-For", CLIENT_IP)
            .form(&[("username", USERNAME)])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_out_of_range_lifetime_refused_at_startup() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = Config::default();
    config.data_file = dir.path().join("data.json");
    config.admin.password = Some(PASSWORD.to_string());
    config.session.lifetime_secs = 10_000_000_000_000;

    let clock = Arc::new(ManualClock::new(common::start_time()));
    let result = AppState::from_config(config, clock).await;
    assert!(matches!(result, Err(StateError::Config(_))));
}

#[tokio::test]
async fn test_longest_lifetime_login_works() {
    let server = TestServer::with_config(|config| {
        config.session.lifetime_secs = MAX_DURATION_SECS;
    })
    .await;
    let response = server
        .login_as(&server.client, CLIENT_IP, USERNAME, PASSWORD)
        .await;
    assert_eq!(response.status(), 200);
    let cookie = response.headers()["set-cookie"].to_str().unwrap().to_string();
    assert!(cookie.contains(&format!("Max-Age={MAX_DURATION_SECS}")));

    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(response.status(), 200);
}
