//! Shared test infrastructure for integration tests
//!
//! Provides TestServer, which runs the real router in-process on an
//! ephemeral port with a manually driven clock.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use record_admin::api::{router, AppState};
use record_admin::clock::ManualClock;
use record_admin::config::Config;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "correct horse battery";

/// Client address the tests pretend to connect from, via X-Forwarded-For.
pub const CLIENT_IP: &str = "10.0.0.1";

/// 12:00:30 UTC, away from the rate limiter's minute-boundary sweep.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap()
}

/// In-process server with its own data directory and clock
pub struct TestServer {
    pub addr: SocketAddr,
    pub clock: Arc<ManualClock>,
    pub state: Arc<AppState>,
    /// Cookie-keeping client that does not follow redirects
    pub client: Client,
    dir: TempDir,
    task: JoinHandle<()>,
}

impl TestServer {
    // ── Factory methods ──

    pub async fn start() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Start with a test config adjusted by `adjust`.
    pub async fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::default();
        config.data_file = dir.path().join("data.json");
        config.upload_dir = dir.path().join("img");
        config.admin.password = Some(PASSWORD.to_string());
        config.session.cookie_secure = false;
        config.rate_limit.trusted_proxies = vec!["127.0.0.1/32".parse().unwrap()];
        adjust(&mut config);

        let clock = Arc::new(ManualClock::new(start_time()));
        let state = Arc::new(
            AppState::from_config(config, clock.clone())
                .await
                .expect("Failed to build app state"),
        );

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });

        Self {
            addr,
            clock,
            state,
            client: Self::new_client(),
            dir,
            task,
        }
    }

    // ── Instance methods ──

    /// A fresh client with an empty cookie jar.
    pub fn new_client() -> Client {
        Client::builder()
            .cookie_store(true)
            .redirect(Policy::none())
            .build()
            .expect("Failed to build client")
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn data_file(&self) -> std::path::PathBuf {
        self.dir.path().join("data.json")
    }

    pub fn upload_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("img")
    }

    /// POST /login from `ip` with the given credentials.
    pub async fn login_as(&self, client: &Client, ip: &str, username: &str, password: &str) -> Response {
        client
            .post(self.url("/login"))
            .header("X-Forwarded-For", ip)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .expect("login request failed")
    }

    /// Log the shared client in and return its CSRF token.
    pub async fn login(&self) -> String {
        let response = self.login_as(&self.client, CLIENT_IP, USERNAME, PASSWORD).await;
        assert_eq!(response.status(), 200, "login failed");
        let body: Value = response.json().await.unwrap();
        body["csrf_token"].as_str().unwrap().to_string()
    }

    /// Create a record through the API and return its id.
    pub async fn create(&self, token: &str, data: Value, order: &[&str]) -> String {
        let form = reqwest::multipart::Form::new()
            .text("data", data.to_string())
            .text("fieldsOrder", serde_json::to_string(order).unwrap())
            .text("csrf_token", token.to_string());
        let response = self
            .client
            .post(self.url("/api/item"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200, "create failed");
        let body: Value = response.json().await.unwrap();
        body["id"].as_str().unwrap().to_string()
    }

    /// Upload `bytes` as `file_name` and return the public path.
    pub async fn upload(&self, token: &str, file_name: &str, bytes: &'static [u8]) -> Response {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("csrf_token", token.to_string());
        self.client
            .post(self.url("/upload_image"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
