//! Configuration for the record admin server

use crate::security::password::{hash_password, Credential};
use chrono::Duration;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use zeroize::Zeroize;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// JSON document holding every record
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,

    /// Directory uploaded images are written to and served from
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Largest accepted request body in bytes
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,

    /// Lowercase image file extensions accepted by the upload endpoint
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Record field used as the display name. Required on every record.
    #[serde(default = "default_name_field")]
    pub name_field: String,

    /// Log level filter string. Overridden by RUST_LOG.
    /// Default: "record_admin=debug,tower_http=debug"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub security: SecurityConfig,

    #[serde(default)]
    pub tls: TlsConfig,
}

/// The single admin credential.
///
/// Either `password_hash` (hex SHA-256 of password + salt, see
/// `record_admin --hash-password`) or a plaintext `password`. With neither,
/// a random password is generated at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub password_hash: Option<String>,

    #[serde(default = "default_salt")]
    pub salt: String,
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds, counted from login
    #[serde(default = "default_session_lifetime")]
    pub lifetime_secs: u64,

    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Mark the cookie `Secure`. Forced off when RADM_ENV=development.
    #[serde(default = "default_true")]
    pub cookie_secure: bool,

    /// Re-issue the cookie and push the store expiry forward on every request
    #[serde(default = "default_true")]
    pub refresh_each_request: bool,

    /// How often expired sessions are swept from memory
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_login_max_requests")]
    pub login_max_requests: usize,

    #[serde(default = "default_login_period")]
    pub login_period_secs: u64,

    /// Reverse proxies whose X-Forwarded-For / X-Real-IP headers are believed
    #[serde(default)]
    pub trusted_proxies: Vec<IpNet>,
}

/// External hosts allowed by the Content-Security-Policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_csp_image_host")]
    pub csp_image_host: String,

    #[serde(default = "default_csp_style_host")]
    pub csp_style_host: String,
}

/// HTTPS settings. Without cert/key paths a self-signed certificate is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub cert_path: Option<String>,

    #[serde(default)]
    pub key_path: Option<String>,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 43891))
}

fn default_data_file() -> PathBuf {
    PathBuf::from("data.json")
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("static/img")
}

fn default_max_upload_size() -> usize {
    1000 * 1024 * 1024 // 1000MB
}

fn default_allowed_extensions() -> Vec<String> {
    [
        "png", "jpg", "jpeg", "gif", "bmp", "webp", "ico", "icon", "svg", "tiff", "heic", "heif",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_name_field() -> String {
    "name".to_string()
}

fn default_log_level() -> String {
    "record_admin=debug,tower_http=debug".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_salt() -> String {
    "record_admin".to_string()
}

/// Upper bound for the session lifetime and the login rate-limit period
/// (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_session_lifetime() -> u64 {
    300
}

fn default_cookie_name() -> String {
    "session".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_login_max_requests() -> usize {
    5
}

fn default_login_period() -> u64 {
    300
}

fn default_csp_image_host() -> String {
    "https://q.qlogo.cn".to_string()
}

fn default_csp_style_host() -> String {
    "https://www.xiaoxiaodediyi.xyz".to_string()
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: None,
            password_hash: None,
            salt: default_salt(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: default_session_lifetime(),
            cookie_name: default_cookie_name(),
            cookie_secure: true,
            refresh_each_request: true,
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_max_requests: default_login_max_requests(),
            login_period_secs: default_login_period(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            csp_image_host: default_csp_image_host(),
            csp_style_host: default_csp_style_host(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_file: default_data_file(),
            upload_dir: default_upload_dir(),
            max_upload_size: default_max_upload_size(),
            allowed_extensions: default_allowed_extensions(),
            name_field: default_name_field(),
            log_level: default_log_level(),
            admin: AdminConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            security: SecurityConfig::default(),
            tls: TlsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_mode();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("RADM_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.listen_addr = parsed;
            }
        }

        if let Ok(path) = std::env::var("RADM_DATA_FILE") {
            config.data_file = PathBuf::from(path);
        }

        if let Ok(dir) = std::env::var("RADM_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }

        if let Ok(size) = std::env::var("RADM_MAX_UPLOAD_SIZE") {
            if let Ok(parsed) = size.parse() {
                config.max_upload_size = parsed;
            }
        }

        if let Ok(field) = std::env::var("RADM_NAME_FIELD") {
            config.name_field = field;
        }

        // Admin credential
        if let Ok(username) = std::env::var("RADM_ADMIN_USERNAME") {
            config.admin.username = username;
        }
        config.admin.password = std::env::var("RADM_ADMIN_PASSWORD").ok();
        config.admin.password_hash = std::env::var("RADM_ADMIN_PASSWORD_HASH").ok();
        if let Ok(salt) = std::env::var("RADM_ADMIN_SALT") {
            config.admin.salt = salt;
        }

        if let Ok(secs) = std::env::var("RADM_SESSION_LIFETIME") {
            if let Some(parsed) = secs.parse().ok().filter(|s| duration_in_range(*s)) {
                config.session.lifetime_secs = parsed;
            }
        }

        if let Ok(max) = std::env::var("RADM_LOGIN_RATE_LIMIT") {
            if let Ok(parsed) = max.parse() {
                config.rate_limit.login_max_requests = parsed;
            }
        }

        if let Ok(secs) = std::env::var("RADM_LOGIN_RATE_LIMIT_PERIOD") {
            if let Some(parsed) = secs.parse().ok().filter(|s| duration_in_range(*s)) {
                config.rate_limit.login_period_secs = parsed;
            }
        }

        if let Ok(list) = std::env::var("RADM_TRUSTED_PROXIES") {
            config.rate_limit.trusted_proxies = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
        }

        if let Ok(enabled) = std::env::var("RADM_TLS") {
            config.tls.enabled = enabled == "true" || enabled == "1";
        }
        config.tls.cert_path = std::env::var("RADM_TLS_CERT").ok();
        config.tls.key_path = std::env::var("RADM_TLS_KEY").ok();

        // Log level (runtime operational)
        if let Ok(level) = std::env::var("RADM_LOG_LEVEL") {
            config.log_level = level;
        }

        config.normalize();
        config.apply_env_mode();
        config
    }

    /// Load configuration from file if it exists, otherwise from environment
    pub fn load() -> Self {
        // Try config file first
        if let Ok(path) = std::env::var("RADM_CONFIG") {
            if let Ok(config) = Self::from_file(&path) {
                return config;
            }
        }

        // Try default config file locations
        for path in &["record_admin.toml", "/etc/record_admin/config.toml"] {
            if std::path::Path::new(path).exists() {
                if let Ok(config) = Self::from_file(path) {
                    return config;
                }
            }
        }

        // Fall back to environment variables
        Self::from_env()
    }

    /// True when RADM_ENV says this is a development deployment.
    pub fn is_development() -> bool {
        std::env::var("RADM_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false)
    }

    /// Development deployments run over plain HTTP.
    fn apply_env_mode(&mut self) {
        if Self::is_development() {
            self.session.cookie_secure = false;
        }
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session_lifetime()?;
        self.login_period()?;
        Ok(())
    }

    /// `session.lifetime_secs` as a duration.
    pub fn session_lifetime(&self) -> Result<Duration, ConfigError> {
        checked_duration("session.lifetime_secs", self.session.lifetime_secs)
    }

    /// `rate_limit.login_period_secs` as a duration.
    pub fn login_period(&self) -> Result<Duration, ConfigError> {
        checked_duration("rate_limit.login_period_secs", self.rate_limit.login_period_secs)
    }

    fn normalize(&mut self) {
        for ext in &mut self.allowed_extensions {
            *ext = ext.trim_start_matches('.').to_ascii_lowercase();
        }
    }

    /// Resolve the admin credential. Resolution order:
    /// 1. `password_hash` is set: use it as-is.
    /// 2. `password` is set: hash it, then wipe the plaintext.
    /// 3. Neither: generate a random password, print it once to stderr.
    pub fn resolve_credential(&mut self) -> Credential {
        let admin = &mut self.admin;
        if let Some(hash) = &admin.password_hash {
            // A stray plaintext next to a hash is never used.
            if let Some(mut plain) = admin.password.take() {
                plain.zeroize();
            }
            return Credential::new(&admin.username, hash.to_ascii_lowercase(), &admin.salt);
        }

        let mut password = match admin.password.take() {
            Some(password) => password,
            None => {
                let password = generate_password();
                print_password_banner(&admin.username, &password);
                password
            }
        };

        let credential = Credential::from_plaintext(&admin.username, &password, &admin.salt);
        password.zeroize();
        admin.password_hash = Some(credential.password_hash.clone());
        credential
    }

    /// Hex digest of `password` under the configured salt.
    pub fn hash_with_salt(&self, password: &str) -> String {
        hash_password(password, &self.admin.salt)
    }
}

fn generate_password() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::rngs::OsRng
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

fn print_password_banner(username: &str, password: &str) {
    eprintln!();
    eprintln!("╔══════════════════════════════════════════════════════════╗");
    eprintln!("║  ADMIN PASSWORD (generated at startup, save this!)       ║");
    eprintln!("║                                                          ║");
    eprintln!("║  Username: {:<46}║", username);
    eprintln!("║  Password: {:<46}║", password);
    eprintln!("║                                                          ║");
    eprintln!("║  Set RADM_ADMIN_PASSWORD_HASH to skip auto-generation.   ║");
    eprintln!("╚══════════════════════════════════════════════════════════╝");
    eprintln!();
}

fn duration_in_range(secs: u64) -> bool {
    (1..=MAX_DURATION_SECS).contains(&secs)
}

fn checked_duration(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "{field} must be between 1 and {MAX_DURATION_SECS} seconds, got {secs}"
        ))
    };
    if !duration_in_range(secs) {
        return Err(invalid());
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(invalid)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
