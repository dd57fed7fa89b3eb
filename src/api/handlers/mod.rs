//! Request handlers
//!
//! Split into submodules by domain:
//! - `items`: record listing, detail, search and CRUD
//! - `images`: upload, serving, deletion and garbage collection
//! - `status`: health check

mod images;
mod items;
mod status;

use super::errors::ApiError;
use crate::clock::SharedClock;
use crate::config::{Config, ConfigError};
use crate::records::{self, IMAGE_PREFIX};
use crate::security::csrf::CsrfGuard;
use crate::security::headers::SecurityHeaders;
use crate::security::password::Credential;
use crate::security::policy::SessionPolicy;
use crate::security::rate_limit::RateLimiter;
use crate::session::{CookieSettings, SessionStore};
use crate::storage::{ImageStore, JsonFileStore, RecordStore, StorageError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::error;

pub use images::{cleanup_images, delete_image, serve_image, upload_image};
pub use items::{create_item, data_detail, delete_item, index, search, update_item};
pub use status::{health_check, HealthResponse};

/// Why the application state could not be built
#[derive(Debug, Error)]
pub enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Application state shared across handlers and middleware
pub struct AppState {
    /// Startup configuration. The plaintext admin password has been wiped.
    pub config: Config,
    pub credential: Credential,
    pub login_limiter: RateLimiter,
    pub sessions: Arc<SessionStore>,
    pub cookies: CookieSettings,
    pub csrf: CsrfGuard,
    pub policy: SessionPolicy,
    pub security_headers: Arc<SecurityHeaders>,
    pub records: Arc<dyn RecordStore>,
    pub images: ImageStore,
    /// Held for every record mutation and image sweep.
    pub record_writes: Mutex<()>,
}

impl AppState {
    /// Wire up every component from `config`. Resolves (and possibly
    /// generates) the admin credential.
    pub fn new(
        mut config: Config,
        records: Arc<dyn RecordStore>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        let lifetime = config.session_lifetime()?;
        let login_limiter = RateLimiter::new(
            config.rate_limit.login_max_requests,
            config.login_period()?,
            clock.clone(),
        );
        let credential = config.resolve_credential();

        let cookies = CookieSettings {
            name: config.session.cookie_name.clone(),
            secure: config.session.cookie_secure,
            max_age: lifetime,
        };
        let security_headers = Arc::new(SecurityHeaders::new(
            &config.security.csp_image_host,
            &config.security.csp_style_host,
        ));
        let images = ImageStore::new(
            config.upload_dir.clone(),
            config.allowed_extensions.clone(),
            clock.clone(),
        );

        Ok(Self {
            credential,
            login_limiter,
            sessions: Arc::new(SessionStore::new(lifetime, clock.clone())),
            cookies,
            csrf: CsrfGuard::new(clock.clone()),
            policy: SessionPolicy::new(lifetime, clock),
            security_headers,
            records,
            images,
            record_writes: Mutex::new(()),
            config,
        })
    }

    /// Like [`AppState::new`], backed by the JSON document named in `config`.
    pub async fn from_config(config: Config, clock: SharedClock) -> Result<Self, StateError> {
        config.validate()?;
        let records = JsonFileStore::open(config.data_file.clone()).await?;
        Ok(Self::new(config, Arc::new(records), clock)?)
    }

    pub fn name_field(&self) -> &str {
        &self.config.name_field
    }

    /// Delete every uploaded image no record points at. The caller must hold
    /// `record_writes`.
    pub(crate) async fn sweep_unreferenced_images(&self) -> Result<usize, ApiError> {
        let referenced: HashSet<String> = self
            .records
            .list()
            .await?
            .iter()
            .flat_map(|(_, record)| records::image_references(record).map(str::to_string))
            .collect();
        Ok(self.images.cleanup_unused(&referenced).await?)
    }

    /// Same as [`Self::sweep_unreferenced_images`] but only logs failures,
    /// for sweeps piggybacking on page loads.
    pub(crate) async fn sweep_quietly(&self) {
        let _guard = self.record_writes.lock().await;
        if let Err(e) = self.sweep_unreferenced_images().await {
            error!("image cleanup failed: {}", e);
        }
    }
}

/// Public URL path of a stored image.
pub(crate) fn image_url(name: &str) -> String {
    format!("{IMAGE_PREFIX}{name}")
}
