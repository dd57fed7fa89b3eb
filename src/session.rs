//! In-memory server-side sessions keyed by an opaque cookie value.
//!
//! The store only knows about expiry of the stored entry (sliding: every save
//! pushes `expires_at` forward by the lifetime). Login-age rules live in
//! [`crate::security::policy`].

use crate::clock::SharedClock;
use axum::http::{header, HeaderMap};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;

/// Everything a session can carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub logged_in: bool,
    pub login_time: Option<DateTime<Utc>>,
    pub csrf_token: Option<String>,
    /// Permanent sessions get a cookie `Max-Age`; others last for the browser session.
    pub permanent: bool,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

struct StoredSession {
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// Thread-safe in-memory session store.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
    lifetime: Duration,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(lifetime: Duration, clock: SharedClock) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
            clock,
        }
    }

    /// A fresh session id (64-char hex string).
    pub fn generate_id() -> String {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    /// Fetch a live session. An entry is live up to and including its
    /// expiry instant; expired entries are dropped on sight.
    pub fn load(&self, id: &str) -> Option<SessionData> {
        let now = self.clock.now();
        {
            let sessions = self.sessions.read();
            match sessions.get(id) {
                Some(stored) if now <= stored.expires_at => return Some(stored.data.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().remove(id);
        None
    }

    /// Store `data` under `id` and restart its expiry timer.
    pub fn save(&self, id: &str, data: SessionData) {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(self.lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.sessions
            .write()
            .insert(id.to_string(), StoredSession { data, expires_at });
    }

    pub fn remove(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    /// Remove all expired sessions. Returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, stored| now <= stored.expires_at);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The session of the request being handled, with dirty tracking.
#[derive(Debug, Default)]
pub struct Session {
    id: Option<String>,
    data: SessionData,
    modified: bool,
    rotate_id: bool,
}

impl Session {
    /// A brand new, empty session with no id yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A session loaded from the store.
    pub fn existing(id: String, data: SessionData) -> Self {
        Self {
            id: Some(id),
            data,
            modified: false,
            rotate_id: false,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    /// Mutable access; marks the session modified.
    pub fn data_mut(&mut self) -> &mut SessionData {
        self.modified = true;
        &mut self.data
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Drop everything in the session.
    pub fn clear(&mut self) {
        self.data = SessionData::default();
        self.modified = true;
    }

    /// Ask for a new id when the session is next persisted.
    pub fn rotate_id(&mut self) {
        self.rotate_id = true;
        self.modified = true;
    }

    pub fn wants_new_id(&self) -> bool {
        self.rotate_id
    }
}

/// Shared handle placed in request extensions by the session middleware.
#[derive(Clone, Debug)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    /// Never hold this guard across an `.await`.
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.0.lock()
    }
}

/// Cookie attributes for the session cookie.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub name: String,
    pub secure: bool,
    pub max_age: Duration,
}

impl CookieSettings {
    /// `Set-Cookie` value carrying `id`.
    pub fn set_cookie(&self, id: &str, permanent: bool) -> String {
        let mut cookie = format!("{}={}; HttpOnly; SameSite=Lax; Path=/", self.name, id);
        if self.secure {
            cookie.push_str("; Secure");
        }
        if permanent {
            cookie.push_str(&format!("; Max-Age={}", self.max_age.num_seconds()));
        }
        cookie
    }

    /// `Set-Cookie` value that makes the browser forget the session.
    pub fn clear_cookie(&self) -> String {
        let mut cookie = format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", self.name);
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Extract our session id from the `Cookie` header(s).
    pub fn extract(&self, headers: &HeaderMap) -> Option<String> {
        let prefix = format!("{}=", self.name);
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .find_map(|part| {
                part.trim()
                    .strip_prefix(prefix.as_str())
                    .filter(|value| !value.is_empty())
                    .map(|value| value.to_string())
            })
    }
}
