//! Salted SHA-256 digest for the single admin credential.
//!
//! One static salt is only tolerable because exactly one credential exists.
//! Anything with more than one account needs per-credential random salts and a
//! slow hash (bcrypt, argon2) instead.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Hex-encoded SHA-256 of `password || salt`.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Recompute the digest and compare it against `digest` in constant time.
pub fn verify_password(password: &str, digest: &str, salt: &str) -> bool {
    let computed = hash_password(password, salt);
    computed.as_bytes().ct_eq(digest.as_bytes()).into()
}

/// The admin credential, fixed at startup.
#[derive(Clone)]
pub struct Credential {
    pub username: String,
    pub password_hash: String,
    pub salt: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password_hash: impl Into<String>, salt: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            salt: salt.into(),
        }
    }

    /// Build a credential from a plaintext password.
    pub fn from_plaintext(username: impl Into<String>, password: &str, salt: impl Into<String>) -> Self {
        let salt = salt.into();
        let password_hash = hash_password(password, &salt);
        Self::new(username, password_hash, salt)
    }

    /// Both the username and the password must match.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let user_ok: bool = self.username.as_bytes().ct_eq(username.as_bytes()).into();
        // Always hash so a wrong username costs the same as a wrong password.
        let password_ok = verify_password(password, &self.password_hash, &self.salt);
        user_ok & password_ok
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}
