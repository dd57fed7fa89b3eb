//! Security layer: credential check, login throttling, CSRF protection,
//! session lifetime rules and hardening headers.

pub mod csrf;
pub mod headers;
pub mod password;
pub mod policy;
pub mod rate_limit;

pub use csrf::{CsrfGuard, CsrfRejection};
pub use headers::SecurityHeaders;
pub use password::{hash_password, verify_password, Credential};
pub use policy::SessionPolicy;
pub use rate_limit::RateLimiter;
