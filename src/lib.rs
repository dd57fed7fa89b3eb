//! record_admin - single-admin record manager with image uploads
//!
//! This library provides the HTTP service, the security layer guarding it,
//! and the JSON/image storage behind it.

pub mod api;
pub mod clock;
pub mod config;
pub mod records;
pub mod security;
pub mod session;
pub mod storage;
pub mod tls;
