//! Custom Axum extractors.

pub mod auth_user;
pub mod client_ip;

pub use auth_user::AuthUser;
pub use client_ip::{ClientIp, resolve_client_ip};
