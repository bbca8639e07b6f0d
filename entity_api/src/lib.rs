//! Data access for the gateway's identity store: user lookup, creation and the
//! axum-login authentication backend that resolves session cookies to users.

pub use entity::{users, Id};

pub mod error;
pub mod user;
