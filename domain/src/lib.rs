//! Business rules of the gateway: identity bootstrap, session-backed users and the
//! backend reverse-proxy client.
//!
//! Consumers of the `domain` crate should not need to depend on `entity_api` directly, so the
//! entity types they need are re-exported here.

// Re-exports from `entity` crate via `entity_api`
pub use entity_api::{users, Id};

pub mod bootstrap;
pub mod error;
pub mod gateway;
pub mod user;
