//! HTTP handlers for the event relay.
//!
//! The relay itself (upstream connection, subscriber registry) lives in the `relay` crate;
//! this module only adapts it to axum.

pub mod handler;
