//! Outbound integrations. The only external system the gateway talks to is its backend.

pub mod backend;
pub mod credentials;

pub use backend::{BackendClient, PathPolicy, ProxyMethod, ProxyRequest, ProxyResponse};
pub use credentials::BackendCredentials;
