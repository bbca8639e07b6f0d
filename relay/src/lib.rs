//! Event relay: one upstream event connection fanned out to many browser subscribers.
//!
//! # Architecture
//!
//! - **Single upstream**: the [`Manager`] owns exactly one reader task per process. It is
//!   spawned by the first subscriber (or an explicit `start`) and reconnects with
//!   exponential backoff until `shutdown`.
//! - **Bounded subscribers**: every subscriber gets its own bounded queue in the
//!   [`registry::SubscriberRegistry`]. A subscriber that cannot keep up is dropped; the
//!   others are unaffected.
//! - **Ephemeral messages**: nothing is replayed. A subscriber only sees messages
//!   broadcast after it attached.
//! - **Pluggable transport**: [`upstream::Upstream`] has a socket and a server-push
//!   implementation, selected by configuration.
//!
//! # Modules
//!
//! - `backoff`: reconnect delay policy
//! - `error`: relay error kinds
//! - `manager`: lifecycle, status and subscriber handles
//! - `message`: relayed message type and frame decoding
//! - `registry`: live subscribers and non-blocking broadcast
//! - `upstream`: transports

pub mod backoff;
pub mod error;
pub mod manager;
pub mod message;
pub mod registry;
pub mod upstream;

pub use manager::{Manager, RelayOptions, RelayState, RelayStatus, SubscriberHandle};
pub use message::RelayMessage;
