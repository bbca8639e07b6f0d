//! Shared fixtures for router and middleware tests.

use crate::AppState;
use clap::Parser;
use domain::gateway::{BackendClient, BackendCredentials, PathPolicy};
use relay::{Manager, RelayOptions};
use sea_orm::DatabaseConnection;
use service::config::{Config, StartupMode};
use std::sync::Arc;
use std::time::Duration;

/// State whose backend is unreachable. Enough for anything that must not forward.
pub(crate) fn app_state(db: DatabaseConnection) -> AppState {
    app_state_with_backend(db, "http://127.0.0.1:1")
}

/// State forwarding to `backend_url` with api key `test-key` and a dormant relay.
pub(crate) fn app_state_with_backend(db: DatabaseConnection, backend_url: &str) -> AppState {
    let config = Config::parse_from(["gateway"]);
    let relay = Arc::new(Manager::new(
        relay::upstream::from_config(&config),
        RelayOptions {
            startup_mode: StartupMode::Build,
            ..RelayOptions::default()
        },
    ));

    build(config, db, backend_url, relay)
}

/// State with an unreachable backend around the given relay.
#[cfg(feature = "mock")]
pub(crate) fn app_state_with_relay(db: DatabaseConnection, relay: Arc<Manager>) -> AppState {
    build(
        Config::parse_from(["gateway"]),
        db,
        "http://127.0.0.1:1",
        relay,
    )
}

fn build(
    config: Config,
    db: DatabaseConnection,
    backend_url: &str,
    relay: Arc<Manager>,
) -> AppState {
    let db = Arc::new(db);
    let backend = BackendClient::new(
        BackendCredentials::new(Some(backend_url.to_string()), Some("test-key".to_string())),
        PathPolicy::default(),
        Duration::from_secs(5),
    )
    .unwrap();

    AppState::new(service::AppState::new(config, &db), &relay, backend)
}

#[cfg(feature = "mock")]
pub(crate) use authenticated::*;

#[cfg(feature = "mock")]
mod authenticated {
    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{users, Id};
    use entity_api::user::generate_hash;
    use futures::StreamExt;
    use relay::error::Error;
    use relay::upstream::{Upstream, UpstreamStream};
    use relay::RelayMessage;
    use sea_orm::{DatabaseBackend, DatabaseConnection, MockDatabase};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    pub(crate) const TEST_EMAIL: &str = "test@domain.com";
    pub(crate) const TEST_PASSWORD: &str = "password2";

    pub(crate) fn test_user() -> users::Model {
        users::Model {
            id: Id::new_v4(),
            email: TEST_EMAIL.to_string(),
            display_name: Some("Test User".to_string()),
            password: generate_hash(TEST_PASSWORD.to_string()),
            role: users::Role::User,
            created_at: Utc::now().into(),
            updated_at: Utc::now().into(),
        }
    }

    /// One lookup for authentication, then one session lookup per later request.
    pub(crate) fn authenticated_db(requests: usize) -> DatabaseConnection {
        let user = test_user();
        (0..=requests)
            .fold(MockDatabase::new(DatabaseBackend::Postgres), |db, _| {
                db.append_query_results([[user.clone()]])
            })
            .into_connection()
    }

    /// Upstream whose single connection delivers whatever is sent on the returned feed.
    pub(crate) struct ChannelUpstream {
        receiver: Mutex<Option<mpsc::UnboundedReceiver<RelayMessage>>>,
    }

    impl ChannelUpstream {
        pub(crate) fn new() -> (Self, mpsc::UnboundedSender<RelayMessage>) {
            let (feed, receiver) = mpsc::unbounded_channel();
            let upstream = Self {
                receiver: Mutex::new(Some(receiver)),
            };
            (upstream, feed)
        }
    }

    #[async_trait]
    impl Upstream for ChannelUpstream {
        async fn connect(&self) -> Result<UpstreamStream, Error> {
            let receiver = self.receiver.lock().unwrap().take();
            match receiver {
                Some(receiver) => Ok(futures::stream::unfold(receiver, |mut receiver| async move {
                    receiver.recv().await.map(|message| (Ok(message), receiver))
                })
                .boxed()),
                None => futures::future::pending().await,
            }
        }
    }
}
