//! HTTP surface of the gateway: the session gate, the reverse proxy, the event stream and
//! the static UI, assembled into one axum router.

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use axum_login::{
    tower_sessions::{cookie::SameSite, Expiry, SessionManagerLayer, SessionStore},
    AuthManagerLayerBuilder,
};
use domain::gateway::BackendClient;
use domain::user::Backend;
use log::*;
use sea_orm::DatabaseConnection;
use service::config::Config;
use std::future::Future;
use std::sync::Arc;
use time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_sessions_sqlx_store::PostgresStore;

mod controller;
mod error;
mod event_stream;
mod extractors;
pub mod middleware;
mod router;
#[cfg(test)]
mod test_support;

/// Name of the session cookie.
const SESSION_COOKIE_NAME: &str = "id";

// Web-level state: infrastructure from `service` plus the long-lived gateway components.
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub service_state: service::AppState,
    pub relay: Arc<relay::Manager>,
    pub backend: Arc<BackendClient>,
}

impl AppState {
    pub fn new(
        service_state: service::AppState,
        relay: &Arc<relay::Manager>,
        backend: BackendClient,
    ) -> Self {
        Self {
            service_state,
            relay: Arc::clone(relay),
            backend: Arc::new(backend),
        }
    }

    pub fn config(&self) -> &Config {
        &self.service_state.config
    }

    pub fn db_conn_ref(&self) -> &DatabaseConnection {
        self.service_state.db_conn_ref()
    }
}

/// Binds the listener and serves until Ctrl-C or SIGTERM. Sessions live in Postgres.
pub async fn init_server(app_state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let session_store =
        PostgresStore::new(app_state.db_conn_ref().get_postgres_connection_pool().clone());
    session_store.migrate().await?;

    let listen_addr = format!(
        "{}:{}",
        app_state
            .config()
            .interface
            .as_deref()
            .unwrap_or("127.0.0.1"),
        app_state.config().port
    );

    info!("Server starting... listening for connections on http://{listen_addr}");

    let listener = TcpListener::bind(listen_addr).await?;
    serve(listener, app_state, session_store, shutdown_signal()).await?;

    info!("Server stopped accepting connections");
    Ok(())
}

/// Serves the app on `listener` until `signal` resolves, then drains open connections.
///
/// Event streams only end once the relay lets go of their subscribers, so the relay is
/// shut down as soon as the signal fires and before the drain starts.
pub async fn serve<Store, Signal>(
    listener: TcpListener,
    app_state: AppState,
    session_store: Store,
    signal: Signal,
) -> std::io::Result<()>
where
    Store: SessionStore + Clone,
    Signal: Future<Output = ()> + Send + 'static,
{
    let relay = Arc::clone(&app_state.relay);
    let app = app(app_state, session_store);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            signal.await;
            relay.shutdown().await;
        })
        .await
}

/// The complete router with session, authentication and CORS layers applied.
pub fn app<Store>(app_state: AppState, session_store: Store) -> Router
where
    Store: SessionStore + Clone,
{
    let config = app_state.config().clone();

    let session_layer = SessionManagerLayer::new(session_store)
        .with_name(SESSION_COOKIE_NAME)
        .with_secure(config.is_production())
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(Duration::seconds(
            config.backend_session_expiry_seconds as i64,
        )));

    let backend = Backend::new(&app_state.service_state.database_connection);
    let auth_layer = AuthManagerLayerBuilder::new(backend, session_layer).build();

    router::define_routes(app_state)
        .layer(auth_layer)
        .layer(cors_layer(&config))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("Ignoring invalid CORS origin {origin:?}: {err}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_credentials(true)
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_origin(origins)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
