use domain::bootstrap;
use domain::gateway::{BackendClient, BackendCredentials};
use domain::user::DatabaseIdentityStore;
use log::*;
use migration::{Migrator, MigratorTrait};
use service::{
    config::{Config, StartupMode},
    logging::Logger,
};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    Logger::init_logger(&config as &Config);

    info!(
        "Starting relay gateway [{}] in {:?} mode",
        config.runtime_env(),
        config.startup_mode
    );

    // Without a backend location and credential nothing can be proxied or relayed.
    if config.startup_mode == StartupMode::Serve {
        if let Err(e) = BackendCredentials::from_config(&config).get() {
            error!("Refusing to start without backend configuration: {e}");
            std::process::exit(1);
        }
    }

    let db = match service::init_database(&config).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to establish database connection: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = Migrator::up(db.as_ref(), None).await {
        error!("Failed to run database migrations: {e}");
        std::process::exit(1);
    }

    match bootstrap::ensure_admin_exists(&DatabaseIdentityStore::new(&db)).await {
        Ok(Some(admin)) => info!("Bootstrapped administrator {}", admin.email),
        Ok(None) => debug!("Administrator bootstrap not needed"),
        Err(e) => {
            error!("Failed to bootstrap the administrator account: {e}");
            std::process::exit(1);
        }
    }

    let backend = match BackendClient::from_config(&config) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Failed to build backend client: {e}");
            std::process::exit(1);
        }
    };

    let relay = Arc::new(relay::Manager::from_config(&config));
    relay.start();

    let app_state = web::AppState::new(service::AppState::new(config, &db), &relay, backend);

    if let Err(e) = web::init_server(app_state).await {
        error!("Server error: {e}");
    }

    relay.shutdown().await;
    info!("Relay gateway stopped");
}
